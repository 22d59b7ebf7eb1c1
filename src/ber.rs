// BER value tree with encoding/decoding for LDAP v3
// Definite lengths only; integers and lengths are always written in minimal form

use crate::config::CodecConfig;
use crate::error::{LdapError, Result};
use bytes::BufMut;

/// Universal tag numbers with a dedicated `BerNode` variant.
pub mod universal {
    pub const BOOLEAN: u32 = 1;
    pub const INTEGER: u32 = 2;
    pub const OCTET_STRING: u32 = 4;
    pub const NULL: u32 = 5;
    pub const ENUMERATED: u32 = 10;
    pub const SEQUENCE: u32 = 16;
}

fn has_dedicated_variant(number: u32) -> bool {
    matches!(
        number,
        universal::BOOLEAN
            | universal::INTEGER
            | universal::OCTET_STRING
            | universal::NULL
            | universal::ENUMERATED
            | universal::SEQUENCE
    )
}

const CONSTRUCTED_BIT: u8 = 0x20;
const HIGH_TAG_MARKER: u8 = 0x1F;
/// LDAP lengths never exceed 2^31-1.
const MAX_LENGTH: u32 = i32::MAX as u32;
const MAX_LENGTH_OCTETS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagClass {
    Universal,
    Application,
    Context,
    Private,
}

impl TagClass {
    fn bits(self) -> u8 {
        match self {
            TagClass::Universal => 0x00,
            TagClass::Application => 0x40,
            TagClass::Context => 0x80,
            TagClass::Private => 0xC0,
        }
    }

    fn from_bits(byte: u8) -> Self {
        match byte & 0xC0 {
            0x00 => TagClass::Universal,
            0x40 => TagClass::Application,
            0x80 => TagClass::Context,
            _ => TagClass::Private,
        }
    }
}

/// Class / constructed / tag-number triple naming a node's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub class: TagClass,
    pub constructed: bool,
    pub number: u32,
}

impl Identifier {
    pub const fn new(class: TagClass, constructed: bool, number: u32) -> Self {
        Self { class, constructed, number }
    }

    pub const fn universal(number: u32, constructed: bool) -> Self {
        Self::new(TagClass::Universal, constructed, number)
    }

    pub const fn application(number: u32, constructed: bool) -> Self {
        Self::new(TagClass::Application, constructed, number)
    }

    pub const fn context(number: u32, constructed: bool) -> Self {
        Self::new(TagClass::Context, constructed, number)
    }
}

/// Content of a `Tagged` node: raw octets when primitive, child values when constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaggedContent {
    Primitive(Vec<u8>),
    Constructed(Vec<BerNode>),
}

/// Any value that is not one of the dedicated universal types. A universal
/// tag number that has its own `BerNode` variant cannot be wrapped here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged {
    class: TagClass,
    number: u32,
    content: TaggedContent,
}

impl Tagged {
    pub fn new(class: TagClass, number: u32, content: TaggedContent) -> Result<Self> {
        if class == TagClass::Universal && has_dedicated_variant(number) {
            return Err(LdapError::InvalidParameter(format!(
                "universal tag {} must use its own node type",
                number
            )));
        }
        Ok(Self { class, number, content })
    }

    pub fn class(&self) -> TagClass {
        self.class
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn content(&self) -> &TaggedContent {
        &self.content
    }

    pub fn identifier(&self) -> Identifier {
        let constructed = matches!(self.content, TaggedContent::Constructed(_));
        Identifier::new(self.class, constructed, self.number)
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            TaggedContent::Primitive(bytes) => Some(bytes),
            TaggedContent::Constructed(_) => None,
        }
    }

    pub fn children(&self) -> Option<&[BerNode]> {
        match &self.content {
            TaggedContent::Primitive(_) => None,
            TaggedContent::Constructed(children) => Some(children),
        }
    }
}

/// Generic BER value. Decoding never assigns domain meaning to tags;
/// anything that is not one of the universal types below comes back as `Tagged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BerNode {
    Boolean(bool),
    Integer(i64),
    Enumerated(i64),
    OctetString(Vec<u8>),
    Null,
    Sequence(Vec<BerNode>),
    Tagged(Tagged),
}

impl BerNode {
    pub fn string(value: &str) -> Self {
        BerNode::OctetString(value.as_bytes().to_vec())
    }

    pub fn context_primitive(number: u32, bytes: Vec<u8>) -> Self {
        BerNode::Tagged(Tagged {
            class: TagClass::Context,
            number,
            content: TaggedContent::Primitive(bytes),
        })
    }

    pub fn context_constructed(number: u32, children: Vec<BerNode>) -> Self {
        BerNode::Tagged(Tagged {
            class: TagClass::Context,
            number,
            content: TaggedContent::Constructed(children),
        })
    }

    pub fn application_constructed(number: u32, children: Vec<BerNode>) -> Self {
        BerNode::Tagged(Tagged {
            class: TagClass::Application,
            number,
            content: TaggedContent::Constructed(children),
        })
    }

    pub fn identifier(&self) -> Identifier {
        match self {
            BerNode::Boolean(_) => Identifier::universal(universal::BOOLEAN, false),
            BerNode::Integer(_) => Identifier::universal(universal::INTEGER, false),
            BerNode::Enumerated(_) => Identifier::universal(universal::ENUMERATED, false),
            BerNode::OctetString(_) => Identifier::universal(universal::OCTET_STRING, false),
            BerNode::Null => Identifier::universal(universal::NULL, false),
            BerNode::Sequence(_) => Identifier::universal(universal::SEQUENCE, true),
            BerNode::Tagged(tagged) => tagged.identifier(),
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            BerNode::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BerNode::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_enumerated(&self) -> Option<i64> {
        match self {
            BerNode::Enumerated(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_octet_string(&self) -> Option<&[u8]> {
        match self {
            BerNode::OctetString(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[BerNode]> {
        match self {
            BerNode::Sequence(children) => Some(children),
            _ => None,
        }
    }

    pub fn as_tagged(&self) -> Option<&Tagged> {
        match self {
            BerNode::Tagged(tagged) => Some(tagged),
            _ => None,
        }
    }

    /// Serialize this value to a fresh buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut writer = BerWriter::new();
        writer.write_node(self);
        writer.into_vec()
    }
}

/// Serialize `node` into `sink`. Identical values always produce identical bytes.
pub fn encode<B: BufMut>(node: &BerNode, sink: &mut B) {
    let mut writer = BerWriter::new();
    writer.write_node(node);
    sink.put_slice(&writer.into_vec());
}

// BER encoding utilities
pub struct BerWriter {
    buffer: Vec<u8>,
}

impl Default for BerWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BerWriter {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn write_identifier(&mut self, id: Identifier) {
        let mut first = id.class.bits();
        if id.constructed {
            first |= CONSTRUCTED_BIT;
        }
        if id.number < u32::from(HIGH_TAG_MARKER) {
            self.buffer.push(first | id.number as u8);
            return;
        }
        // High-tag-number form: base-128 groups, most significant first
        self.buffer.push(first | HIGH_TAG_MARKER);
        let mut groups = Vec::new();
        let mut number = id.number;
        while number > 0 {
            groups.push((number & 0x7F) as u8);
            number >>= 7;
        }
        groups.reverse();
        let last = groups.len() - 1;
        for (i, group) in groups.iter().enumerate() {
            self.buffer.push(if i == last { *group } else { group | 0x80 });
        }
    }

    pub fn write_length(&mut self, length: usize) {
        if length < 128 {
            // Short form
            self.buffer.push(length as u8);
        } else {
            // Long form
            let mut bytes = Vec::new();
            let mut len = length;
            while len > 0 {
                bytes.push((len & 0xFF) as u8);
                len >>= 8;
            }
            bytes.reverse();
            self.buffer.push(0x80 | bytes.len() as u8);
            self.buffer.extend_from_slice(&bytes);
        }
    }

    fn write_primitive(&mut self, id: Identifier, content: &[u8]) {
        self.write_identifier(id);
        self.write_length(content.len());
        self.buffer.extend_from_slice(content);
    }

    fn write_constructed(&mut self, id: Identifier, children: &[BerNode]) {
        let mut inner = BerWriter::new();
        for child in children {
            inner.write_node(child);
        }
        self.write_primitive(id, &inner.buffer);
    }

    pub fn write_node(&mut self, node: &BerNode) {
        let id = node.identifier();
        match node {
            BerNode::Boolean(value) => self.write_primitive(id, &[if *value { 0xFF } else { 0x00 }]),
            BerNode::Integer(value) | BerNode::Enumerated(value) => {
                self.write_primitive(id, &integer_content(*value))
            }
            BerNode::OctetString(bytes) => self.write_primitive(id, bytes),
            BerNode::Null => self.write_primitive(id, &[]),
            BerNode::Sequence(children) => self.write_constructed(id, children),
            BerNode::Tagged(tagged) => match &tagged.content {
                TaggedContent::Primitive(bytes) => self.write_primitive(id, bytes),
                TaggedContent::Constructed(children) => self.write_constructed(id, children),
            },
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buffer
    }
}

/// Two's-complement, big-endian, shortest form that keeps the sign bit right.
fn integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let next_high = bytes[start + 1] & 0x80;
        let redundant = (bytes[start] == 0x00 && next_high == 0) || (bytes[start] == 0xFF && next_high != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn parse_integer(content: &[u8]) -> Result<i64> {
    if content.is_empty() {
        return Err(LdapError::InvalidEncoding("zero-length integer".to_string()));
    }
    if content.len() > 8 {
        return Err(LdapError::InvalidEncoding(format!("integer too large: {} bytes", content.len())));
    }
    if content.len() > 1 {
        let next_high = content[1] & 0x80;
        if (content[0] == 0x00 && next_high == 0) || (content[0] == 0xFF && next_high != 0) {
            return Err(LdapError::InvalidEncoding(format!(
                "integer has redundant leading byte 0x{:02X}",
                content[0]
            )));
        }
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &byte in content {
        value = (value << 8) | i64::from(byte);
    }
    Ok(value)
}

// BER parsing utilities
struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn read_byte(&mut self, what: &str) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| LdapError::truncated(1, 0, what))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_raw_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(LdapError::truncated(n, self.remaining(), "content"));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn read_identifier(&mut self) -> Result<Identifier> {
        let first = self.read_byte("identifier")?;
        let class = TagClass::from_bits(first);
        let constructed = first & CONSTRUCTED_BIT != 0;
        let low = first & HIGH_TAG_MARKER;
        if low != HIGH_TAG_MARKER {
            return Ok(Identifier::new(class, constructed, u32::from(low)));
        }

        let mut number: u32 = 0;
        let mut leading = true;
        loop {
            let byte = self.read_byte("high tag number")?;
            if leading && byte == 0x80 {
                return Err(LdapError::InvalidEncoding("tag number has a leading zero group".to_string()));
            }
            leading = false;
            if number > (u32::MAX >> 7) {
                return Err(LdapError::InvalidEncoding("tag number does not fit 32 bits".to_string()));
            }
            number = (number << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                break;
            }
        }
        if number < u32::from(HIGH_TAG_MARKER) {
            return Err(LdapError::InvalidEncoding(format!(
                "tag number {} must use the single-octet form",
                number
            )));
        }
        Ok(Identifier::new(class, constructed, number))
    }

    fn read_length(&mut self) -> Result<usize> {
        let first_byte = self.read_byte("length")?;

        if (first_byte & 0x80) == 0 {
            // Short form
            return Ok(first_byte as usize);
        }
        // Long form
        let length_bytes = (first_byte & 0x7F) as usize;
        if length_bytes == 0 {
            return Err(LdapError::MalformedLength("indefinite length not supported".to_string()));
        }
        if length_bytes > MAX_LENGTH_OCTETS {
            return Err(LdapError::MalformedLength(format!("length too large: {} bytes", length_bytes)));
        }
        if self.remaining() < length_bytes {
            return Err(LdapError::truncated(length_bytes, self.remaining(), "length encoding"));
        }
        let mut length = 0u32;
        for _ in 0..length_bytes {
            length = (length << 8) | u32::from(self.read_byte("length")?);
        }
        if length > MAX_LENGTH {
            return Err(LdapError::MalformedLength(format!("length {} exceeds 2^31-1", length)));
        }
        Ok(length as usize)
    }

    /// Read one complete TLV. `budget` bounds header plus content.
    fn read_node(&mut self, budget: usize, depth: usize) -> Result<BerNode> {
        let start = self.position();
        let id = self.read_identifier()?;
        let length = self.read_length()?;
        if length > self.remaining() {
            return Err(LdapError::truncated(length, self.remaining(), "value"));
        }
        let total = self.position() - start + length;
        if total > budget {
            return Err(LdapError::MalformedLength(format!(
                "value of {} bytes exceeds the {} bytes allowed",
                total, budget
            )));
        }
        let content = self.read_raw_bytes(length)?;
        build_node(id, content, depth)
    }
}

fn build_node(id: Identifier, content: &[u8], depth: usize) -> Result<BerNode> {
    if id.class != TagClass::Universal {
        let content = if id.constructed {
            TaggedContent::Constructed(decode_children(content, depth)?)
        } else {
            TaggedContent::Primitive(content.to_vec())
        };
        return Ok(BerNode::Tagged(Tagged {
            class: id.class,
            number: id.number,
            content,
        }));
    }

    let expect_primitive = |name: &str| -> Result<()> {
        if id.constructed {
            return Err(LdapError::InvalidEncoding(format!("{} must be primitive", name)));
        }
        Ok(())
    };

    match id.number {
        universal::BOOLEAN => {
            expect_primitive("BOOLEAN")?;
            if content.len() != 1 {
                return Err(LdapError::InvalidEncoding(format!(
                    "BOOLEAN value must be 1 byte, got: {}",
                    content.len()
                )));
            }
            Ok(BerNode::Boolean(content[0] != 0))
        }
        universal::INTEGER => {
            expect_primitive("INTEGER")?;
            Ok(BerNode::Integer(parse_integer(content)?))
        }
        universal::ENUMERATED => {
            expect_primitive("ENUMERATED")?;
            Ok(BerNode::Enumerated(parse_integer(content)?))
        }
        universal::OCTET_STRING => {
            // LDAP only permits the primitive form of strings
            expect_primitive("OCTET STRING")?;
            Ok(BerNode::OctetString(content.to_vec()))
        }
        universal::NULL => {
            expect_primitive("NULL")?;
            if !content.is_empty() {
                return Err(LdapError::InvalidEncoding(format!(
                    "NULL must have empty content, got {} bytes",
                    content.len()
                )));
            }
            Ok(BerNode::Null)
        }
        universal::SEQUENCE => {
            if !id.constructed {
                return Err(LdapError::InvalidEncoding("SEQUENCE must be constructed".to_string()));
            }
            Ok(BerNode::Sequence(decode_children(content, depth)?))
        }
        number => {
            let content = if id.constructed {
                TaggedContent::Constructed(decode_children(content, depth)?)
            } else {
                TaggedContent::Primitive(content.to_vec())
            };
            Ok(BerNode::Tagged(Tagged {
                class: TagClass::Universal,
                number,
                content,
            }))
        }
    }
}

fn decode_children(content: &[u8], depth: usize) -> Result<Vec<BerNode>> {
    if depth == 0 {
        return Err(LdapError::InvalidEncoding("constructed values nested too deeply".to_string()));
    }
    let mut reader = BerReader::new(content);
    let mut children = Vec::new();
    while reader.remaining() > 0 {
        let budget = reader.remaining();
        children.push(reader.read_node(budget, depth - 1)?);
    }
    Ok(children)
}

/// Identifier and length octets at the start of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub identifier: Identifier,
    pub header_len: usize,
    pub content_len: usize,
}

impl Header {
    pub fn total_len(&self) -> usize {
        self.header_len + self.content_len
    }
}

/// Read only the identifier and length of the value at the start of `source`.
/// The content may be partially or entirely absent.
pub fn read_header(source: &[u8]) -> Result<Header> {
    let mut reader = BerReader::new(source);
    let identifier = reader.read_identifier()?;
    let content_len = reader.read_length()?;
    Ok(Header {
        identifier,
        header_len: reader.position(),
        content_len,
    })
}

/// Schema-free decoder. Carries the nesting limit from `CodecConfig`.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    max_depth: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::from_config(&CodecConfig::default())
    }
}

impl Decoder {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn from_config(config: &CodecConfig) -> Self {
        Self::new(config.max_depth)
    }

    /// Decode the first value in `source`, consuming at most `max_bytes`.
    /// Returns the value and the number of bytes it occupied.
    pub fn decode(&self, source: &[u8], max_bytes: usize) -> Result<(BerNode, usize)> {
        let mut reader = BerReader::new(source);
        let node = reader.read_node(max_bytes, self.max_depth)?;
        Ok((node, reader.position()))
    }

    /// Decode a value that must span all of `source`.
    pub fn decode_exact(&self, source: &[u8]) -> Result<BerNode> {
        let (node, consumed) = self.decode(source, source.len())?;
        if consumed != source.len() {
            return Err(LdapError::TruncatedData(format!(
                "{} bytes left over after value",
                source.len() - consumed
            )));
        }
        Ok(node)
    }

    /// Decode a bare concatenation of values with no enclosing tag.
    pub fn decode_all(&self, source: &[u8]) -> Result<Vec<BerNode>> {
        let mut reader = BerReader::new(source);
        let mut nodes = Vec::new();
        while reader.remaining() > 0 {
            let budget = reader.remaining();
            nodes.push(reader.read_node(budget, self.max_depth)?);
        }
        Ok(nodes)
    }
}

pub fn decode(source: &[u8], max_bytes: usize) -> Result<(BerNode, usize)> {
    Decoder::default().decode(source, max_bytes)
}

pub fn decode_exact(source: &[u8]) -> Result<BerNode> {
    Decoder::default().decode_exact(source)
}

pub fn decode_all(source: &[u8]) -> Result<Vec<BerNode>> {
    Decoder::default().decode_all(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(node: &BerNode) -> BerNode {
        let bytes = node.to_vec();
        let (decoded, consumed) = decode(&bytes, bytes.len()).unwrap();
        assert_eq!(consumed, bytes.len());
        decoded
    }

    #[test]
    fn test_integer_minimal_encoding() {
        assert_eq!(BerNode::Integer(0).to_vec(), vec![0x02, 0x01, 0x00]);
        assert_eq!(BerNode::Integer(127).to_vec(), vec![0x02, 0x01, 0x7F]);
        assert_eq!(BerNode::Integer(128).to_vec(), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(BerNode::Integer(256).to_vec(), vec![0x02, 0x02, 0x01, 0x00]);
        assert_eq!(BerNode::Integer(-1).to_vec(), vec![0x02, 0x01, 0xFF]);
        assert_eq!(BerNode::Integer(-128).to_vec(), vec![0x02, 0x01, 0x80]);
        assert_eq!(BerNode::Integer(-129).to_vec(), vec![0x02, 0x02, 0xFF, 0x7F]);
        assert_eq!(
            BerNode::Integer(i64::MIN).to_vec(),
            vec![0x02, 0x08, 0x80, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_integer_extremes_round_trip() {
        for value in [i64::MIN, i64::MIN + 1, -65536, -1, 0, 1, 65535, i64::MAX] {
            assert_eq!(round_trip(&BerNode::Integer(value)), BerNode::Integer(value));
            assert_eq!(round_trip(&BerNode::Enumerated(value)), BerNode::Enumerated(value));
        }
    }

    #[test]
    fn test_redundant_integer_byte_rejected() {
        let err = decode(&[0x02, 0x02, 0x00, 0x7F], 4).unwrap_err();
        assert!(matches!(err, LdapError::InvalidEncoding(_)));
        let err = decode(&[0x02, 0x02, 0xFF, 0x80], 4).unwrap_err();
        assert!(matches!(err, LdapError::InvalidEncoding(_)));
        let err = decode(&[0x02, 0x00], 2).unwrap_err();
        assert!(matches!(err, LdapError::InvalidEncoding(_)));
    }

    #[test]
    fn test_boolean_and_null() {
        assert_eq!(BerNode::Boolean(true).to_vec(), vec![0x01, 0x01, 0xFF]);
        assert_eq!(BerNode::Boolean(false).to_vec(), vec![0x01, 0x01, 0x00]);
        assert_eq!(BerNode::Null.to_vec(), vec![0x05, 0x00]);
        // Any non-zero octet is TRUE in BER
        assert_eq!(decode(&[0x01, 0x01, 0x01], 3).unwrap().0, BerNode::Boolean(true));
        assert!(matches!(decode(&[0x05, 0x01, 0x00], 3), Err(LdapError::InvalidEncoding(_))));
        assert!(matches!(decode(&[0x01, 0x02, 0x00, 0x00], 4), Err(LdapError::InvalidEncoding(_))));
    }

    #[test]
    fn test_empty_values_stay_empty() {
        assert_eq!(BerNode::OctetString(vec![]).to_vec(), vec![0x04, 0x00]);
        assert_eq!(BerNode::Sequence(vec![]).to_vec(), vec![0x30, 0x00]);
        assert_eq!(round_trip(&BerNode::OctetString(vec![])), BerNode::OctetString(vec![]));
        assert_eq!(round_trip(&BerNode::Sequence(vec![])), BerNode::Sequence(vec![]));
    }

    #[test]
    fn test_long_form_length() {
        let node = BerNode::OctetString(vec![0xAB; 200]);
        let bytes = node.to_vec();
        assert_eq!(&bytes[..3], &[0x04, 0x81, 0xC8]);
        assert_eq!(bytes.len(), 203);

        let node = BerNode::OctetString(vec![0x00; 300]);
        let bytes = node.to_vec();
        assert_eq!(&bytes[..4], &[0x04, 0x82, 0x01, 0x2C]);
        assert_eq!(round_trip(&node), node);
    }

    #[test]
    fn test_indefinite_length_rejected() {
        let err = decode(&[0x30, 0x80, 0x00, 0x00], 4).unwrap_err();
        assert!(matches!(err, LdapError::MalformedLength(_)));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let err = decode(&[0x04, 0x85, 0x01, 0x00, 0x00, 0x00, 0x00], 7).unwrap_err();
        assert!(matches!(err, LdapError::MalformedLength(_)));
        let err = decode(&[0x04, 0x84, 0x80, 0x00, 0x00, 0x00], 6).unwrap_err();
        assert!(matches!(err, LdapError::MalformedLength(_)));
    }

    #[test]
    fn test_budget_smaller_than_value() {
        // Bytes are all there, but the caller only allows 3
        let bytes = BerNode::string("hello").to_vec();
        let err = decode(&bytes, 3).unwrap_err();
        assert!(matches!(err, LdapError::MalformedLength(_)));
    }

    #[test]
    fn test_truncated_value() {
        let bytes = vec![0x04, 0x05, b'h', b'e', b'l'];
        let err = decode(&bytes, bytes.len()).unwrap_err();
        assert!(matches!(err, LdapError::TruncatedData(_)));
        assert!(matches!(decode(&[], 0), Err(LdapError::TruncatedData(_))));
        assert!(matches!(decode(&[0x30], 1), Err(LdapError::TruncatedData(_))));
        assert!(matches!(decode(&[0x04, 0x82, 0x01], 3), Err(LdapError::TruncatedData(_))));
    }

    #[test]
    fn test_child_overrun_is_truncation() {
        // SEQUENCE of 3 bytes whose child claims 5
        let bytes = vec![0x30, 0x03, 0x04, 0x05, 0x61];
        let err = decode(&bytes, bytes.len()).unwrap_err();
        assert!(matches!(err, LdapError::TruncatedData(_)));
    }

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let mut bytes = BerNode::Integer(42).to_vec();
        bytes.extend_from_slice(&[0xDE, 0xAD]);
        let (node, consumed) = decode(&bytes, bytes.len()).unwrap();
        assert_eq!(node, BerNode::Integer(42));
        assert_eq!(consumed, 3);
        assert!(matches!(decode_exact(&bytes), Err(LdapError::TruncatedData(_))));
    }

    #[test]
    fn test_high_tag_number() {
        let node = BerNode::context_primitive(31, vec![0x01]);
        assert_eq!(node.to_vec(), vec![0x9F, 0x1F, 0x01, 0x01]);
        let node = BerNode::context_primitive(200, vec![]);
        assert_eq!(node.to_vec(), vec![0x9F, 0x81, 0x48, 0x00]);
        assert_eq!(round_trip(&node), node);
    }

    #[test]
    fn test_non_minimal_high_tag_rejected() {
        assert!(matches!(decode(&[0x9F, 0x80, 0x20, 0x00], 4), Err(LdapError::InvalidEncoding(_))));
        assert!(matches!(decode(&[0x9F, 0x05, 0x00], 3), Err(LdapError::InvalidEncoding(_))));
    }

    #[test]
    fn test_tagged_is_not_interpreted() {
        // [3] constructed holding two strings; the codec does not guess what it is
        let bytes = vec![0xA3, 0x06, 0x04, 0x01, b'a', 0x04, 0x01, b'b'];
        let node = decode_exact(&bytes).unwrap();
        let tagged = node.as_tagged().unwrap();
        assert_eq!(tagged.identifier(), Identifier::context(3, true));
        assert_eq!(
            tagged.children().unwrap(),
            &[BerNode::string("a"), BerNode::string("b")]
        );
    }

    #[test]
    fn test_unmodelled_universal_type_kept() {
        // OBJECT IDENTIFIER 1.2.840
        let bytes = vec![0x06, 0x03, 0x2A, 0x86, 0x48];
        let node = decode_exact(&bytes).unwrap();
        assert_eq!(node.identifier(), Identifier::universal(6, false));
        assert_eq!(node.to_vec(), bytes);
    }

    #[test]
    fn test_tagged_rejects_universal_types_with_own_variant() {
        for number in [
            universal::BOOLEAN,
            universal::INTEGER,
            universal::OCTET_STRING,
            universal::NULL,
            universal::ENUMERATED,
            universal::SEQUENCE,
        ] {
            let result = Tagged::new(TagClass::Universal, number, TaggedContent::Primitive(b"x".to_vec()));
            assert!(matches!(result, Err(LdapError::InvalidParameter(_))), "tag {}", number);
        }
        // Same numbers are fine outside the universal class
        let tagged = Tagged::new(TagClass::Context, universal::OCTET_STRING, TaggedContent::Primitive(vec![])).unwrap();
        assert_eq!(tagged.identifier(), Identifier::context(4, false));

        let oid = Tagged::new(TagClass::Universal, 6, TaggedContent::Primitive(vec![0x2A, 0x86, 0x48])).unwrap();
        let node = BerNode::Tagged(oid);
        assert_eq!(round_trip(&node), node);
    }

    #[test]
    fn test_constructed_octet_string_rejected() {
        let bytes = vec![0x24, 0x03, 0x04, 0x01, b'a'];
        assert!(matches!(decode_exact(&bytes), Err(LdapError::InvalidEncoding(_))));
    }

    #[test]
    fn test_depth_limit() {
        let mut node = BerNode::Null;
        for _ in 0..5 {
            node = BerNode::Sequence(vec![node]);
        }
        let bytes = node.to_vec();
        assert_eq!(Decoder::new(5).decode_exact(&bytes).unwrap(), node);
        assert!(matches!(Decoder::new(4).decode_exact(&bytes), Err(LdapError::InvalidEncoding(_))));
    }

    #[test]
    fn test_decode_all_bare_concatenation() {
        let mut bytes = BerNode::string("cn=x").to_vec();
        bytes.extend(BerNode::Integer(7).to_vec());
        let nodes = decode_all(&bytes).unwrap();
        assert_eq!(nodes, vec![BerNode::string("cn=x"), BerNode::Integer(7)]);
        assert!(decode_all(&[]).unwrap().is_empty());
        bytes.pop();
        assert!(matches!(decode_all(&bytes), Err(LdapError::TruncatedData(_))));
    }

    #[test]
    fn test_read_header_without_content() {
        let header = read_header(&[0x30, 0x82, 0x01, 0x00]).unwrap();
        assert_eq!(header.identifier, Identifier::universal(universal::SEQUENCE, true));
        assert_eq!(header.header_len, 4);
        assert_eq!(header.content_len, 256);
        assert_eq!(header.total_len(), 260);
        assert!(matches!(read_header(&[0x30, 0x82, 0x01]), Err(LdapError::TruncatedData(_))));
    }

    #[test]
    fn test_encode_into_bufmut() {
        let mut sink = bytes::BytesMut::new();
        encode(&BerNode::Sequence(vec![BerNode::Integer(42)]), &mut sink);
        assert_eq!(&sink[..], &[0x30, 0x03, 0x02, 0x01, 0x2A]);
    }

    fn arb_tag() -> impl Strategy<Value = (TagClass, u32)> {
        prop_oneof![
            (
                prop_oneof![
                    Just(TagClass::Application),
                    Just(TagClass::Context),
                    Just(TagClass::Private),
                ],
                0u32..5000,
            ),
            (0u32..5000)
                .prop_filter("has its own variant", |n| !has_dedicated_variant(*n))
                .prop_map(|n| (TagClass::Universal, n)),
        ]
    }

    fn arb_node() -> impl Strategy<Value = BerNode> {
        let leaf = prop_oneof![
            any::<bool>().prop_map(BerNode::Boolean),
            any::<i64>().prop_map(BerNode::Integer),
            any::<i64>().prop_map(BerNode::Enumerated),
            proptest::collection::vec(any::<u8>(), 0..200).prop_map(BerNode::OctetString),
            Just(BerNode::Null),
            (arb_tag(), proptest::collection::vec(any::<u8>(), 0..16)).prop_map(|((class, number), bytes)| {
                BerNode::Tagged(Tagged::new(class, number, TaggedContent::Primitive(bytes)).unwrap())
            }),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..8).prop_map(BerNode::Sequence),
                (arb_tag(), proptest::collection::vec(inner, 0..4)).prop_map(|((class, number), children)| {
                    BerNode::Tagged(Tagged::new(class, number, TaggedContent::Constructed(children)).unwrap())
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip(node in arb_node()) {
            let bytes = node.to_vec();
            let (decoded, consumed) = decode(&bytes, bytes.len()).unwrap();
            prop_assert_eq!(consumed, bytes.len());
            prop_assert_eq!(decoded, node);
        }

        #[test]
        fn prop_truncation_rejected(node in arb_node()) {
            let bytes = node.to_vec();
            let cut = &bytes[..bytes.len() - 1];
            let result = decode(cut, cut.len());
            prop_assert!(matches!(result, Err(LdapError::TruncatedData(_))));
        }

        #[test]
        fn prop_encoding_is_deterministic(node in arb_node()) {
            prop_assert_eq!(node.to_vec(), node.clone().to_vec());
        }
    }
}
