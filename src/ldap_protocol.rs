// LDAP message envelope and protocol operations on top of the BER value tree
// Grammar follows RFC 2251 section 4

use crate::ber::{self, universal, BerNode, Decoder, Identifier, TagClass, Tagged, TaggedContent};
use crate::config::CodecConfig;
use crate::error::{LdapError, Result};
use bytes::BufMut;
use tracing::debug;

// [APPLICATION n] numbers of the supported protocol operations
pub const LDAP_TAG_EXTENDED_REQUEST: u32 = 23;
pub const LDAP_TAG_EXTENDED_RESPONSE: u32 = 24;
pub const LDAP_TAG_INTERMEDIATE_RESPONSE: u32 = 25;

/// Context tag of `referral` in LDAPResult. Tags 0-9 are reserved for LDAPResult.
pub const LDAP_CONTEXT_REFERRAL: u32 = 3;
pub const LDAP_CONTEXT_REQUEST_NAME: u32 = 0;
pub const LDAP_CONTEXT_REQUEST_VALUE: u32 = 1;
pub const LDAP_CONTEXT_RESPONSE_NAME: u32 = 10;
pub const LDAP_CONTEXT_RESPONSE: u32 = 11;
pub const LDAP_CONTEXT_INTERMEDIATE_NAME: u32 = 0;
pub const LDAP_CONTEXT_INTERMEDIATE_VALUE: u32 = 1;
/// Context [0] IMPLICIT SEQUENCE OF Control
pub const LDAP_CONTEXT_CONTROLS: u32 = 0;

// LDAP Control (request or response)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub control_type: String,
    pub criticality: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn to_ber(&self) -> BerNode {
        let mut fields = vec![BerNode::string(&self.control_type)];
        // criticality is DEFAULT FALSE, so only TRUE goes on the wire
        if self.criticality {
            fields.push(BerNode::Boolean(true));
        }
        if let Some(ref value) = self.value {
            fields.push(BerNode::OctetString(value.clone()));
        }
        BerNode::Sequence(fields)
    }

    /// Control ::= SEQUENCE { controlType, criticality BOOLEAN DEFAULT FALSE, controlValue OCTET STRING OPTIONAL }
    pub fn from_ber(node: &BerNode) -> Result<Self> {
        let fields = node
            .as_sequence()
            .ok_or_else(|| malformed("Control must be a SEQUENCE"))?;
        let (type_node, rest) = fields
            .split_first()
            .ok_or_else(|| malformed("Control is missing controlType"))?;
        let control_type = ldap_string(type_node, "controlType")?;

        let mut idx = 0;
        let mut criticality = false;
        if let Some(b) = rest.first().and_then(BerNode::as_boolean) {
            criticality = b;
            idx = 1;
        }
        let value = match rest.get(idx) {
            Some(node) => {
                idx += 1;
                Some(
                    node.as_octet_string()
                        .ok_or_else(|| malformed("controlValue must be an OCTET STRING"))?
                        .to_vec(),
                )
            }
            None => None,
        };
        if rest.len() > idx {
            return Err(malformed("Control has unexpected trailing elements"));
        }
        Ok(Control {
            control_type,
            criticality,
            value,
        })
    }
}

/// LDAPResult components shared by every result-bearing response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LdapResult {
    pub result_code: i32,
    pub matched_dn: String,
    pub error_message: String,
    pub referral: Option<Vec<String>>,
}

impl LdapResult {
    pub fn new(result_code: i32, matched_dn: &str, error_message: &str) -> Self {
        Self {
            result_code,
            matched_dn: matched_dn.to_string(),
            error_message: error_message.to_string(),
            referral: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }

    fn push_fields(&self, fields: &mut Vec<BerNode>) {
        fields.push(BerNode::Enumerated(i64::from(self.result_code)));
        fields.push(BerNode::string(&self.matched_dn));
        fields.push(BerNode::string(&self.error_message));
        if let Some(ref urls) = self.referral {
            let urls = urls.iter().map(|u| BerNode::string(u)).collect();
            fields.push(BerNode::context_constructed(LDAP_CONTEXT_REFERRAL, urls));
        }
    }

    /// Reads the three positional fields. The optional suffix is left to the caller.
    fn from_prefix(children: &[BerNode]) -> Result<Self> {
        if children.len() < 3 {
            return Err(malformed(&format!(
                "LDAPResult needs 3 leading fields, got {}",
                children.len()
            )));
        }
        let code = children[0]
            .as_enumerated()
            .ok_or_else(|| malformed("resultCode must be ENUMERATED"))?;
        let result_code =
            i32::try_from(code).map_err(|_| malformed(&format!("resultCode {} out of range", code)))?;
        Ok(LdapResult {
            result_code,
            matched_dn: ldap_string(&children[1], "matchedDN")?,
            error_message: ldap_string(&children[2], "errorMessage")?,
            referral: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    pub request_name: String,
    pub request_value: Option<Vec<u8>>,
}

impl ExtendedRequest {
    pub fn new(request_name: &str, request_value: Option<Vec<u8>>) -> Result<Self> {
        if !is_valid_oid(request_name) {
            return Err(LdapError::InvalidParameter(format!(
                "extended request name {:?} is not a dotted-decimal OID",
                request_name
            )));
        }
        Ok(Self {
            request_name: request_name.to_string(),
            request_value,
        })
    }

    /// ExtendedRequest ::= [APPLICATION 23] SEQUENCE { requestName [0] LDAPOID, requestValue [1] OCTET STRING OPTIONAL }
    pub fn to_ber(&self) -> BerNode {
        let mut fields = vec![BerNode::context_primitive(
            LDAP_CONTEXT_REQUEST_NAME,
            self.request_name.as_bytes().to_vec(),
        )];
        if let Some(ref value) = self.request_value {
            fields.push(BerNode::context_primitive(LDAP_CONTEXT_REQUEST_VALUE, value.clone()));
        }
        BerNode::application_constructed(LDAP_TAG_EXTENDED_REQUEST, fields)
    }

    fn from_children(children: &[BerNode]) -> Result<Self> {
        let name_node = children
            .first()
            .ok_or_else(|| malformed("ExtendedRequest is missing requestName"))?;
        let name = string_field(name_node, LDAP_CONTEXT_REQUEST_NAME)
            .ok_or_else(|| malformed("requestName must be [0] or OCTET STRING"))?;
        let request_name = utf8(name.to_vec(), "requestName")?;
        let request_value = match children.get(1) {
            Some(node) => Some(
                string_field(node, LDAP_CONTEXT_REQUEST_VALUE)
                    .ok_or_else(|| malformed("requestValue must be [1] or OCTET STRING"))?
                    .to_vec(),
            ),
            None => None,
        };
        Ok(ExtendedRequest {
            request_name,
            request_value,
        })
    }
}

/// ExtendedResponse ::= [APPLICATION 24] SEQUENCE {
///     COMPONENTS OF LDAPResult,
///     responseName [10] LDAPOID OPTIONAL,
///     response     [11] OCTET STRING OPTIONAL }
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub response_name: Option<String>,
    /// Opaque bytes; interpreting them is the extension registry's job.
    pub response: Option<Vec<u8>>,
}

impl ExtendedResponse {
    pub fn new(result: LdapResult) -> Self {
        Self {
            result,
            response_name: None,
            response: None,
        }
    }

    pub fn with_response(mut self, response_name: &str, response: Option<Vec<u8>>) -> Self {
        self.response_name = Some(response_name.to_string());
        self.response = response;
        self
    }

    pub fn to_ber(&self) -> BerNode {
        let mut fields = Vec::with_capacity(6);
        self.result.push_fields(&mut fields);
        if let Some(ref name) = self.response_name {
            fields.push(BerNode::context_primitive(LDAP_CONTEXT_RESPONSE_NAME, name.as_bytes().to_vec()));
        }
        if let Some(ref response) = self.response {
            fields.push(BerNode::context_primitive(LDAP_CONTEXT_RESPONSE, response.clone()));
        }
        BerNode::application_constructed(LDAP_TAG_EXTENDED_RESPONSE, fields)
    }

    /// Positions 0-2 are fixed; everything after is matched by context tag, in any order.
    fn from_children(children: &[BerNode]) -> Result<Self> {
        let mut result = LdapResult::from_prefix(children)?;
        let mut response_name = None;
        let mut response = None;

        for child in &children[3..] {
            let Some(tagged) = child.as_tagged().filter(|t| t.class() == TagClass::Context) else {
                debug!("Ignoring non-context element {:?} in extended response", child.identifier());
                continue;
            };
            match tagged.number() {
                LDAP_CONTEXT_REFERRAL => set_once(&mut result.referral, decode_referral(tagged)?, "referral")?,
                LDAP_CONTEXT_RESPONSE_NAME => {
                    let bytes = tagged
                        .bytes()
                        .ok_or_else(|| malformed("responseName must be primitive"))?;
                    set_once(&mut response_name, utf8(bytes.to_vec(), "responseName")?, "responseName")?;
                }
                LDAP_CONTEXT_RESPONSE => {
                    let bytes = tagged
                        .bytes()
                        .ok_or_else(|| malformed("response must be primitive"))?;
                    set_once(&mut response, bytes.to_vec(), "response")?;
                }
                other => debug!("Ignoring unknown optional tag [{}] in extended response", other),
            }
        }

        Ok(ExtendedResponse {
            result,
            response_name,
            response,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntermediateResponse {
    pub response_name: Option<String>,
    pub response_value: Option<Vec<u8>>,
}

impl IntermediateResponse {
    /// IntermediateResponse ::= [APPLICATION 25] SEQUENCE { responseName [0] OPTIONAL, responseValue [1] OPTIONAL }
    pub fn to_ber(&self) -> BerNode {
        let mut fields = Vec::new();
        if let Some(ref name) = self.response_name {
            fields.push(BerNode::context_primitive(LDAP_CONTEXT_INTERMEDIATE_NAME, name.as_bytes().to_vec()));
        }
        if let Some(ref value) = self.response_value {
            fields.push(BerNode::context_primitive(LDAP_CONTEXT_INTERMEDIATE_VALUE, value.clone()));
        }
        BerNode::application_constructed(LDAP_TAG_INTERMEDIATE_RESPONSE, fields)
    }

    fn from_children(children: &[BerNode]) -> Result<Self> {
        let mut response = IntermediateResponse::default();
        for child in children {
            let Some(tagged) = child.as_tagged().filter(|t| t.class() == TagClass::Context) else {
                debug!("Ignoring non-context element {:?} in intermediate response", child.identifier());
                continue;
            };
            match (tagged.number(), tagged.bytes()) {
                (LDAP_CONTEXT_INTERMEDIATE_NAME, Some(bytes)) => set_once(
                    &mut response.response_name,
                    utf8(bytes.to_vec(), "responseName")?,
                    "responseName",
                )?,
                (LDAP_CONTEXT_INTERMEDIATE_VALUE, Some(bytes)) => {
                    set_once(&mut response.response_value, bytes.to_vec(), "responseValue")?
                }
                (LDAP_CONTEXT_INTERMEDIATE_NAME | LDAP_CONTEXT_INTERMEDIATE_VALUE, None) => {
                    return Err(malformed("intermediate response fields must be primitive"));
                }
                (other, _) => debug!("Ignoring unknown tag [{}] in intermediate response", other),
            }
        }
        Ok(response)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    ExtendedRequest(ExtendedRequest),
    ExtendedResponse(ExtendedResponse),
    IntermediateResponse(IntermediateResponse),
}

impl ProtocolOp {
    pub fn application_tag(&self) -> u32 {
        match self {
            ProtocolOp::ExtendedRequest(_) => LDAP_TAG_EXTENDED_REQUEST,
            ProtocolOp::ExtendedResponse(_) => LDAP_TAG_EXTENDED_RESPONSE,
            ProtocolOp::IntermediateResponse(_) => LDAP_TAG_INTERMEDIATE_RESPONSE,
        }
    }

    pub fn to_ber(&self) -> BerNode {
        match self {
            ProtocolOp::ExtendedRequest(req) => req.to_ber(),
            ProtocolOp::ExtendedResponse(resp) => resp.to_ber(),
            ProtocolOp::IntermediateResponse(resp) => resp.to_ber(),
        }
    }

    /// `message_id` is only used to label an `UnsupportedOperation` error.
    pub fn from_ber(message_id: i32, node: &BerNode) -> Result<Self> {
        let tagged = node
            .as_tagged()
            .filter(|t| t.class() == TagClass::Application)
            .ok_or_else(|| malformed("protocolOp must be APPLICATION-tagged"))?;
        let children = match tagged.number() {
            LDAP_TAG_EXTENDED_REQUEST | LDAP_TAG_EXTENDED_RESPONSE | LDAP_TAG_INTERMEDIATE_RESPONSE => tagged
                .children()
                .ok_or_else(|| malformed(&format!("[APPLICATION {}] must be constructed", tagged.number())))?,
            tag => return Err(LdapError::UnsupportedOperation { message_id, tag }),
        };
        match tagged.number() {
            LDAP_TAG_EXTENDED_REQUEST => Ok(ProtocolOp::ExtendedRequest(ExtendedRequest::from_children(children)?)),
            LDAP_TAG_EXTENDED_RESPONSE => Ok(ProtocolOp::ExtendedResponse(ExtendedResponse::from_children(children)?)),
            _ => Ok(ProtocolOp::IntermediateResponse(IntermediateResponse::from_children(children)?)),
        }
    }
}

// LDAP Message structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    pub message_id: i32,
    pub protocol_op: ProtocolOp,
    pub controls: Option<Vec<Control>>,
}

impl LdapMessage {
    pub fn new(message_id: i32, protocol_op: ProtocolOp) -> Self {
        Self {
            message_id,
            protocol_op,
            controls: None,
        }
    }

    /// LDAPMessage ::= SEQUENCE { messageID, protocolOp, controls [0] OPTIONAL }
    pub fn to_ber(&self) -> BerNode {
        let mut fields = vec![BerNode::Integer(i64::from(self.message_id)), self.protocol_op.to_ber()];
        if let Some(ref controls) = self.controls {
            let controls = controls.iter().map(Control::to_ber).collect();
            fields.push(BerNode::context_constructed(LDAP_CONTEXT_CONTROLS, controls));
        }
        BerNode::Sequence(fields)
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_ber().to_vec()
    }

    pub fn encode_into<B: BufMut>(&self, sink: &mut B) {
        ber::encode(&self.to_ber(), sink);
    }

    pub fn from_ber(node: &BerNode) -> Result<Self> {
        let fields = node
            .as_sequence()
            .ok_or_else(|| malformed("LDAPMessage must be a SEQUENCE"))?;
        if fields.len() < 2 {
            return Err(malformed("LDAPMessage needs messageID and protocolOp"));
        }
        let id = fields[0]
            .as_integer()
            .ok_or_else(|| malformed("messageID must be an INTEGER"))?;
        let message_id = i32::try_from(id).map_err(|_| malformed(&format!("messageID {} out of range", id)))?;
        let protocol_op = ProtocolOp::from_ber(message_id, &fields[1])?;

        let mut controls = None;
        for field in &fields[2..] {
            match field.as_tagged() {
                Some(tagged) if tagged.class() == TagClass::Context && tagged.number() == LDAP_CONTEXT_CONTROLS => {
                    let items = tagged
                        .children()
                        .ok_or_else(|| malformed("controls must be constructed"))?;
                    let parsed = items.iter().map(Control::from_ber).collect::<Result<Vec<_>>>()?;
                    set_once(&mut controls, parsed, "controls")?;
                }
                _ => debug!(
                    "Ignoring trailing element {:?} in message {}",
                    field.identifier(),
                    message_id
                ),
            }
        }

        Ok(LdapMessage {
            message_id,
            protocol_op,
            controls,
        })
    }

    /// Decode one message from `source`, consuming at most `max_bytes`.
    /// Returns the message and the bytes it occupied.
    pub fn decode(source: &[u8], max_bytes: usize) -> Result<(Self, usize)> {
        Self::decode_with(&Decoder::default(), source, max_bytes)
    }

    pub fn decode_with(decoder: &Decoder, source: &[u8], max_bytes: usize) -> Result<(Self, usize)> {
        let (node, consumed) = decoder.decode(source, max_bytes)?;
        Ok((Self::from_ber(&node)?, consumed))
    }

    /// Decode with the limits from `config`.
    pub fn decode_configured(config: &CodecConfig, source: &[u8]) -> Result<(Self, usize)> {
        let budget = source.len().min(config.max_message_size);
        Self::decode_with(&Decoder::from_config(config), source, budget)
    }
}

/// Parse only the LDAP message header (SEQUENCE, messageID, protocolOp tag).
/// Returns (message_id, application tag) for correlating a reply when the full parse fails.
pub fn parse_message_header(data: &[u8]) -> Result<(i32, u32)> {
    let outer = ber::read_header(data)?;
    if outer.identifier != Identifier::universal(universal::SEQUENCE, true) {
        return Err(malformed("LDAPMessage must be a SEQUENCE"));
    }
    let body = &data[outer.header_len..];
    let (id_node, consumed) = ber::decode(body, body.len())?;
    let id = id_node
        .as_integer()
        .ok_or_else(|| malformed("messageID must be an INTEGER"))?;
    let message_id = i32::try_from(id).map_err(|_| malformed(&format!("messageID {} out of range", id)))?;
    let op = ber::read_header(&body[consumed..])?;
    Ok((message_id, op.identifier.number))
}

/// Dotted-decimal with at least two arcs, e.g. "1.3.6.1.4.1.1466.20037".
pub fn is_valid_oid(oid: &str) -> bool {
    let mut arcs = 0;
    for arc in oid.split('.') {
        if arc.is_empty() || !arc.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        arcs += 1;
    }
    arcs >= 2
}

fn malformed(detail: &str) -> LdapError {
    LdapError::MalformedMessage(detail.to_string())
}

fn utf8(bytes: Vec<u8>, field: &str) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| malformed(&format!("{} is not valid UTF-8", field)))
}

fn ldap_string(node: &BerNode, field: &str) -> Result<String> {
    let bytes = node
        .as_octet_string()
        .ok_or_else(|| malformed(&format!("{} must be an OCTET STRING", field)))?;
    utf8(bytes.to_vec(), field)
}

/// Implicitly tagged string field: accepts `[number]` primitive or a plain OCTET STRING.
fn string_field(node: &BerNode, number: u32) -> Option<&[u8]> {
    match node {
        BerNode::OctetString(bytes) => Some(bytes),
        BerNode::Tagged(tagged) if tagged.class() == TagClass::Context && tagged.number() == number => tagged.bytes(),
        _ => None,
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &str) -> Result<()> {
    if slot.is_some() {
        return Err(malformed(&format!("duplicate {} field", field)));
    }
    *slot = Some(value);
    Ok(())
}

/// Referral ::= SEQUENCE OF LDAPURL. The constructed form carries the URLs directly;
/// a primitive [3] carries their encodings as raw content and is decoded again.
fn decode_referral(tagged: &Tagged) -> Result<Vec<String>> {
    let reparsed;
    let urls: &[BerNode] = match tagged.content() {
        TaggedContent::Constructed(children) => children,
        TaggedContent::Primitive(bytes) => {
            reparsed = ber::decode_all(bytes)?;
            &reparsed
        }
    };
    urls.iter().map(|url| ldap_string(url, "referral URL")).collect()
}
