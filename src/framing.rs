// Outer-PDU framing for a byte stream carrying LDAP messages
// The transport reads into a buffer and asks here whether a whole message has arrived

use crate::ber;
use crate::error::{LdapError, Result};
use bytes::BytesMut;
use tracing::{debug, warn};

/// Total length (tag + length octets + content) of the PDU at the front of `buf`.
/// `None` means the identifier or length octets are not all here yet.
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>> {
    match ber::read_header(buf) {
        Ok(header) => Ok(Some(header.total_len())),
        Err(LdapError::TruncatedData(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Split one complete PDU off the front of `buffer`. Returns `None` until enough bytes arrived.
/// A PDU declaring more than `max_message_size` bytes is rejected before it is buffered.
pub fn split_frame(buffer: &mut BytesMut, max_message_size: usize) -> Result<Option<BytesMut>> {
    let Some(total) = frame_length(buffer)? else {
        return Ok(None);
    };
    if total > max_message_size {
        warn!(
            "Declared LDAP message size {} exceeds limit {}",
            total, max_message_size
        );
        return Err(LdapError::MalformedLength(format!(
            "message of {} bytes exceeds the {} byte limit",
            total, max_message_size
        )));
    }
    if buffer.len() < total {
        return Ok(None);
    }
    debug!("Split {} byte LDAP message, {} bytes buffered after it", total, buffer.len() - total);
    Ok(Some(buffer.split_to(total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap_protocol::{ExtendedRequest, LdapMessage, ProtocolOp};

    fn sample_message(id: i32, value_len: usize) -> Vec<u8> {
        let request = ExtendedRequest::new("1.2.3", Some(vec![0x5A; value_len])).unwrap();
        LdapMessage::new(id, ProtocolOp::ExtendedRequest(request)).encode()
    }

    #[test]
    fn test_frame_length_short_form() {
        let bytes = sample_message(1, 4);
        assert_eq!(frame_length(&bytes).unwrap(), Some(bytes.len()));
        assert_eq!(frame_length(&bytes[..1]).unwrap(), None);
        assert_eq!(frame_length(&[]).unwrap(), None);
    }

    #[test]
    fn test_frame_length_long_form() {
        let bytes = sample_message(1, 300);
        assert_eq!(&bytes[..2], &[0x30, 0x82]);
        assert_eq!(frame_length(&bytes[..3]).unwrap(), None);
        assert_eq!(frame_length(&bytes[..4]).unwrap(), Some(bytes.len()));
    }

    #[test]
    fn test_frame_length_indefinite() {
        assert!(matches!(frame_length(&[0x30, 0x80]), Err(LdapError::MalformedLength(_))));
    }

    #[test]
    fn test_split_frame_sequence() {
        let first = sample_message(1, 10);
        let second = sample_message(2, 200);
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&first);
        buffer.extend_from_slice(&second[..5]);

        let frame = split_frame(&mut buffer, 1024).unwrap().unwrap();
        assert_eq!(&frame[..], &first[..]);
        assert!(split_frame(&mut buffer, 1024).unwrap().is_none());

        buffer.extend_from_slice(&second[5..]);
        let frame = split_frame(&mut buffer, 1024).unwrap().unwrap();
        assert!(buffer.is_empty());
        let (message, _) = LdapMessage::decode(&frame, frame.len()).unwrap();
        assert_eq!(message.message_id, 2);
    }

    #[test]
    fn test_split_frame_too_large() {
        let bytes = sample_message(1, 500);
        // Only the header is needed to reject it
        let mut buffer = BytesMut::from(&bytes[..4]);
        assert!(matches!(split_frame(&mut buffer, 256), Err(LdapError::MalformedLength(_))));
    }
}
