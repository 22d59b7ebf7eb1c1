// Typed failures for the BER codec and the LDAP schema layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LdapError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LdapError {
    /// Declared length does not fit the allowed budget, or indefinite form was used.
    #[error("malformed length: {0}")]
    MalformedLength(String),

    /// Fewer bytes available than a construct's declared length requires.
    #[error("truncated data: {0}")]
    TruncatedData(String),

    /// Content octets violate BER (or the minimal forms this crate requires).
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// A required field is absent or has the wrong shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The envelope parsed, but its operation tag is unknown. The message id is kept for correlation.
    #[error("unsupported operation [APPLICATION {tag}] in message {message_id}")]
    UnsupportedOperation { message_id: i32, tag: u32 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl LdapError {
    pub(crate) fn truncated(need: usize, remaining: usize, what: &str) -> Self {
        LdapError::TruncatedData(format!("{} needs {} bytes, {} remaining", what, need, remaining))
    }

    /// Message id carried by the error, if the envelope got far enough to recover one.
    pub fn message_id(&self) -> Option<i32> {
        match self {
            LdapError::UnsupportedOperation { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_operation_keeps_message_id() {
        let err = LdapError::UnsupportedOperation { message_id: 42, tag: 3 };
        assert_eq!(err.message_id(), Some(42));
        assert_eq!(err.to_string(), "unsupported operation [APPLICATION 3] in message 42");
    }

    #[test]
    fn test_truncated_message() {
        let err = LdapError::truncated(5, 2, "octet string");
        assert_eq!(err, LdapError::TruncatedData("octet string needs 5 bytes, 2 remaining".to_string()));
        assert_eq!(err.message_id(), None);
    }
}
