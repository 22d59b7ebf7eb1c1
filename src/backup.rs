//! Object backup extended operation (eDirectory).
//!
//! Both payloads are a bare concatenation of BER values with no enclosing
//! SEQUENCE, so they are not self-describing and field order matters.
//!
//! ```text
//! requestValue ::=
//!     objectDN        LDAPDN
//!     mts             INTEGER   -- modification timestamp
//!     revision        INTEGER
//!     passwd          OCTET STRING
//!
//! responseValue ::=
//!     bufferLength    INTEGER
//!     mts             INTEGER
//!     revision        INTEGER
//!     returnedBuffer  OCTET STRING
//! ```

use crate::ber::{self, BerNode};
use crate::error::{LdapError, Result};
use crate::extension::{ExtensionRegistry, ExtensionResponse};
use crate::ldap_protocol::{ExtendedRequest, ExtendedResponse, LdapResult};
use std::any::Any;

pub const BACKUP_REQUEST_OID: &str = "2.16.840.1.113719.1.27.100.96";
pub const BACKUP_RESPONSE_OID: &str = "2.16.840.1.113719.1.27.100.97";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    pub object_dn: String,
    pub mts: i32,
    pub revision: i32,
    pub passwd: Vec<u8>,
}

impl BackupRequest {
    /// `state_info` is `"<mts>+<revision>"`; without it both start at 0.
    /// A missing password is sent as an empty OCTET STRING.
    pub fn new(object_dn: &str, passwd: Option<&[u8]>, state_info: Option<&str>) -> Result<Self> {
        let (mts, revision) = match state_info {
            Some(state) => parse_state_info(state)?,
            None => (0, 0),
        };
        Ok(Self {
            object_dn: object_dn.to_string(),
            mts,
            revision,
            passwd: passwd.map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    pub fn state_info(&self) -> String {
        format!("{}+{}", self.mts, self.revision)
    }

    pub fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for node in [
            BerNode::string(&self.object_dn),
            BerNode::Integer(i64::from(self.mts)),
            BerNode::Integer(i64::from(self.revision)),
            BerNode::OctetString(self.passwd.clone()),
        ] {
            ber::encode(&node, &mut payload);
        }
        payload
    }

    pub fn to_extended(&self) -> ExtendedRequest {
        ExtendedRequest {
            request_name: BACKUP_REQUEST_OID.to_string(),
            request_value: Some(self.payload()),
        }
    }

    pub fn from_extended(request: &ExtendedRequest) -> Result<Self> {
        if request.request_name != BACKUP_REQUEST_OID {
            return Err(LdapError::InvalidParameter(format!(
                "{} is not a backup request",
                request.request_name
            )));
        }
        let payload = request
            .request_value
            .as_deref()
            .ok_or_else(|| LdapError::MalformedMessage("backup request has no value".to_string()))?;
        match ber::decode_all(payload)?.as_slice() {
            [BerNode::OctetString(dn), BerNode::Integer(mts), BerNode::Integer(revision), BerNode::OctetString(passwd)] => {
                Ok(Self {
                    object_dn: String::from_utf8(dn.clone())
                        .map_err(|_| LdapError::MalformedMessage("objectDN is not valid UTF-8".to_string()))?,
                    mts: narrow(*mts, "mts")?,
                    revision: narrow(*revision, "revision")?,
                    passwd: passwd.clone(),
                })
            }
            other => Err(LdapError::MalformedMessage(format!(
                "backup request value has unexpected shape ({} elements)",
                other.len()
            ))),
        }
    }
}

fn parse_state_info(state: &str) -> Result<(i32, i32)> {
    let (mts, revision) = state
        .trim()
        .split_once('+')
        .ok_or_else(|| LdapError::InvalidParameter(format!("state info {:?} lacks '+'", state)))?;
    let mts = mts
        .trim()
        .parse::<i32>()
        .map_err(|_| LdapError::InvalidParameter(format!("invalid modification timestamp {:?}", mts)))?;
    let revision = revision
        .trim()
        .parse::<i32>()
        .map_err(|_| LdapError::InvalidParameter(format!("invalid revision {:?}", revision)))?;
    Ok((mts, revision))
}

fn narrow(value: i64, field: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| LdapError::MalformedMessage(format!("{} {} out of range", field, value)))
}

/// Server reply to `BackupRequest`. Fields stay zero/empty when the server reports failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackupResponse {
    pub result_code: i32,
    pub buffer_length: i32,
    pub mts: i32,
    pub revision: i32,
    pub returned_buffer: Vec<u8>,
}

impl BackupResponse {
    pub fn new(mts: i32, revision: i32, returned_buffer: Vec<u8>) -> Result<Self> {
        let buffer_length = i32::try_from(returned_buffer.len())
            .map_err(|_| LdapError::InvalidParameter("backup buffer too large".to_string()))?;
        Ok(Self {
            result_code: 0,
            buffer_length,
            mts,
            revision,
            returned_buffer,
        })
    }

    pub fn state_info(&self) -> String {
        format!("{}+{}", self.mts, self.revision)
    }

    pub fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for node in [
            BerNode::Integer(i64::from(self.buffer_length)),
            BerNode::Integer(i64::from(self.mts)),
            BerNode::Integer(i64::from(self.revision)),
            BerNode::OctetString(self.returned_buffer.clone()),
        ] {
            ber::encode(&node, &mut payload);
        }
        payload
    }

    pub fn to_extended(&self) -> ExtendedResponse {
        let response = ExtendedResponse::new(LdapResult::new(self.result_code, "", ""));
        // A failed backup still names itself so the registry can type it
        let value = (self.result_code == 0).then(|| self.payload());
        response.with_response(BACKUP_RESPONSE_OID, value)
    }

    pub fn from_extended(response: &ExtendedResponse) -> Result<Self> {
        if !response.result.is_success() {
            return Ok(Self {
                result_code: response.result.result_code,
                ..Self::default()
            });
        }
        let payload = response
            .response
            .as_deref()
            .ok_or_else(|| LdapError::MalformedMessage("backup response has no value".to_string()))?;
        match ber::decode_all(payload)?.as_slice() {
            [BerNode::Integer(length), BerNode::Integer(mts), BerNode::Integer(revision), BerNode::OctetString(buffer)] => {
                let buffer_length = narrow(*length, "bufferLength")?;
                if usize::try_from(buffer_length).ok() != Some(buffer.len()) {
                    return Err(LdapError::MalformedMessage(format!(
                        "bufferLength {} does not match {} returned bytes",
                        buffer_length,
                        buffer.len()
                    )));
                }
                Ok(Self {
                    result_code: response.result.result_code,
                    buffer_length,
                    mts: narrow(*mts, "mts")?,
                    revision: narrow(*revision, "revision")?,
                    returned_buffer: buffer.clone(),
                })
            }
            other => Err(LdapError::MalformedMessage(format!(
                "backup response value has unexpected shape ({} elements)",
                other.len()
            ))),
        }
    }
}

impl ExtensionResponse for BackupResponse {
    fn response_name(&self) -> &str {
        BACKUP_RESPONSE_OID
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn decode_response(response: &ExtendedResponse) -> Result<Box<dyn ExtensionResponse>> {
    Ok(Box::new(BackupResponse::from_extended(response)?))
}

/// Make `registry` decode backup responses.
pub fn register(registry: &ExtensionRegistry) {
    registry.register(BACKUP_RESPONSE_OID, decode_response);
}
