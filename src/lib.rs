pub mod backup;
pub mod ber;
pub mod config;
pub mod error;
pub mod extension;
pub mod framing;
pub mod ldap_protocol;

pub use ber::{BerNode, Decoder, Identifier, TagClass};
pub use config::CodecConfig;
pub use error::{LdapError, Result};
pub use extension::{ExtensionRegistry, ExtensionResponse, ResolvedResponse};
pub use ldap_protocol::{ExtendedRequest, ExtendedResponse, LdapMessage, LdapResult, ProtocolOp};
