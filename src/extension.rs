// Extended-operation registry: response OID -> decoder for the opaque `response` bytes
// Entries are never removed and the first registration for an OID wins

use crate::error::Result;
use crate::ldap_protocol::ExtendedResponse;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Typed value produced by a registered decoder.
pub trait ExtensionResponse: fmt::Debug + Send + Sync {
    /// OID the value was decoded for.
    fn response_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

pub type ResponseDecoder =
    Arc<dyn Fn(&ExtendedResponse) -> Result<Box<dyn ExtensionResponse>> + Send + Sync>;

/// Outcome of running an extended response through the registry.
#[derive(Debug)]
pub enum ResolvedResponse {
    Typed(Box<dyn ExtensionResponse>),
    /// No decoder for the response name (or no name at all); bytes are passed through as-is.
    Opaque(Option<Vec<u8>>),
}

impl ResolvedResponse {
    pub fn is_typed(&self) -> bool {
        matches!(self, ResolvedResponse::Typed(_))
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            ResolvedResponse::Typed(value) => value.as_any().downcast_ref::<T>(),
            ResolvedResponse::Opaque(_) => None,
        }
    }
}

/// Shared, thread-safe OID -> decoder table. Hand it (usually behind an `Arc`)
/// to whatever code resolves extended responses.
#[derive(Default)]
pub struct ExtensionRegistry {
    decoders: DashMap<String, ResponseDecoder>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the decoders shipped in this crate already present.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        crate::backup::register(&registry);
        registry
    }

    /// Add a decoder for `oid`. Returns false (and keeps the existing one) if the OID is taken.
    pub fn register<F>(&self, oid: &str, decoder: F) -> bool
    where
        F: Fn(&ExtendedResponse) -> Result<Box<dyn ExtensionResponse>> + Send + Sync + 'static,
    {
        match self.decoders.entry(oid.to_string()) {
            Entry::Occupied(_) => {
                debug!("Extension decoder for {} already registered, keeping the first", oid);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(decoder));
                debug!("Registered extension decoder for {}", oid);
                true
            }
        }
    }

    /// Exact OID match only.
    pub fn lookup(&self, oid: &str) -> Option<ResponseDecoder> {
        self.decoders.get(oid).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, oid: &str) -> bool {
        self.decoders.contains_key(oid)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode `response.response` with the decoder registered for `response.response_name`.
    /// An unknown or missing name is not an error.
    pub fn resolve(&self, response: &ExtendedResponse) -> Result<ResolvedResponse> {
        // The map guard is dropped before the decoder runs
        let decoder = response
            .response_name
            .as_deref()
            .and_then(|oid| self.lookup(oid));
        match decoder {
            Some(decode) => Ok(ResolvedResponse::Typed(decode(response)?)),
            None => Ok(ResolvedResponse::Opaque(response.response.clone())),
        }
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut oids: Vec<String> = self.decoders.iter().map(|e| e.key().clone()).collect();
        oids.sort();
        f.debug_struct("ExtensionRegistry").field("oids", &oids).finish()
    }
}
