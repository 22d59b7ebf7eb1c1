use serde::{Deserialize, Serialize};
use std::path::Path;
use std::fs;
use anyhow::{Context, Result};

/// Largest outer PDU accepted by default (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Limits applied while decoding untrusted bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Upper bound on one LDAP message including its tag and length octets.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// How many constructed values may nest inside each other.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl CodecConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read codec config {}", path.display()))?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: CodecConfig = serde_yaml::from_str(content).context("Invalid codec config")?;
        if config.max_message_size == 0 {
            anyhow::bail!("max_message_size must be greater than zero");
        }
        Ok(config)
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}
