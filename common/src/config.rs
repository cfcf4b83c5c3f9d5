use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// 8 MiB, the largest chunk or frame accepted by default.
pub const DEFAULT_MAX_LEN: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Largest chunk `serialize` will produce and `deserialize` will accept
    pub max_chunk_len: usize,

    /// Register handlers for unknown types on first encounter. When off, only types
    /// registered up front can be serialized.
    pub lazy_type_registration: bool,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            max_chunk_len: DEFAULT_MAX_LEN,
            lazy_type_registration: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub serializer: SerializerConfig,

    /// Largest frame payload sent or accepted
    pub max_frame_len: usize,

    /// Host side: send the type dictionary as the first frame of every connection
    pub exchange_type_dictionary: bool,

    /// Read deadline for transports that support one. None blocks forever.
    pub read_timeout_ms: Option<u64>,
}

impl ChannelConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            serializer: SerializerConfig::default(),
            max_frame_len: DEFAULT_MAX_LEN,
            exchange_type_dictionary: true,
            read_timeout_ms: None,
        }
    }
}

/// Read a config struct from a JSON file. Missing keys take their defaults.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}
