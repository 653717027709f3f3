use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error_handling::types::ConfigError;

pub const DEFAULT_STREAM_BUFFER_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Protocols a port can be registered for.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Protocol {
    Mysql,
    Http,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Protocol::Mysql),
            "http" => Ok(Protocol::Http),
            _ => Err(ConfigError::UnknownProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Mysql => write!(f, "mysql"),
            Protocol::Http => write!(f, "http"),
        }
    }
}

/// Which HTTP exchanges are emitted, and how much of each body is kept.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Request methods to record; empty records every method.
    pub methods: Vec<String>,
    /// Request path prefixes to record; empty records every path.
    pub path_prefixes: Vec<String>,
    pub max_body_bytes: usize,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            methods: Vec::new(),
            path_prefixes: Vec::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// One listening port and the protocol spoken on it.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub port: u16,
    /// Protocol identifier, checked when the configuration is loaded.
    pub protocol: String,
    #[serde(default)]
    pub record: Option<RecordConfig>,
}

impl TrackerConfig {
    pub fn protocol(&self) -> Result<Protocol, ConfigError> {
        self.protocol.parse()
    }

    pub fn record(&self) -> RecordConfig {
        self.record.clone().unwrap_or_default()
    }
}
