use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::types::*;
use crate::error_handling::types::ConfigError;

/// Runtime configuration loaded from a TOML or JSON file.
///
/// ```toml
/// min_client_port = 1024
///
/// [[trackers]]
/// port = 3306
/// protocol = "mysql"
///
/// [[trackers]]
/// port = 8080
/// protocol = "http"
/// record = { methods = ["POST"], path_prefixes = ["/api/"] }
/// ```
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Flows whose client port is below this value are ignored. 0 disables the filter.
    #[serde(default)]
    pub min_client_port: u16,

    /// Capacity of the in-memory pipe handed to live capture collaborators.
    #[serde(default = "default_stream_buffer_bytes")]
    pub stream_buffer_bytes: usize,

    pub trackers: Vec<TrackerConfig>,
}

fn default_stream_buffer_bytes() -> usize {
    DEFAULT_STREAM_BUFFER_BYTES
}

impl Config {
    /// Loads a configuration file. `.json` files are read as JSON, anything else as TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        info!(
            "Loaded {} tracker(s) from {}",
            config.trackers.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Config, ConfigError> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| ConfigError::JsonError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the session manager could not be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trackers.is_empty() {
            return Err(ConfigError::TrackersEmpty);
        }

        let mut ports = HashSet::new();
        for tracker in &self.trackers {
            if tracker.port == 0 {
                return Err(ConfigError::InvalidPort(tracker.port));
            }
            if !ports.insert(tracker.port) {
                return Err(ConfigError::DuplicatePort(tracker.port));
            }
            let protocol = tracker.protocol()?;
            if tracker.record.is_some() && protocol != Protocol::Http {
                warn!(
                    "record settings on {} port {} are ignored",
                    protocol, tracker.port
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE_TOML: &str = r#"
min_client_port = 1024

[[trackers]]
port = 3306
protocol = "mysql"

[[trackers]]
port = 8080
protocol = "http"
record = { methods = ["POST"], path_prefixes = ["/api/"], max_body_bytes = 512 }
"#;

    #[test]
    fn test_from_toml_str() {
        let config = Config::from_toml_str(SAMPLE_TOML).unwrap();

        assert_eq!(config.min_client_port, 1024);
        assert_eq!(config.stream_buffer_bytes, DEFAULT_STREAM_BUFFER_BYTES);
        assert_eq!(config.trackers.len(), 2);
        assert_eq!(config.trackers[0].protocol().unwrap(), Protocol::Mysql);
        assert_eq!(config.trackers[0].record(), RecordConfig::default());

        let record = config.trackers[1].record();
        assert_eq!(record.methods, vec!["POST".to_string()]);
        assert_eq!(record.max_body_bytes, 512);
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let mut json = NamedTempFile::with_suffix(".json").unwrap();
        write!(
            json,
            r#"{{"trackers": [{{"port": 3306, "protocol": "mysql"}}]}}"#
        )
        .unwrap();
        let config = Config::from_file(json.path()).unwrap();
        assert_eq!(config.min_client_port, 0);
        assert_eq!(config.trackers[0].port, 3306);

        let mut toml_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(toml_file, "{}", SAMPLE_TOML).unwrap();
        assert_eq!(Config::from_file(toml_file.path()).unwrap().trackers.len(), 2);
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            Config::from_file("/nonexistent/l7dump.toml"),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_protocol() {
        let err = Config::from_toml_str("[[trackers]]\nport = 6379\nprotocol = \"redis\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProtocol(p) if p == "redis"));
    }

    #[test]
    fn test_rejects_bad_tracker_lists() {
        assert!(matches!(
            Config::from_toml_str("trackers = []"),
            Err(ConfigError::TrackersEmpty)
        ));
        assert!(matches!(
            Config::from_json_str(
                r#"{"trackers": [{"port": 80, "protocol": "http"}, {"port": 80, "protocol": "mysql"}]}"#
            ),
            Err(ConfigError::DuplicatePort(80))
        ));
        assert!(matches!(
            Config::from_json_str(r#"{"trackers": [{"port": 0, "protocol": "http"}]}"#),
            Err(ConfigError::InvalidPort(0))
        ));
        assert!(matches!(
            Config::from_json_str("{"),
            Err(ConfigError::JsonError(_))
        ));
    }
}
