pub mod types;

pub use types::{ConfigError, DecodeError, ReplayError, SessionError, TrackerError};
