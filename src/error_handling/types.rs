use std::fmt;
use std::io;

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(String),
    JsonError(String),
    TrackersEmpty,
    UnknownProtocol(String),
    DuplicatePort(u16),
    InvalidPort(u16),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::JsonError(e) => write!(f, "JSON parsing error: {}", e),
            ConfigError::TrackersEmpty => write!(f, "No protocol tracker configured"),
            ConfigError::UnknownProtocol(p) => write!(f, "Unknown protocol: {}", p),
            ConfigError::DuplicatePort(p) => write!(f, "Port {} is configured twice", p),
            ConfigError::InvalidPort(p) => write!(f, "Invalid server port: {}", p),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failure to produce one logical message from a direction's byte stream.
///
/// `Eof` is the distinguished end-of-stream condition: the decode loop treats
/// it as a graceful close rather than as a failure.
#[derive(Debug)]
pub enum DecodeError {
    Eof,
    Truncated,
    Io(io::Error),
    UnsupportedClientProtocol,
    TlsRequested,
    Malformed(String),
    Http(String),
}

impl DecodeError {
    pub fn is_eof(&self) -> bool {
        matches!(self, DecodeError::Eof)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Eof => write!(f, "end of stream"),
            DecodeError::Truncated => write!(f, "stream ended inside a frame"),
            DecodeError::Io(e) => write!(f, "stream read error: {}", e),
            DecodeError::UnsupportedClientProtocol => write!(f, "unsupported client protocol"),
            DecodeError::TlsRequested => {
                write!(f, "client requested TLS, session cannot be decoded")
            }
            DecodeError::Malformed(e) => write!(f, "malformed packet: {}", e),
            DecodeError::Http(e) => write!(f, "HTTP parse error: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => DecodeError::Truncated,
            _ => DecodeError::Io(err),
        }
    }
}

#[derive(Debug)]
pub enum TrackerError {
    MissingRequest,
    Rejected(String),
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::MissingRequest => write!(f, "response without a tracked request"),
            TrackerError::Rejected(e) => write!(f, "message rejected: {}", e),
        }
    }
}

impl std::error::Error for TrackerError {}

#[derive(Debug)]
pub enum SessionError {
    UnregisteredPort(u16),
    DuplicatePort(u16),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnregisteredPort(p) => {
                write!(f, "No protocol tracker registered for server port {}", p)
            }
            SessionError::DuplicatePort(p) => {
                write!(f, "A protocol tracker is already registered for port {}", p)
            }
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Debug)]
pub enum ReplayError {
    IoError(io::Error),
    SessionError(SessionError),
    InvalidPattern(String),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::IoError(e) => write!(f, "Flow directory error: {}", e),
            ReplayError::SessionError(e) => write!(f, "Session error: {}", e),
            ReplayError::InvalidPattern(e) => write!(f, "Invalid flow name pattern: {}", e),
        }
    }
}

impl std::error::Error for ReplayError {}

impl From<io::Error> for ReplayError {
    fn from(err: io::Error) -> Self {
        ReplayError::IoError(err)
    }
}

impl From<SessionError> for ReplayError {
    fn from(err: SessionError) -> Self {
        ReplayError::SessionError(err)
    }
}
