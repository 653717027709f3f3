//! Protocol trackers.

/// HTTP/1.x request/response pairing.
pub mod http;
/// MySQL client/server protocol.
pub mod mysql;
