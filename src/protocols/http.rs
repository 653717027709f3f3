//! HTTP/1.x tracking shell.
//!
//! Message syntax is delegated to `httparse`; this module frames bodies on the
//! byte stream and pairs each response with the oldest unanswered request.

pub mod messages;
pub mod tracker;

pub use messages::{HttpRequest, HttpResponse};
pub use tracker::{record_predicate, HttpConnection, HttpTracker, RecordPredicate};
