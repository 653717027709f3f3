//! Records handed to the application once a message or exchange completes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::protocols::http::messages::{HttpRequest, HttpResponse};
use crate::tracker::types::ConnectionIdentity;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Emission {
    /// Literal SQL text of a MySQL COM_QUERY.
    Query {
        session: Uuid,
        connection: ConnectionIdentity,
        sql: String,
        captured_at: DateTime<Utc>,
    },
    /// A recorded HTTP request and the response that completed it.
    Exchange {
        session: Uuid,
        connection: ConnectionIdentity,
        request: HttpRequest,
        response: HttpResponse,
        captured_at: DateTime<Utc>,
    },
}

impl Emission {
    pub fn session(&self) -> Uuid {
        match self {
            Emission::Query { session, .. } | Emission::Exchange { session, .. } => *session,
        }
    }

    pub fn connection(&self) -> &ConnectionIdentity {
        match self {
            Emission::Query { connection, .. } | Emission::Exchange { connection, .. } => {
                connection
            }
        }
    }
}

/// Output callback contract.
pub trait OutputSink: Send + Sync {
    fn emit(&self, emission: Emission);
}

impl<F> OutputSink for F
where
    F: Fn(Emission) + Send + Sync,
{
    fn emit(&self, emission: Emission) {
        self(emission)
    }
}
