use std::sync::Arc;

use log::{debug, warn};

use crate::error_handling::types::{DecodeError, TrackerError};
use crate::tracker::connection_pool::ConnectionPool;
use crate::tracker::protocol_tracker::{ConnectionTracker, MessageDecoder, ProtocolTracker};
use crate::tracker::types::{ConnectionIdentity, Direction};

/// Stream read failures tolerated in a row before the direction is given up.
const MAX_CONSECUTIVE_IO_ERRORS: u32 = 3;

/// Everything a direction task needs besides its decoder.
pub struct DirectionTask<T: ProtocolTracker> {
    pub tracker: Arc<T>,
    pub pool: Arc<ConnectionPool<T::Connection>>,
    pub conn: Arc<T::Connection>,
    pub identity: ConnectionIdentity,
    pub direction: Direction,
}

impl<T: ProtocolTracker> DirectionTask<T> {
    /// Decodes messages until end of stream, handing each one to `dispatch`.
    ///
    /// Decode and handler failures are reported and the loop moves on to the
    /// next message. The first direction of a connection to end evicts it from
    /// the pool and runs the close hook.
    pub async fn run<D, F>(self, mut decoder: D, dispatch: F)
    where
        D: MessageDecoder,
        F: Fn(&T::Connection, D::Message) -> Result<(), TrackerError>,
    {
        let session = self.conn.session_id();
        debug!("[{}] {} {} decoding", session, self.identity, self.direction);

        let mut messages: u64 = 0;
        let mut io_errors = 0;
        loop {
            match decoder.decode().await {
                Ok(message) => {
                    io_errors = 0;
                    messages += 1;
                    if let Err(e) = dispatch(&self.conn, message) {
                        warn!("[{}] {} handler failed: {}", session, self.direction, e);
                    }
                }
                Err(DecodeError::Eof) => break,
                Err(DecodeError::Io(e)) => {
                    io_errors += 1;
                    let given_up = io_errors >= MAX_CONSECUTIVE_IO_ERRORS;
                    if given_up {
                        warn!(
                            "[{}] {} stream keeps failing ({}), treating it as closed",
                            session, self.direction, e
                        );
                    }
                    self.conn.on_error(DecodeError::Io(e));
                    if given_up {
                        break;
                    }
                }
                Err(e) => {
                    io_errors = 0;
                    self.conn.on_error(e);
                }
            }
        }

        debug!(
            "[{}] {} ended after {} message(s)",
            session, self.direction, messages
        );
        if self.pool.evict_if_current(&self.identity, &self.conn) {
            self.tracker.on_close(&self.conn);
        }
    }
}
