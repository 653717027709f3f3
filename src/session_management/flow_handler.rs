use std::sync::Arc;

use log::debug;
use tokio::task::JoinSet;

use super::direction_task::DirectionTask;
use crate::tracker::connection_pool::ConnectionPool;
use crate::tracker::protocol_tracker::{ConnectionTracker, FlowStream, ProtocolTracker};
use crate::tracker::types::{ConnectionIdentity, Direction};

/// A registered protocol tracker with its associated types erased.
///
/// The session manager keeps one per server port and selects it when a flow
/// arrives, so protocol dispatch happens once per flow and never per message.
pub trait FlowHandler: Send + Sync {
    fn protocol(&self) -> &'static str;

    /// Binds directions of one connection and spawns their decode loops on `tasks`.
    ///
    /// Every decoder is built before any loop starts, so a direction that ends
    /// at once cannot close the connection before its peer has joined.
    fn attach(
        &self,
        identity: ConnectionIdentity,
        directions: Vec<(Direction, FlowStream)>,
        tasks: &mut JoinSet<()>,
    );

    /// Number of connections currently in the pool.
    fn live_connections(&self) -> usize;
}

pub struct TrackerHandle<T: ProtocolTracker> {
    tracker: Arc<T>,
    pool: Arc<ConnectionPool<T::Connection>>,
}

impl<T: ProtocolTracker> TrackerHandle<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            tracker: Arc::new(tracker),
            pool: Arc::new(ConnectionPool::new()),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<T::Connection>> {
        &self.pool
    }
}

impl<T: ProtocolTracker> FlowHandler for TrackerHandle<T> {
    fn protocol(&self) -> &'static str {
        self.tracker.protocol()
    }

    fn attach(
        &self,
        identity: ConnectionIdentity,
        directions: Vec<(Direction, FlowStream)>,
        tasks: &mut JoinSet<()>,
    ) {
        let (conn, created) = self
            .pool
            .get_or_create(&identity, || self.tracker.new_connection(&identity));

        let task = |direction| DirectionTask {
            tracker: Arc::clone(&self.tracker),
            pool: Arc::clone(&self.pool),
            conn: Arc::clone(&conn),
            identity: identity.clone(),
            direction,
        };
        let mut requests = Vec::new();
        let mut responses = Vec::new();
        for (direction, stream) in directions {
            if !created {
                debug!("[{}] {} joins {}", conn.session_id(), direction, identity);
            }
            match direction {
                Direction::Request => requests.push(self.tracker.request_decoder(stream, Arc::clone(&conn))),
                Direction::Response => responses.push(self.tracker.response_decoder(stream, Arc::clone(&conn))),
            }
        }

        for decoder in requests {
            tasks.spawn(task(Direction::Request).run(decoder, <T::Connection as ConnectionTracker>::on_request));
        }
        for decoder in responses {
            tasks.spawn(task(Direction::Response).run(decoder, <T::Connection as ConnectionTracker>::on_response));
        }
    }

    fn live_connections(&self) -> usize {
        self.pool.len()
    }
}
