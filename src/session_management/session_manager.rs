use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::io::DuplexStream;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::flow_handler::{FlowHandler, TrackerHandle};
use crate::configuration::config::Config;
use crate::configuration::types::{Protocol, DEFAULT_STREAM_BUFFER_BYTES};
use crate::data_capture::types::FlowSource;
use crate::error_handling::types::{ConfigError, ReplayError, SessionError};
use crate::output::types::OutputSink;
use crate::protocols::http::HttpTracker;
use crate::protocols::mysql::MysqlTracker;
use crate::tracker::protocol_tracker::{FlowStream, ProtocolTracker};
use crate::tracker::types::{ConnectionIdentity, Direction, FlowTuple};

/// What became of a flow handed to the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowDisposition {
    Tracked(ConnectionIdentity, Direction),
    /// Dropped by the low client port filter.
    Filtered,
}

/// Why [`SessionManager::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Exhausted,
    Shutdown,
}

/// Routes flows to the tracker registered for their server port.
///
/// The manager owns the port registry and every direction task it spawns.
/// Each registered port has its own connection pool, so identities are scoped
/// to the tracker that owns the server port.
///
/// # Fields Overview
///
/// - `handlers`: registered trackers keyed by server port
/// - `tasks`: one decode task per tracked (connection, direction)
/// - `min_client_port`: flows with a lower client port are ignored, 0 disables it
/// - `stream_buffer_bytes`: capacity of pipes returned by [`SessionManager::open_flow`]
pub struct SessionManager {
    handlers: HashMap<u16, Arc<dyn FlowHandler>>,
    tasks: JoinSet<()>,
    min_client_port: u16,
    stream_buffer_bytes: usize,
}

/// Resolves once `shutdown` carries `true`. A dropped sender never resolves.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl SessionManager {
    pub fn new(min_client_port: u16) -> Self {
        Self {
            handlers: HashMap::new(),
            tasks: JoinSet::new(),
            min_client_port,
            stream_buffer_bytes: DEFAULT_STREAM_BUFFER_BYTES,
        }
    }

    /// Builds a manager with one tracker per configured port, all emitting to `sink`.
    pub fn from_config(config: &Config, sink: Arc<dyn OutputSink>) -> Result<Self, ConfigError> {
        let mut manager = Self::new(config.min_client_port);
        manager.stream_buffer_bytes = config.stream_buffer_bytes;

        for entry in &config.trackers {
            let registered = match entry.protocol()? {
                Protocol::Mysql => manager.register(entry.port, MysqlTracker::new(Arc::clone(&sink))),
                Protocol::Http => manager.register(
                    entry.port,
                    HttpTracker::from_config(Arc::clone(&sink), &entry.record()),
                ),
            };
            registered.map_err(|_| ConfigError::DuplicatePort(entry.port))?;
        }
        Ok(manager)
    }

    pub fn register<T: ProtocolTracker>(&mut self, port: u16, tracker: T) -> Result<(), SessionError> {
        self.register_handler(port, Arc::new(TrackerHandle::new(tracker)))
    }

    pub fn register_handler(
        &mut self,
        port: u16,
        handler: Arc<dyn FlowHandler>,
    ) -> Result<(), SessionError> {
        if self.handlers.contains_key(&port) {
            return Err(SessionError::DuplicatePort(port));
        }
        info!("Tracking {} on port {}", handler.protocol(), port);
        self.handlers.insert(port, handler);
        Ok(())
    }

    pub fn is_registered(&self, port: u16) -> bool {
        self.handlers.contains_key(&port)
    }

    pub fn registered_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.handlers.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Whether a flow would be handed to a tracker rather than rejected.
    pub fn accepts(&self, flow: &FlowTuple) -> bool {
        let (identity, _) = ConnectionIdentity::resolve(flow);
        self.is_registered(identity.server_port())
    }

    /// Resolves `flow` and checks it against the filter and the registry.
    ///
    /// `None` means the flow is filtered out.
    fn route(&self, flow: &FlowTuple) -> Result<Option<(ConnectionIdentity, Direction)>, SessionError> {
        let (identity, direction) = ConnectionIdentity::resolve(flow);

        if identity.client_port() < self.min_client_port {
            debug!("Ignoring {} (client port below {})", flow, self.min_client_port);
            return Ok(None);
        }

        let handler = self
            .handlers
            .get(&identity.server_port())
            .ok_or(SessionError::UnregisteredPort(identity.server_port()))?;
        debug!("{} flow {} as {}", handler.protocol(), flow, direction);
        Ok(Some((identity, direction)))
    }

    /// Starts tracking one direction of a connection read from `stream`.
    ///
    /// A flow whose resolved server port has no tracker is a configuration
    /// error.
    pub fn attach(
        &mut self,
        flow: FlowTuple,
        stream: FlowStream,
    ) -> Result<FlowDisposition, SessionError> {
        let Some((identity, direction)) = self.route(&flow)? else {
            return Ok(FlowDisposition::Filtered);
        };
        if let Some(handler) = self.handlers.get(&identity.server_port()) {
            handler.attach(identity.clone(), vec![(direction, stream)], &mut self.tasks);
        }
        Ok(FlowDisposition::Tracked(identity, direction))
    }

    /// Starts tracking flows known to belong together, usually both directions
    /// of one connection.
    ///
    /// Flows are grouped by identity and each group joins its connection at
    /// once. Nothing is attached when any flow is unroutable. Dispositions come
    /// back in input order.
    pub fn attach_connection(
        &mut self,
        flows: Vec<(FlowTuple, FlowStream)>,
    ) -> Result<Vec<FlowDisposition>, SessionError> {
        let mut dispositions = Vec::with_capacity(flows.len());
        let mut groups: Vec<(ConnectionIdentity, Vec<(Direction, FlowStream)>)> = Vec::new();

        for (flow, stream) in flows {
            let Some((identity, direction)) = self.route(&flow)? else {
                dispositions.push(FlowDisposition::Filtered);
                continue;
            };
            dispositions.push(FlowDisposition::Tracked(identity.clone(), direction));
            match groups.iter_mut().find(|(id, _)| *id == identity) {
                Some((_, directions)) => directions.push((direction, stream)),
                None => groups.push((identity, vec![(direction, stream)])),
            }
        }

        for (identity, directions) in groups {
            if let Some(handler) = self.handlers.get(&identity.server_port()) {
                handler.attach(identity, directions, &mut self.tasks);
            }
        }
        Ok(dispositions)
    }

    /// Opens an in-memory pipe for one direction of a live connection.
    ///
    /// The capture side writes reassembled bytes into the returned half and
    /// drops it when the direction ends. Writes wait while the pipe is full.
    pub fn open_flow(&mut self, flow: FlowTuple) -> Result<Option<DuplexStream>, SessionError> {
        let (writer, reader) = tokio::io::duplex(self.stream_buffer_bytes);
        match self.attach(flow, Box::new(reader))? {
            FlowDisposition::Tracked(..) => Ok(Some(writer)),
            FlowDisposition::Filtered => Ok(None),
        }
    }

    /// Attaches every connection `source` yields until it is exhausted or `shutdown` fires.
    ///
    /// Direction tasks keep running after this returns; see [`SessionManager::wait`].
    pub async fn run<S: FlowSource>(
        &mut self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunExit, ReplayError> {
        let mut flows = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => None,
                next = source.next_connection() => Some(next?),
            };
            match next {
                None => {
                    info!("Shutdown requested after {} flow(s)", flows);
                    return Ok(RunExit::Shutdown);
                }
                Some(None) => {
                    info!("Flow source exhausted after {} flow(s)", flows);
                    return Ok(RunExit::Exhausted);
                }
                Some(Some(connection)) => {
                    flows += self.attach_connection(connection)?.len();
                }
            }
        }
    }

    /// Waits for every direction task to end, or aborts them when `shutdown` fires.
    pub async fn wait(&mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let stop = tokio::select! {
                joined = self.tasks.join_next() => match joined {
                    None => return,
                    Some(Err(e)) if e.is_panic() => {
                        error!("Direction task panicked: {}", e);
                        false
                    }
                    Some(_) => false,
                },
                _ = stop_requested(&mut shutdown) => true,
            };
            if stop {
                self.shutdown().await;
                return;
            }
        }
    }

    /// Aborts every running direction task. Close hooks do not run for them.
    pub async fn shutdown(&mut self) {
        if !self.tasks.is_empty() {
            info!("Aborting {} direction task(s)", self.tasks.len());
        }
        self.tasks.shutdown().await;
    }

    pub fn running_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Connections currently tracked across all ports.
    pub fn live_connections(&self) -> usize {
        self.handlers.values().map(|h| h.live_connections()).sum()
    }
}
