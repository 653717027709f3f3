use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use regex::Regex;

use super::types::FlowSource;
use crate::error_handling::types::ReplayError;
use crate::tracker::protocol_tracker::FlowStream;
use crate::tracker::types::{ConnectionIdentity, FlowTuple};

/// Recognizes tcpflow-style file names such as `010.000.000.007.51432-010.000.000.001.03306`.
pub struct FlowNameParser {
    pattern: Regex,
}

impl FlowNameParser {
    pub fn new() -> Result<Self, regex::Error> {
        // SRCIP.SRCPORT-DSTIP.DSTPORT, optionally followed by a connection counter
        let pattern = Regex::new(
            r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,5})-(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,5})(?:c(\d+))?$",
        )?;
        Ok(Self { pattern })
    }

    pub fn parse(&self, name: &str) -> Option<FlowTuple> {
        self.parse_counted(name).map(|(flow, _)| flow)
    }

    /// Like [`FlowNameParser::parse`], also returning the connection counter
    /// that tells apart reuses of one address pair. It is 0 when absent.
    pub fn parse_counted(&self, name: &str) -> Option<(FlowTuple, u32)> {
        let caps = self.pattern.captures(name)?;
        let endpoint = |first: usize| -> Option<SocketAddr> {
            let mut octets = [0u8; 4];
            for (i, octet) in octets.iter_mut().enumerate() {
                *octet = caps[first + i].parse().ok()?;
            }
            let port: u16 = caps[first + 4].parse().ok()?;
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        };
        let counter = match caps.get(11) {
            Some(c) => c.as_str().parse().ok()?,
            None => 0,
        };
        Some((FlowTuple::new(endpoint(1)?, endpoint(6)?), counter))
    }
}

/// Replays a directory of reassembled flow directions, one file per direction.
///
/// Files naming the same connection (both address orders, same counter) are
/// handed out together. Connections come in the order of their first file
/// name, and flows within one keep name order. Names that are not flow names,
/// and flows rejected by the filter given to [`FlowDirectory::scan`], are
/// skipped.
pub struct FlowDirectory {
    root: PathBuf,
    pending: VecDeque<Vec<(FlowTuple, PathBuf)>>,
}

impl FlowDirectory {
    pub async fn scan<P, F>(root: P, accept: F) -> Result<Self, ReplayError>
    where
        P: AsRef<Path>,
        F: Fn(&FlowTuple) -> bool,
    {
        let root = root.as_ref().to_path_buf();
        let names =
            FlowNameParser::new().map_err(|e| ReplayError::InvalidPattern(e.to_string()))?;
        let mut entries = tokio::fs::read_dir(&root).await?;
        let mut found = Vec::new();
        let mut skipped = 0usize;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some((flow, counter)) = name.to_str().and_then(|n| names.parse_counted(n)) else {
                debug!("Skipping {:?}: not a flow file", name);
                continue;
            };
            if !accept(&flow) {
                skipped += 1;
                debug!("Skipping {}: no tracker for its server port", flow);
                continue;
            }
            found.push((flow, counter, entry.path()));
        }

        found.sort_by(|a, b| a.2.cmp(&b.2));
        let flows = found.len();
        let mut index: HashMap<(ConnectionIdentity, u32), usize> = HashMap::new();
        let mut pending: VecDeque<Vec<(FlowTuple, PathBuf)>> = VecDeque::new();
        for (flow, counter, path) in found {
            let (identity, _) = ConnectionIdentity::resolve(&flow);
            let slot = *index.entry((identity, counter)).or_insert_with(|| {
                pending.push_back(Vec::new());
                pending.len() - 1
            });
            pending[slot].push((flow, path));
        }

        info!(
            "{} flow(s) in {} connection(s) to replay from {} ({} skipped)",
            flows,
            pending.len(),
            root.display(),
            skipped
        );
        Ok(Self { root, pending })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Connections not handed out yet.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FlowSource for FlowDirectory {
    async fn next_connection(
        &mut self,
    ) -> Result<Option<Vec<(FlowTuple, FlowStream)>>, ReplayError> {
        while let Some(group) = self.pending.pop_front() {
            let mut opened: Vec<(FlowTuple, FlowStream)> = Vec::with_capacity(group.len());
            for (flow, path) in group {
                match tokio::fs::File::open(&path).await {
                    Ok(file) => opened.push((flow, Box::new(file))),
                    // removed since the scan
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        warn!("{} disappeared before replay", path.display());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if !opened.is_empty() {
                return Ok(Some(opened));
            }
        }
        Ok(None)
    }
}
