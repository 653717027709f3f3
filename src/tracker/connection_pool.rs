use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::trace;

use super::types::ConnectionIdentity;

/// Maps connection identities to their live connection tracker.
///
/// One pool exists per registered server port. Entries are created on the
/// first observation of either direction and removed when the connection
/// closes; an evicted identity can be tracked again from scratch.
pub struct ConnectionPool<C> {
    entries: RwLock<HashMap<String, Arc<C>>>,
}

impl<C> ConnectionPool<C> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the tracker for `identity`, building it with `create` on a miss.
    ///
    /// Concurrent callers for the same identity all receive the same instance
    /// and `create` runs at most once. The flag is `true` for the caller that
    /// created the entry.
    pub fn get_or_create<F>(&self, identity: &ConnectionIdentity, create: F) -> (Arc<C>, bool)
    where
        F: FnOnce() -> C,
    {
        let key = identity.key();
        if let Some(existing) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return (Arc::clone(existing), false);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another task may have created the entry between the two locks.
        if let Some(existing) = entries.get(&key) {
            return (Arc::clone(existing), false);
        }
        let conn = Arc::new(create());
        entries.insert(key, Arc::clone(&conn));
        trace!("pool entry created for {} ({} live)", identity, entries.len());
        (conn, true)
    }

    pub fn get(&self, identity: &ConnectionIdentity) -> Option<Arc<C>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&identity.key())
            .cloned()
    }

    /// Removes the entry for `identity`, whatever instance it holds.
    pub fn evict(&self, identity: &ConnectionIdentity) -> Option<Arc<C>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&identity.key())
    }

    /// Removes the entry only if it still holds `conn`.
    ///
    /// Returns `true` for exactly one caller per created entry, which makes it
    /// the gate for running close hooks once.
    pub fn evict_if_current(&self, identity: &ConnectionIdentity, conn: &Arc<C>) -> bool {
        let key = identity.key();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&key) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                entries.remove(&key);
                trace!("pool entry evicted for {} ({} live)", identity, entries.len());
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self::new()
    }
}
