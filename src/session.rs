//! Session / Database Selection
//!
//! Every connection has its own selected database. The `SessionTable`
//! remembers that selection, keyed by an opaque [`ConnectionId`] assigned
//! when the connection is accepted.
//!
//! A session is created lazily on first use (bound to database 0) and
//! removed by [`SessionTable::release`] when the connection ends.
//!
//! The table has its own mutex, separate from every database lock, so
//! session bookkeeping never waits on a busy database.

use crate::storage::{Registry, StorageEngine};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Opaque identity of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Maps each live connection to the database it has selected.
#[derive(Debug)]
pub struct SessionTable {
    registry: Arc<Registry>,
    selected: Mutex<HashMap<ConnectionId, Arc<StorageEngine>>>,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            selected: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The registry sessions select from.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Allocates a fresh connection identity. Identities are never reused.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<StorageEngine>>> {
        self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the database selected by `id`, binding it to database 0
    /// if nothing was selected yet.
    pub fn engine_for(&self, id: ConnectionId) -> Arc<StorageEngine> {
        let mut selected = self.lock();
        let engine = selected
            .entry(id)
            .or_insert_with(|| self.registry.default_database());
        Arc::clone(engine)
    }

    /// Switches `id` to the database named by `index`.
    ///
    /// # Returns
    ///
    /// Returns `false`, leaving the current selection untouched, if no
    /// such database exists.
    pub fn select(&self, id: ConnectionId, index: &str) -> bool {
        match self.registry.lookup(index) {
            Some(engine) => {
                self.lock().insert(id, engine);
                true
            }
            None => false,
        }
    }

    /// Forgets the session of `id`. Safe to call more than once.
    pub fn release(&self, id: ConnectionId) {
        self.lock().remove(&id);
    }

    /// Number of sessions currently tracked.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
