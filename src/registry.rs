use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use tracing::trace;

use crate::connection::{Connection, Id};

/// The set of live connections.
///
/// The lock is only held to mutate the map or to copy it out, never
/// across a send.
#[derive(Clone, Default)]
pub struct Registry(Arc<Mutex<BTreeMap<Id, Arc<Connection>>>>);

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `connection`, returns `false` if it was already there.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        let id = connection.id();
        let mut connections = self.0.lock();
        if connections.contains_key(&id) {
            return false;
        }
        connections.insert(id, connection);
        trace!("added {id}, {} connections", connections.len());
        true
    }

    /// Remove the connection with `id`. Removing a missing id is a
    /// no-op, the handler and the broadcast cleanup may both get here.
    pub fn remove(&self, id: Id) -> Option<Arc<Connection>> {
        let mut connections = self.0.lock();
        let removed = connections.remove(&id);
        trace!("removed {id}: {}", removed.is_some());
        removed
    }

    /// Point-in-time copy of the registered connections.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.0.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn contains(&self, id: Id) -> bool {
        self.0.lock().contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}
