//! The `Connection` trait and the server-side live-connection set.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Socket ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A frame-oriented transport endpoint.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; the bus stores them as
/// `Arc<dyn Connection>`.
pub trait Connection: Send + Sync + 'static {
    /// Send one text frame. Implementations drop the frame silently when the
    /// socket is not open.
    fn send(&self, frame: String);

    fn ready_state(&self) -> ReadyState;

    fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }
}

/// Handle identifying one server-side connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry of live server-side connections, ordered by arrival.
#[derive(Default)]
pub struct ConnectionSet {
    connections: RwLock<BTreeMap<ConnectionId, Arc<dyn Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and mint its id.
    pub fn insert(&self, connection: Arc<dyn Connection>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.write().insert(id, connection);
        id
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.connections.write().remove(&id).is_some()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<dyn Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Copy of the current set. Fan-out iterates over this, never over the
    /// live map, so handlers may add or remove connections meanwhile.
    pub fn snapshot(&self) -> Vec<(ConnectionId, Arc<dyn Connection>)> {
        self.connections
            .read()
            .iter()
            .map(|(id, conn)| (*id, Arc::clone(conn)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        frames: Mutex<Vec<String>>,
    }

    impl Connection for Recorder {
        fn send(&self, frame: String) {
            self.frames.lock().push(frame);
        }
        fn ready_state(&self) -> ReadyState {
            ReadyState::Open
        }
    }

    fn recorder() -> Arc<dyn Connection> {
        Arc::new(Recorder {
            frames: Mutex::new(vec![]),
        })
    }

    #[test]
    fn ids_are_unique_and_ordered() {
        let set = ConnectionSet::new();
        let a = set.insert(recorder());
        let b = set.insert(recorder());
        assert!(a < b);
        let ids: Vec<_> = set.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn remove_releases_connection() {
        let set = ConnectionSet::new();
        let conn = recorder();
        let id = set.insert(Arc::clone(&conn));
        assert_eq!(Arc::strong_count(&conn), 2);
        assert!(set.remove(id));
        assert!(!set.remove(id));
        assert_eq!(Arc::strong_count(&conn), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let set = ConnectionSet::new();
        let a = set.insert(recorder());
        let snap = set.snapshot();
        set.remove(a);
        set.insert(recorder());
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].0, a);
    }
}
