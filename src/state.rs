use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the registry keeps for a live session: enough to name it in logs
/// and to force it closed from outside.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    closer: CancellationToken,
}

impl SessionHandle {
    /// Forces the owning task to drop its session and connection. Safe to
    /// call any number of times, also after the session already ended.
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub async fn closed(&self) {
        self.closer.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }
}

#[derive(Clone, Default)]
pub struct ServerState {
    sessions: Arc<DashMap<ConnectionId, SessionHandle>>,
    next_id: Arc<Mutex<u64>>,
}

impl ServerState {
    /// Assigns the next identifier and inserts the session. The entry lives
    /// until the returned guard is dropped. Cancelling `closer` force-closes
    /// the session.
    pub fn register(&self, peer: SocketAddr, closer: CancellationToken) -> Registration {
        let mut next = self.next_id.lock();

        let id = ConnectionId(*next);
        *next += 1;

        let handle = SessionHandle {
            id,
            peer,
            closer,
        };

        self.sessions.insert(id, handle.clone());

        Registration {
            state: self.clone(),
            handle,
        }
    }

    #[cfg(test)]
    pub fn get(&self, id: ConnectionId) -> Option<SessionHandle> {
        self.sessions.get(&id).map(|guard| guard.clone())
    }

    fn remove(&self, id: ConnectionId) {
        self.sessions.remove(&id);
    }

    /// Visits a snapshot of the registered sessions. Entries added or removed
    /// while visiting may or may not be seen.
    pub fn for_each<F: FnMut(&SessionHandle)>(&self, mut visit: F) {
        let snapshot: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .collect();

        for handle in &snapshot {
            visit(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Registry membership for one connection. Dropping it removes the entry,
/// whichever way the session ended.
pub struct Registration {
    state: ServerState,
    handle: SessionHandle,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state.remove(self.handle.id);
    }
}
