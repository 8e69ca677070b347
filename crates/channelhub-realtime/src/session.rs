//! Sessions group the concurrent connections of one user identity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::connection::handle::{Connection, ConnectionId};
use crate::message::types::Payload;

/// One user's live connections and the number of channels they created.
#[derive(Debug)]
pub struct Session {
    id: String,
    owner: String,
    group: String,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    created_channels: AtomicUsize,
}

impl Session {
    /// Creates an empty session for a user identity. An empty `id` falls
    /// back to the owner.
    pub fn new(id: impl Into<String>, owner: impl Into<String>, group: impl Into<String>) -> Self {
        let owner = owner.into();
        let id = id.into();
        Self {
            id: if id.is_empty() { owner.clone() } else { id },
            owner,
            group: group.into(),
            connections: RwLock::new(HashMap::new()),
            created_channels: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Number of member connections.
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn add(&self, conn: Arc<Connection>) {
        self.connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conn.id(), conn);
    }

    /// Removes a connection; returns `true` when the session became empty.
    pub(crate) fn remove(&self, conn_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        connections.remove(&conn_id);
        connections.is_empty()
    }

    /// Channels this session created on demand.
    pub fn created_channels(&self) -> usize {
        self.created_channels.load(Ordering::SeqCst)
    }

    /// `created + 1 <= limit` must hold to create one more channel.
    pub fn channel_limit_reached(&self, limit: usize) -> bool {
        self.created_channels() + 1 > limit
    }

    pub(crate) fn record_created_channel(&self) {
        self.created_channels.fetch_add(1, Ordering::SeqCst);
    }

    /// Queues a payload on every member connection.
    pub async fn send_to_all(&self, payload: Payload) -> usize {
        let targets: Vec<Arc<Connection>> = self
            .connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut delivered = 0;
        for conn in targets {
            if conn.send(Payload::clone(&payload)).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Closes every member connection.
    pub(crate) fn close(&self) {
        let connections: Vec<Arc<Connection>> = self
            .connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        for conn in connections {
            conn.take_session();
            conn.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::handle::ClientIdentity;
    use tokio::sync::mpsc;

    fn connection(user: &str) -> (Arc<Connection>, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(4);
        (Arc::new(Connection::new(ClientIdentity::new(user), tx)), rx)
    }

    #[test]
    fn test_channel_limit() {
        let session = Session::new("", "alice", "");
        assert!(!session.channel_limit_reached(1));
        session.record_created_channel();
        assert!(session.channel_limit_reached(1));
        assert!(!session.channel_limit_reached(2));
    }

    #[test]
    fn test_remove_reports_empty() {
        let session = Session::new("", "alice", "");
        let (a, _ra) = connection("alice");
        let (b, _rb) = connection("alice");
        session.add(Arc::clone(&a));
        session.add(Arc::clone(&b));
        assert!(!session.remove(a.id()));
        assert!(session.remove(b.id()));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_send_to_all_reaches_every_connection() {
        let session = Session::new("", "alice", "");
        let (a, mut ra) = connection("alice");
        let (b, mut rb) = connection("alice");
        session.add(a);
        session.add(b);

        assert_eq!(session.send_to_all(Payload::from("hello")).await, 2);
        assert_eq!(ra.recv().await.as_deref(), Some("hello"));
        assert_eq!(rb.recv().await.as_deref(), Some("hello"));

        session.close();
        assert!(session.is_empty());
        assert_eq!(ra.recv().await, None);
    }
}
