//! Individual client connection handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::Channel;
use crate::channel::rights::Requester;
use crate::message::types::{HubMessage, Payload};
use crate::session::Session;

/// Unique connection identifier
pub type ConnectionId = Uuid;

/// Who is connecting, as established by the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    /// User identity; connections with the same user share a session
    pub user_id: String,
    /// Transport session identifier
    pub session_id: String,
    /// Group used when the connection opens a new session
    pub group: String,
}

impl ClientIdentity {
    /// Identity for a user with no session id or group.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Sets the transport session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Sets the group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }
}

/// A handle to one live client connection.
///
/// The hub control loop is the only writer of the subscription map; other
/// tasks may read it.
pub struct Connection {
    id: ConnectionId,
    user_id: String,
    session_id: String,
    group: String,
    connected_at: DateTime<Utc>,
    sender: Mutex<Option<mpsc::Sender<Payload>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    session: RwLock<Weak<Session>>,
    channels: Mutex<HashMap<String, Arc<Channel>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(identity: ClientIdentity, sender: mpsc::Sender<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: identity.user_id,
            session_id: identity.session_id,
            group: identity.group,
            connected_at: Utc::now(),
            sender: Mutex::new(Some(sender)),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            session: RwLock::new(Weak::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// User identity
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Transport session id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Group of the session this connection belongs to, or the group it
    /// connected with when it is not bound to a session.
    pub fn group(&self) -> String {
        match self.session() {
            Some(session) => session.group().to_string(),
            None => self.group.clone(),
        }
    }

    /// When the connection was admitted
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// The identity permission checks are evaluated for.
    pub fn requester(&self) -> Requester {
        Requester::new(self.user_id.clone(), self.group())
    }

    /// Read-only public view.
    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            connection_id: self.id,
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            group: self.group(),
            connected_at: self.connected_at,
        }
    }

    /// Queues a payload for the writer.
    ///
    /// Waits while the outbound queue is full; returns `false` once the
    /// connection is closed.
    pub async fn send(&self, payload: Payload) -> bool {
        let sender = match self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            Some(sender) => sender.clone(),
            None => return false,
        };
        sender.send(payload).await.is_ok()
    }

    /// Serializes and queues a message.
    pub async fn send_message(&self, msg: &HubMessage) -> bool {
        match msg.to_payload() {
            Ok(payload) => self.send(payload).await,
            Err(e) => {
                tracing::warn!(conn_id = %self.id, error = %e, "Failed to serialize message");
                false
            }
        }
    }

    /// Closes the outbound queue and stops both pumps. Only the first call
    /// has an effect; it returns `true`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.shutdown.cancel();
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        true
    }

    /// Whether [`Connection::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ids of the channels this connection is subscribed to.
    pub fn channel_ids(&self) -> Vec<String> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Whether the connection is subscribed to a channel id.
    pub fn is_subscribed(&self, channel_id: &str) -> bool {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(channel_id)
    }

    pub(crate) fn subscribed_channels(&self) -> Vec<Arc<Channel>> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn track_channel(&self, channel: Arc<Channel>) {
        if self.is_closed() {
            return;
        }
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.id().to_string(), channel);
    }

    pub(crate) fn untrack_channel(&self, channel_id: &str) {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(channel_id);
    }

    /// The session this connection is registered in.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade()
    }

    pub(crate) fn bind_session(&self, session: &Arc<Session>) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(session);
    }

    pub(crate) fn take_session(&self) -> Option<Arc<Session>> {
        std::mem::take(&mut *self.session.write().unwrap_or_else(|e| e.into_inner())).upgrade()
    }
}

/// Snapshot of a connection handed to collaborators and listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Connection ID
    pub connection_id: ConnectionId,
    /// User identity
    pub user_id: String,
    /// Transport session id
    pub session_id: String,
    /// Session group
    pub group: String,
    /// Connected at
    pub connected_at: DateTime<Utc>,
}
