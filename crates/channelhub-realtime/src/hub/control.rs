//! The hub control loop.
//!
//! A single task owns the channel registry and is the only writer of the
//! session registry. Every topology change (subscribe, unsubscribe, update,
//! connection register/unregister) is serialized through it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use channelhub_core::config::hub::HubConfig;

use crate::channel::Channel;
use crate::channel::registry::{ChannelRegistry, TemplateLookup};
use crate::connection::handle::Connection;
use crate::connection::pump::{self, PumpContext};
use crate::connection::transport::{FrameSink, FrameStream};
use crate::message::types::{ChannelDef, HubMessage, Method, Payload, is_routable_channel_id};
use crate::metrics::HubMetrics;
use crate::notification::dispatcher::Notification;
use crate::notification::listener::NotifyKind;
use crate::session::Session;

use super::hooks::ChannelResolver;

/// A control message and the connection it came from; `None` is the system.
#[derive(Debug)]
pub(crate) struct ControlMessage {
    pub msg: HubMessage,
    pub sender: Option<Arc<Connection>>,
}

impl ControlMessage {
    pub fn from_client(msg: HubMessage, sender: Arc<Connection>) -> Self {
        Self {
            msg,
            sender: Some(sender),
        }
    }

    pub fn from_system(msg: HubMessage) -> Self {
        Self { msg, sender: None }
    }
}

/// A freshly admitted connection waiting to be bound to its session.
pub(crate) struct Registration {
    pub connection: Arc<Connection>,
    pub stream: FrameStream,
    pub sink: FrameSink,
    pub outbound: mpsc::Receiver<Payload>,
}

/// A channel found for a subscribe that is not registered yet.
struct Candidate {
    channel: Arc<Channel>,
    client_created: bool,
}

impl Candidate {
    fn validated(channel: Arc<Channel>, client_created: bool) -> Option<Self> {
        if let Err(e) = channel.validate() {
            warn!(channel_id = %channel.id(), error = %e, "Rejected channel");
            return None;
        }
        Some(Self {
            channel,
            client_created,
        })
    }
}

/// Receiving ends of the hub queues.
pub(crate) struct Queues {
    pub input: mpsc::Receiver<ControlMessage>,
    pub register: mpsc::Receiver<Registration>,
    pub unregister: mpsc::Receiver<Arc<Connection>>,
}

/// State owned by the control loop task.
pub(crate) struct ControlLoop {
    pub config: HubConfig,
    pub registry: ChannelRegistry,
    pub sessions: Arc<DashMap<String, Arc<Session>>>,
    pub channel_count: Arc<AtomicUsize>,
    pub metrics: Arc<HubMetrics>,
    pub resolver: Option<Arc<dyn ChannelResolver>>,
    pub notify: mpsc::Sender<Notification>,
    pub pump: PumpContext,
    pub connections: u64,
}

impl ControlLoop {
    /// Runs until `shutdown` is cancelled, then closes every session and
    /// signals `done`.
    pub async fn run(
        mut self,
        mut queues: Queues,
        shutdown: CancellationToken,
        done: oneshot::Sender<()>,
    ) {
        info!(
            channels = self.registry.len(),
            templates = self.registry.template_count(),
            "Hub control loop started"
        );
        self.sync_counts();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(conn) = queues.unregister.recv() => self.handle_unregister(conn).await,
                Some(registration) = queues.register.recv() => self.handle_register(registration).await,
                Some(control) = queues.input.recv() => self.handle_control(control).await,
                else => break,
            }
        }

        self.shutdown();
        drop(queues);
        let _ = done.send(());
        info!("Hub control loop stopped");
    }

    fn shutdown(&mut self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in sessions {
            session.close();
        }
        self.sessions.clear();
        self.registry.clear();
        self.connections = 0;
        self.sync_counts();
    }

    fn sync_counts(&self) {
        self.channel_count
            .store(self.registry.len(), Ordering::SeqCst);
        self.metrics
            .set_active(self.connections, self.sessions.len() as u64);
    }

    fn notify(&self, kind: NotifyKind, channel: &Arc<Channel>, client: Option<&Arc<Connection>>) {
        let notification = Notification::new(kind, channel, client.map(|conn| conn.info()));
        if let Err(e) = self.notify.try_send(notification) {
            warn!(channel_id = %channel.id(), kind = ?kind, error = %e, "Notification dropped");
        }
    }

    async fn handle_control(&mut self, control: ControlMessage) {
        let ControlMessage { msg, sender } = control;
        if sender.as_ref().is_some_and(|conn| conn.is_closed()) {
            return;
        }
        let Some(method) = msg.method else {
            self.metrics.inc_dropped();
            return;
        };
        if !is_routable_channel_id(&msg.channel_id, self.config.channel_id_length_limit) {
            self.metrics.inc_dropped();
            return;
        }

        match (method, sender) {
            (Method::Publish, sender) => self.publish(msg, sender).await,
            (Method::Subscribe, Some(conn)) => self.subscribe(msg, conn).await,
            (Method::Unsubscribe, Some(conn)) => {
                if let Some(channel) = self.registry.get(&msg.channel_id) {
                    if !channel.is_system() {
                        self.unsubscribe(&channel, msg, &conn, false).await;
                    }
                }
            }
            (Method::Update, Some(conn)) => self.update(msg, conn).await,
            (method, _) => {
                debug!(method = ?method, channel_id = %msg.channel_id, "Control message ignored");
                self.metrics.inc_dropped();
            }
        }
        self.sync_counts();
    }

    async fn publish(&mut self, msg: HubMessage, sender: Option<Arc<Connection>>) {
        let Some(channel) = self.registry.get(&msg.channel_id) else {
            debug!(channel_id = %msg.channel_id, "Publish to unknown channel");
            self.metrics.inc_dropped();
            return;
        };
        let delivered = channel.try_broadcast(&msg, sender.as_ref()).await;
        debug!(channel_id = %channel.id(), delivered, "Published");
    }

    async fn subscribe(&mut self, mut msg: HubMessage, conn: Arc<Connection>) {
        let (channel, candidate) = match self.registry.get(&msg.channel_id) {
            Some(channel) => (channel, None),
            None => match self.find_candidate(&msg, &conn).await {
                Some(candidate) => (Arc::clone(&candidate.channel), Some(candidate)),
                None => {
                    self.metrics.inc_dropped();
                    return;
                }
            },
        };

        // Candidates are registered only after the read check.
        if !channel.is_read_granted(Some(&conn.requester())) {
            debug!(channel_id = %channel.id(), user_id = %conn.user_id(), "Subscribe denied");
            self.metrics.inc_dropped();
            return;
        }
        if let Some(candidate) = candidate {
            self.register_candidate(candidate, &conn);
        }
        if !channel.attach_subscriber(&conn) || channel.is_system() {
            return;
        }

        self.notify(NotifyKind::Subscribed, &channel, Some(&conn));
        msg.acknowledge();
        match msg.to_payload() {
            Ok(payload) => {
                conn.send(Payload::clone(&payload)).await;
                channel.fan_out(Some(conn.id()), payload).await;
            }
            Err(e) => warn!(channel_id = %channel.id(), error = %e, "Failed to serialize ack"),
        }
    }

    /// Resolves a subscribe to an id that is not registered: dynamic
    /// templates first, then the resolver, then a client-created channel.
    /// Nothing is registered until the caller has checked read rights.
    async fn find_candidate(&mut self, msg: &HubMessage, conn: &Arc<Connection>) -> Option<Candidate> {
        match self.registry.match_template(&msg.channel_id, conn.user_id()) {
            TemplateLookup::Matched(channel) => {
                return Candidate::validated(channel, false);
            }
            TemplateLookup::Rejected => {
                debug!(
                    channel_id = %msg.channel_id,
                    user_id = %conn.user_id(),
                    "Owner channel belongs to another user"
                );
                return None;
            }
            TemplateLookup::Miss => {}
        }

        if let Some(resolver) = self.resolver.clone() {
            let resolution = resolver.resolve(msg, &conn.info()).await;
            if let Some(channel) = resolution.channel {
                return Candidate::validated(channel, false);
            }
            if !resolution.create {
                return None;
            }
        }

        self.client_channel(msg, conn)
    }

    fn register_candidate(&mut self, candidate: Candidate, conn: &Arc<Connection>) {
        let Candidate {
            channel,
            client_created,
        } = candidate;
        self.notify(NotifyKind::Created, &channel, Some(conn));
        self.registry.attach(channel);
        self.metrics.inc_channels_created();
        if client_created {
            if let Some(session) = conn.session() {
                session.record_created_channel();
            }
        }
    }

    fn client_channel(&self, msg: &HubMessage, conn: &Arc<Connection>) -> Option<Candidate> {
        let session = conn.session()?;
        if session.channel_limit_reached(self.config.client_create_channel_limit) {
            debug!(user_id = %conn.user_id(), "Channel creation limit reached");
            return None;
        }

        let mut def = msg
            .channel
            .clone()
            .unwrap_or_else(|| ChannelDef::new(msg.channel_id.clone()));
        def.id = msg.channel_id.clone();
        def.owner = conn.user_id().to_string();
        if def.group.is_empty() {
            def.group = session.group().to_string();
        }
        def.system = false;

        Candidate::validated(Channel::from_def(def), true)
    }

    async fn unsubscribe(
        &mut self,
        channel: &Arc<Channel>,
        mut msg: HubMessage,
        conn: &Arc<Connection>,
        disconnect: bool,
    ) {
        if !channel.detach_subscriber(conn, disconnect) || channel.is_system() {
            return;
        }
        self.notify(NotifyKind::Unsubscribed, channel, Some(conn));

        if !disconnect {
            msg.acknowledge();
        }
        let payload = match msg.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(channel_id = %channel.id(), error = %e, "Failed to serialize ack");
                return;
            }
        };
        if !disconnect {
            conn.send(Payload::clone(&payload)).await;
        }

        if self.registry.remove_if_unused(channel) {
            debug!(channel_id = %channel.id(), "Channel removed");
            self.metrics.inc_channels_removed();
            self.notify(NotifyKind::Removed, channel, Some(conn));
        } else {
            channel.fan_out(Some(conn.id()), payload).await;
        }
    }

    async fn update(&mut self, msg: HubMessage, conn: Arc<Connection>) {
        let Some(def) = &msg.channel else {
            return;
        };
        let Some(channel) = self.registry.get(&msg.channel_id) else {
            return;
        };
        if !channel.update_permissions(&conn.requester(), def) {
            debug!(channel_id = %channel.id(), user_id = %conn.user_id(), "Update denied");
            self.metrics.inc_dropped();
            return;
        }
        match msg.to_payload() {
            Ok(payload) => {
                conn.send(Payload::clone(&payload)).await;
                channel.fan_out(Some(conn.id()), payload).await;
            }
            Err(e) => warn!(channel_id = %channel.id(), error = %e, "Failed to serialize update"),
        }
    }

    async fn handle_register(&mut self, registration: Registration) {
        let Registration {
            connection: conn,
            stream,
            sink,
            outbound,
        } = registration;

        let session = Arc::clone(
            self.sessions
                .entry(conn.user_id().to_string())
                .or_insert_with(|| {
                    Arc::new(Session::new(
                        conn.session_id(),
                        conn.user_id(),
                        conn.group(),
                    ))
                })
                .value(),
        );
        session.add(Arc::clone(&conn));
        conn.bind_session(&session);
        self.connections += 1;
        self.sync_counts();

        pump::spawn(&conn, stream, sink, outbound, &self.pump);

        for channel in self.registry.system_channels() {
            channel.attach_subscriber(&conn);
        }
        let announce = HubMessage::system(self.registry.system_ids());
        conn.send_message(&announce).await;

        info!(
            conn_id = %conn.id(),
            user_id = %conn.user_id(),
            session_id = %session.id(),
            "Connection registered"
        );
    }

    async fn handle_unregister(&mut self, conn: Arc<Connection>) {
        if conn.is_closed() {
            return;
        }
        for channel in conn.subscribed_channels() {
            let msg = HubMessage {
                method: Some(Method::Unsubscribe),
                channel_id: channel.id().to_string(),
                client_id: conn.user_id().to_string(),
                ..HubMessage::default()
            };
            self.unsubscribe(&channel, msg, &conn, true).await;
        }
        if let Some(session) = conn.take_session() {
            if session.remove(conn.id()) {
                self.sessions
                    .remove_if(session.owner(), |_, current| Arc::ptr_eq(current, &session));
                debug!(user_id = %session.owner(), "Session closed");
            }
        }

        conn.close();
        self.connections = self.connections.saturating_sub(1);
        self.sync_counts();

        info!(conn_id = %conn.id(), user_id = %conn.user_id(), "Connection unregistered");
    }
}
