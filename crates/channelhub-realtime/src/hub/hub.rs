//! Public hub handle with an explicit `run`/`close` lifecycle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use futures::{Sink, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use channelhub_core::config::hub::HubConfig;

use crate::channel::Channel;
use crate::channel::registry::ChannelRegistry;
use crate::connection::handle::{ClientIdentity, Connection};
use crate::connection::pump::PumpContext;
use crate::connection::transport::{Frame, TransportError};
use crate::error::{HubError, HubResult};
use crate::message::types::{HubMessage, RESERVED_CHANNEL_ID};
use crate::metrics::{HubMetrics, MetricsSnapshot};
use crate::notification::dispatcher;
use crate::session::Session;

use super::control::{ControlLoop, ControlMessage, Queues, Registration};
use super::hooks::HubHooks;

/// Handles to a running control loop.
struct RunningHub {
    input: mpsc::Sender<ControlMessage>,
    register: mpsc::Sender<Registration>,
    shutdown: CancellationToken,
    done: oneshot::Receiver<()>,
    notifier: JoinHandle<()>,
}

/// Process-wide pub/sub authority.
///
/// Channels are declared with [`ChannelHub::put`] before [`ChannelHub::run`];
/// afterwards the registries belong to the control loop and are only changed
/// by messages flowing through it.
pub struct ChannelHub {
    config: HubConfig,
    hooks: HubHooks,
    pending: Mutex<Option<ChannelRegistry>>,
    running: RwLock<Option<RunningHub>>,
    closed: AtomicBool,
    sessions: Arc<DashMap<String, Arc<Session>>>,
    channel_count: Arc<AtomicUsize>,
    metrics: Arc<HubMetrics>,
}

impl std::fmt::Debug for ChannelHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHub")
            .field("running", &self.is_running())
            .field("channels", &self.channel_count())
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl ChannelHub {
    /// Creates a stopped hub.
    pub fn new(config: HubConfig, hooks: HubHooks) -> Self {
        Self {
            config: config.normalized(),
            hooks,
            pending: Mutex::new(Some(ChannelRegistry::new())),
            running: RwLock::new(None),
            closed: AtomicBool::new(false),
            sessions: Arc::new(DashMap::new()),
            channel_count: Arc::new(AtomicUsize::new(0)),
            metrics: Arc::new(HubMetrics::new()),
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn stopped_error(&self) -> HubError {
        if self.closed.load(Ordering::SeqCst) {
            HubError::Closed
        } else {
            HubError::AlreadyRunning
        }
    }

    /// Declares channels before the hub runs.
    ///
    /// Ids with `:name` placeholders become dynamic templates; a template id
    /// that is already declared is kept as is. Every channel is attempted;
    /// the first failure is returned.
    pub fn put<I>(&self, channels: I) -> HubResult<()>
    where
        I: IntoIterator<Item = Arc<Channel>>,
    {
        let channels: Vec<Arc<Channel>> = channels.into_iter().collect();
        if channels.is_empty() {
            return Err(HubError::EmptyDeclaration);
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let Some(registry) = pending.as_mut() else {
            return Err(self.stopped_error());
        };

        let mut first_error = None;
        for channel in channels {
            if let Err(e) = registry.declare(channel) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Starts the control loop and the notification dispatcher.
    ///
    /// `startup` channels are declared like [`ChannelHub::put`] but invalid
    /// ones are only logged. Must be called from within a Tokio runtime.
    pub fn run<I>(&self, startup: I) -> HubResult<()>
    where
        I: IntoIterator<Item = Arc<Channel>>,
    {
        let mut running = self.running.write().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return Err(HubError::AlreadyRunning);
        }
        let Some(mut registry) = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return Err(self.stopped_error());
        };

        for channel in startup {
            let id = channel.id().to_string();
            if let Err(e) = registry.declare(channel) {
                warn!(channel_id = %id, error = %e, "Skipping startup channel");
            }
        }

        let capacity = self.config.queue_capacity;
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (notify_tx, notify_rx) = mpsc::channel(capacity);
        let (done_tx, done_rx) = oneshot::channel();
        let shutdown = CancellationToken::new();

        let notifier = tokio::spawn(dispatcher::run(notify_rx, self.hooks.listeners.clone()));

        let control = ControlLoop {
            config: self.config.clone(),
            registry,
            sessions: Arc::clone(&self.sessions),
            channel_count: Arc::clone(&self.channel_count),
            metrics: Arc::clone(&self.metrics),
            resolver: self.hooks.channel_resolver.clone(),
            notify: notify_tx,
            pump: PumpContext {
                input: input_tx.clone(),
                unregister: unregister_tx,
                data_resolver: self.hooks.data_resolver.clone(),
                channel_id_length_limit: self.config.channel_id_length_limit,
                ping_interval: self.config.ping_interval(),
                pong_wait: self.config.pong_wait(),
                write_wait: self.config.write_wait(),
                metrics: Arc::clone(&self.metrics),
            },
            connections: 0,
        };
        let queues = Queues {
            input: input_rx,
            register: register_rx,
            unregister: unregister_rx,
        };
        tokio::spawn(control.run(queues, shutdown.clone(), done_tx));

        *running = Some(RunningHub {
            input: input_tx,
            register: register_tx,
            shutdown,
            done: done_rx,
            notifier,
        });
        info!("Channel hub running");
        Ok(())
    }

    /// Whether the control loop is running.
    pub fn is_running(&self) -> bool {
        self.running
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stops the control loop, closes every connection and waits for the
    /// loop and the notification dispatcher to finish. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let running = self
            .running
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(running) = running else {
            return;
        };

        let RunningHub {
            input,
            register,
            shutdown,
            done,
            notifier,
        } = running;
        drop(input);
        drop(register);
        shutdown.cancel();

        if done.await.is_err() {
            warn!("Hub control loop ended without completing shutdown");
        }
        if let Err(e) = notifier.await {
            warn!(error = %e, "Notification dispatcher failed");
        }
        info!("Channel hub closed");
    }

    fn input_sender(&self) -> HubResult<mpsc::Sender<ControlMessage>> {
        self.running
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|running| running.input.clone())
            .ok_or(HubError::NotRunning)
    }

    /// Admits a connection over any frame transport.
    ///
    /// The connection is bound to its user's session and its pumps are
    /// started by the control loop.
    pub async fn new_client<S, K>(
        &self,
        identity: ClientIdentity,
        stream: S,
        sink: K,
    ) -> HubResult<Arc<Connection>>
    where
        S: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
        K: Sink<Frame, Error = TransportError> + Send + 'static,
    {
        let register = self
            .running
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|running| running.register.clone())
            .ok_or(HubError::NotRunning)?;

        let (sender, outbound) = mpsc::channel(self.config.outbound_buffer_size);
        let connection = Arc::new(Connection::new(identity, sender));
        self.metrics.inc_connections_opened();
        debug!(conn_id = %connection.id(), user_id = %connection.user_id(), "Admitting connection");

        let registration = Registration {
            connection: Arc::clone(&connection),
            stream: stream.boxed(),
            sink: Box::pin(sink),
            outbound,
        };
        register
            .send(registration)
            .await
            .map_err(|_| HubError::NotRunning)?;
        Ok(connection)
    }

    /// Publishes system data on a channel through the control loop.
    ///
    /// Must only be triggered by the server, never on behalf of a client.
    pub async fn broadcast(&self, channel_id: &str, data: Value) -> HubResult<()> {
        let input = self.input_sender()?;
        input
            .send(ControlMessage::from_system(HubMessage::publish(
                channel_id, data,
            )))
            .await
            .map_err(|_| HubError::NotRunning)
    }

    /// Sends system data to every connection of one user, published on the
    /// reserved `me` channel id.
    ///
    /// Returns the number of connections reached.
    pub async fn broadcast_to_user(&self, user_id: &str, data: Value) -> HubResult<usize> {
        if !self.is_running() {
            return Err(HubError::NotRunning);
        }
        let Some(session) = self
            .sessions
            .get(user_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Ok(0);
        };
        let payload = HubMessage::publish(RESERVED_CHANNEL_ID, data).to_payload()?;
        Ok(session.send_to_all(payload).await)
    }

    /// Number of registered channel instances.
    pub fn channel_count(&self) -> usize {
        self.channel_count.load(Ordering::SeqCst)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Current metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
