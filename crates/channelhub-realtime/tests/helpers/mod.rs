//! Shared helpers driving a hub through in-memory transports.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::timeout;

use channelhub_core::config::hub::HubConfig;
use channelhub_realtime::{
    Channel, ChannelHub, ClientIdentity, Connection, Frame, HubHooks, HubMessage, Method,
    TransportError,
};

/// How long a test waits for a frame that should arrive.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a test waits to be sure nothing arrives.
pub const SILENCE: Duration = Duration::from_millis(200);

/// Builds and starts a hub with the given channels.
pub fn start_hub(hooks: HubHooks, channels: Vec<Arc<Channel>>) -> Arc<ChannelHub> {
    start_hub_with(HubConfig::default(), hooks, channels)
}

pub fn start_hub_with(
    config: HubConfig,
    hooks: HubHooks,
    channels: Vec<Arc<Channel>>,
) -> Arc<ChannelHub> {
    let hub = Arc::new(ChannelHub::new(config, hooks));
    if !channels.is_empty() {
        hub.put(channels).expect("Failed to declare channels");
    }
    hub.run(Vec::new()).expect("Failed to start hub");
    hub
}

/// A client connected through unbounded in-memory channels.
pub struct TestClient {
    pub user: String,
    pub connection: Arc<Connection>,
    inbound: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    /// Channel ids announced in the `sys` message.
    pub system_channels: Vec<String>,
}

impl TestClient {
    /// Connects and consumes the `sys` announcement.
    pub async fn connect(hub: &ChannelHub, user: &str) -> Self {
        Self::connect_with(hub, ClientIdentity::new(user)).await
    }

    pub async fn connect_with(hub: &ChannelHub, identity: ClientIdentity) -> Self {
        let user = identity.user_id.clone();
        let (inbound, stream) = mpsc::unbounded();
        let (sink, outbound) = mpsc::unbounded();
        let sink = sink.sink_map_err(|e| TransportError::new(e.to_string()));

        let connection = hub
            .new_client(identity, stream, sink)
            .await
            .expect("Failed to admit client");

        let mut client = Self {
            user,
            connection,
            inbound,
            outbound,
            system_channels: Vec::new(),
        };
        let sys = client.recv().await;
        assert_eq!(sys.method, Some(Method::System));
        client.system_channels = serde_json::from_value(sys.data.unwrap_or(Value::Null))
            .expect("sys data must be a list of ids");
        client
    }

    /// Sends one JSON frame.
    pub fn send(&self, frame: Value) {
        self.send_raw(frame.to_string());
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        self.inbound
            .unbounded_send(Ok(Frame::Text(text.into())))
            .expect("Hub stopped reading");
    }

    /// Answers a keepalive ping.
    pub fn pong(&self) {
        self.inbound
            .unbounded_send(Ok(Frame::Pong(Vec::new())))
            .expect("Hub stopped reading");
    }

    /// Ends the inbound stream, as a closed socket would.
    pub fn disconnect(&self) {
        self.inbound.close_channel();
    }

    /// Next text frame, decoded. Keepalive frames are skipped.
    pub async fn recv(&mut self) -> HubMessage {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.outbound.next())
                .await
                .unwrap_or_else(|_| panic!("{} received nothing", self.user))
                .unwrap_or_else(|| panic!("{} transport closed", self.user));
            if let Frame::Text(text) = frame {
                return serde_json::from_str(&text).expect("Server sent malformed JSON");
            }
        }
    }

    /// Asserts that no text frame arrives for a while.
    pub async fn assert_silent(&mut self) {
        let deadline = tokio::time::Instant::now() + SILENCE;
        loop {
            match tokio::time::timeout_at(deadline, self.outbound.next()).await {
                Err(_) | Ok(None) => return,
                Ok(Some(Frame::Text(text))) => panic!("{} unexpectedly received {text}", self.user),
                Ok(Some(_)) => {}
            }
        }
    }

    /// Waits until the server closes the transport.
    pub async fn expect_closed(&mut self) {
        loop {
            match timeout(RECV_TIMEOUT, self.outbound.next()).await {
                Ok(None) | Ok(Some(Frame::Close)) => return,
                Ok(Some(_)) => {}
                Err(_) => panic!("{} was not closed", self.user),
            }
        }
    }
}

/// Polls a condition until it holds or the receive timeout elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
