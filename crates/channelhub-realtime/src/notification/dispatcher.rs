//! Notification dispatcher: delivers lifecycle events to listeners on a
//! task of its own so user callbacks never stall the hub loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::connection::handle::ClientInfo;

use super::listener::{ChannelListener, LifecycleListeners, NotifyKind};

/// A queued lifecycle event.
#[derive(Debug)]
pub(crate) struct Notification {
    pub kind: NotifyKind,
    pub channel: Arc<Channel>,
    pub client: Option<ClientInfo>,
}

impl Notification {
    pub fn new(kind: NotifyKind, channel: &Arc<Channel>, client: Option<ClientInfo>) -> Self {
        Self {
            kind,
            channel: Arc::clone(channel),
            client,
        }
    }
}

/// Drains the notification queue until every sender is gone.
///
/// The channel's own listener runs first, then the hub-wide one; each fires
/// whether or not the other is set.
pub(crate) async fn run(mut queue: mpsc::Receiver<Notification>, global: LifecycleListeners) {
    debug!("Notification dispatcher started");
    while let Some(notification) = queue.recv().await {
        let Notification {
            kind,
            channel,
            client,
        } = notification;

        if let Some(listener) = channel.listeners().get(kind) {
            invoke(listener, kind, &channel, client.as_ref());
        }
        if let Some(listener) = global.get(kind) {
            invoke(listener, kind, &channel, client.as_ref());
        }
    }
    debug!("Notification dispatcher stopped");
}

fn invoke(
    listener: &ChannelListener,
    kind: NotifyKind,
    channel: &Arc<Channel>,
    client: Option<&ClientInfo>,
) {
    if catch_unwind(AssertUnwindSafe(|| listener(channel, client))).is_err() {
        warn!(channel_id = %channel.id(), kind = ?kind, "Channel listener panicked");
    }
}
