//! Listener contracts for channel lifecycle events.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::channel::Channel;
use crate::connection::handle::ClientInfo;
use crate::message::types::HubMessage;

/// Callback invoked from the notification task, never from the hub loop.
///
/// The client is `None` when the event was not triggered by a connection.
pub type ChannelListener = Arc<dyn Fn(&Arc<Channel>, Option<&ClientInfo>) + Send + Sync>;

/// Synchronous pre-publish hook; returning `false` vetoes the publish.
pub type BeforeBroadcast = Arc<dyn Fn(&Channel, &HubMessage) -> bool + Send + Sync>;

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    Created,
    Subscribed,
    Unsubscribed,
    Removed,
}

/// One optional listener per lifecycle event.
#[derive(Clone, Default)]
pub struct LifecycleListeners {
    pub created: Option<ChannelListener>,
    pub subscribed: Option<ChannelListener>,
    pub unsubscribed: Option<ChannelListener>,
    pub removed: Option<ChannelListener>,
}

impl LifecycleListeners {
    /// Listener registered for an event kind.
    pub fn get(&self, kind: NotifyKind) -> Option<&ChannelListener> {
        match kind {
            NotifyKind::Created => self.created.as_ref(),
            NotifyKind::Subscribed => self.subscribed.as_ref(),
            NotifyKind::Unsubscribed => self.unsubscribed.as_ref(),
            NotifyKind::Removed => self.removed.as_ref(),
        }
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.created.is_none()
            && self.subscribed.is_none()
            && self.unsubscribed.is_none()
            && self.removed.is_none()
    }
}

impl fmt::Debug for LifecycleListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleListeners")
            .field("created", &self.created.is_some())
            .field("subscribed", &self.subscribed.is_some())
            .field("unsubscribed", &self.unsubscribed.is_some())
            .field("removed", &self.removed.is_some())
            .finish()
    }
}
