//! Collaborators injected into the hub.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::Channel;
use crate::connection::handle::ClientInfo;
use crate::message::types::HubMessage;
use crate::notification::listener::{ChannelListener, LifecycleListeners};

/// Answer of a [`ChannelResolver`].
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// A channel to attach under the requested id.
    pub channel: Option<Arc<Channel>>,
    /// Without a channel: whether the client may create one on demand.
    pub create: bool,
}

impl Resolution {
    /// Use this channel.
    pub fn channel(channel: Arc<Channel>) -> Self {
        Self {
            channel: Some(channel),
            create: false,
        }
    }

    /// No channel; let the client create one.
    pub fn create() -> Self {
        Self {
            channel: None,
            create: true,
        }
    }

    /// No channel and no creation.
    pub fn deny() -> Self {
        Self::default()
    }
}

/// Decides what happens when a subscribe targets an unknown static id.
#[async_trait]
pub trait ChannelResolver: Send + Sync {
    async fn resolve(&self, msg: &HubMessage, client: &ClientInfo) -> Resolution;
}

/// Answers `data` requests. The filled message is sent back to the requester only.
#[async_trait]
pub trait DataResolver: Send + Sync {
    async fn fill(&self, msg: &mut HubMessage, client: &ClientInfo);
}

/// Everything the embedding server plugs into the hub.
#[derive(Clone, Default)]
pub struct HubHooks {
    pub channel_resolver: Option<Arc<dyn ChannelResolver>>,
    pub data_resolver: Option<Arc<dyn DataResolver>>,
    /// Hub-wide listeners, fired after the channel's own listeners.
    pub listeners: LifecycleListeners,
}

impl HubHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_resolver(mut self, resolver: Arc<dyn ChannelResolver>) -> Self {
        self.channel_resolver = Some(resolver);
        self
    }

    pub fn with_data_resolver(mut self, resolver: Arc<dyn DataResolver>) -> Self {
        self.data_resolver = Some(resolver);
        self
    }

    pub fn on_created<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Arc<Channel>, Option<&ClientInfo>) + Send + Sync + 'static,
    {
        self.listeners.created = Some(Arc::new(listener) as ChannelListener);
        self
    }

    pub fn on_subscribed<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Arc<Channel>, Option<&ClientInfo>) + Send + Sync + 'static,
    {
        self.listeners.subscribed = Some(Arc::new(listener) as ChannelListener);
        self
    }

    pub fn on_unsubscribed<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Arc<Channel>, Option<&ClientInfo>) + Send + Sync + 'static,
    {
        self.listeners.unsubscribed = Some(Arc::new(listener) as ChannelListener);
        self
    }

    pub fn on_removed<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Arc<Channel>, Option<&ClientInfo>) + Send + Sync + 'static,
    {
        self.listeners.removed = Some(Arc::new(listener) as ChannelListener);
        self
    }
}

impl fmt::Debug for HubHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubHooks")
            .field("channel_resolver", &self.channel_resolver.is_some())
            .field("data_resolver", &self.data_resolver.is_some())
            .field("listeners", &self.listeners)
            .finish()
    }
}
