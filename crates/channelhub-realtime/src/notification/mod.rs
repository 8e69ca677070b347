//! Channel lifecycle notifications.

pub(crate) mod dispatcher;
pub mod listener;

pub use listener::{BeforeBroadcast, ChannelListener, LifecycleListeners, NotifyKind};
