//! # channelhub-realtime
//!
//! In-process publish/subscribe broker. Provides:
//!
//! - A serialized hub control loop that owns the channel and session registries
//! - Static, dynamic (`rooms/:id`) and owner (`me/:Owner/...`) channels
//! - Owner/grant/group/other rights evaluation per channel
//! - Per-connection reader/writer pumps over any frame transport
//! - Asynchronous lifecycle notifications (created, subscribed, unsubscribed, removed)

pub mod channel;
pub mod connection;
pub mod error;
pub mod hub;
pub mod message;
pub mod metrics;
pub mod notification;
pub mod session;

pub use channel::{Channel, ChannelBuilder};
pub use connection::handle::{ClientIdentity, ClientInfo, Connection, ConnectionId};
pub use connection::transport::{Frame, TransportError};
pub use error::{HubError, HubResult};
pub use hub::ChannelHub;
pub use hub::hooks::{ChannelResolver, DataResolver, HubHooks, Resolution};
pub use message::types::{ChannelDef, HubMessage, Method};
pub use notification::listener::{BeforeBroadcast, ChannelListener, LifecycleListeners, NotifyKind};
