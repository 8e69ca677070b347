//! Wire message types exchanged with clients.

pub mod types;

pub use types::{ChannelDef, HubMessage, Method, Payload};
