//! The channel hub: public facade, control loop and injected collaborators.

pub(crate) mod control;
pub mod hooks;
pub mod hub;

pub use hooks::{ChannelResolver, DataResolver, HubHooks, Resolution};
pub use hub::ChannelHub;
