//! Channel model: rights, dynamic templates, channel instances and the registry.

pub mod channel;
pub mod dynamic;
pub mod registry;
pub mod rights;

pub use channel::{Channel, ChannelBuilder};
pub use dynamic::{DynamicTemplate, TemplateMatch};
pub use rights::{Access, GrantMode, Requester, Rights};
