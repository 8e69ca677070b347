//! # channelhub-api
//!
//! HTTP layer for ChannelHub built on Axum.
//!
//! Upgrades `/ws` requests into hub connections and exposes health
//! endpoints. Authentication is left to the embedding server: the user
//! identity arrives as a query parameter set by a trusted front end.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
