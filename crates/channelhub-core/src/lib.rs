//! # channelhub-core
//!
//! Core crate for ChannelHub. Contains the configuration schemas and the
//! unified error system shared by the broker, the HTTP surface and the
//! server binary.
//!
//! This crate has **no** internal dependencies on other ChannelHub crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
