//! Transport boundary.
//!
//! The hub never touches a socket. Connections are admitted as a pair of
//! frame stream and frame sink; the HTTP layer adapts WebSocket halves to
//! these types and tests use in-memory channels.

use std::pin::Pin;

use futures::{Sink, Stream};
use thiserror::Error;

/// A transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One JSON-encoded hub message.
    Text(String),
    /// Keepalive probe.
    Ping(Vec<u8>),
    /// Keepalive answer.
    Pong(Vec<u8>),
    /// The peer is going away.
    Close,
}

/// Failure reading from or writing to a transport.
#[derive(Debug, Clone, Error)]
#[error("transport error: {0}")]
pub struct TransportError(String);

impl TransportError {
    /// Wraps any displayable error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub(crate) type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

pub(crate) type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
