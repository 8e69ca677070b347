//! Hub error types.

use thiserror::Error;

use channelhub_core::error::{AppError, ErrorKind};

use crate::connection::transport::TransportError;

/// Errors surfaced to callers of the hub API.
///
/// Authorization denials are not errors: unauthorized subscribe, publish
/// and update requests are dropped without a reply.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub has not been started, or has been closed.
    #[error("hub not running")]
    NotRunning,
    /// `run` was called twice, or `put` was called after `run`.
    #[error("hub is already running")]
    AlreadyRunning,
    /// The hub was closed and cannot be started again.
    #[error("hub has been closed")]
    Closed,
    /// `put` was called without any channel.
    #[error("at least one channel must be provided")]
    EmptyDeclaration,
    /// A channel declaration is malformed.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),
    /// A dynamic channel template could not be compiled.
    #[error("invalid channel template '{template}': {source}")]
    InvalidTemplate {
        /// The offending template.
        template: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A message could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for hub operations.
pub type HubResult<T> = Result<T, HubError>;

impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        let kind = match &err {
            HubError::NotRunning | HubError::Closed => ErrorKind::ServiceUnavailable,
            HubError::EmptyDeclaration
            | HubError::InvalidChannel(_)
            | HubError::InvalidTemplate { .. } => ErrorKind::Validation,
            HubError::Serialization(_) => ErrorKind::Serialization,
            HubError::AlreadyRunning | HubError::Transport(_) => ErrorKind::Internal,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}
