//! Convenience result type alias for ChannelHub.

use crate::error::AppError;

/// A specialized `Result` type for ChannelHub operations.
pub type AppResult<T> = Result<T, AppError>;
