//! Fallback for unmatched routes.

use axum::http::Uri;

use channelhub_core::error::AppError;

use crate::error::ApiError;

/// Any route without a handler.
pub async fn not_found(uri: Uri) -> ApiError {
    AppError::not_found(format!("No route for {}", uri.path())).into()
}
