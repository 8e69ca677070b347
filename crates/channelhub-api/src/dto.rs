//! Response bodies.

use serde::{Deserialize, Serialize};

use channelhub_realtime::metrics::MetricsSnapshot;

/// Standard success response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status.
    pub status: String,
    /// Version.
    pub version: String,
}

/// Detailed health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedHealthResponse {
    /// `ok` while the hub runs, `degraded` otherwise.
    pub status: String,
    /// Version.
    pub version: String,
    /// Whether the hub control loop is running.
    pub running: bool,
    /// Registered channel instances.
    pub channels: usize,
    /// Live sessions.
    pub sessions: usize,
    /// Hub counters.
    pub metrics: MetricsSnapshot,
}
