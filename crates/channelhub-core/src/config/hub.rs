//! Channel hub configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Channel hub (pub/sub broker) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Maximum number of channels a session may create lazily from the
    /// client side. `0` means the default.
    #[serde(default = "default_create_channel_limit")]
    pub client_create_channel_limit: usize,
    /// Maximum accepted channel id length. `0` means the default.
    #[serde(default = "default_channel_id_length_limit")]
    pub channel_id_length_limit: usize,
    /// Capacity of the control, register, unregister and notification queues.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Capacity of each connection's outbound queue.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer_size: usize,
    /// Interval between keepalive pings in seconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_seconds: u64,
    /// Read deadline in seconds; a connection silent for longer is dead.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_seconds: u64,
    /// Time allowed for a single write in seconds.
    #[serde(default = "default_write_wait")]
    pub write_wait_seconds: u64,
}

impl HubConfig {
    /// Returns a copy with zero values replaced by their defaults.
    pub fn normalized(mut self) -> Self {
        if self.client_create_channel_limit == 0 {
            self.client_create_channel_limit = default_create_channel_limit();
        }
        if self.channel_id_length_limit == 0 {
            self.channel_id_length_limit = default_channel_id_length_limit();
        }
        if self.queue_capacity == 0 {
            self.queue_capacity = default_queue_capacity();
        }
        if self.outbound_buffer_size == 0 {
            self.outbound_buffer_size = default_outbound_buffer();
        }
        if self.ping_interval_seconds == 0 {
            self.ping_interval_seconds = default_ping_interval();
        }
        if self.pong_wait_seconds == 0 {
            self.pong_wait_seconds = default_pong_wait();
        }
        if self.write_wait_seconds == 0 {
            self.write_wait_seconds = default_write_wait();
        }
        self
    }

    /// Keepalive ping period.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }

    /// Read deadline.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }

    /// Write deadline.
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_seconds)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_create_channel_limit: default_create_channel_limit(),
            channel_id_length_limit: default_channel_id_length_limit(),
            queue_capacity: default_queue_capacity(),
            outbound_buffer_size: default_outbound_buffer(),
            ping_interval_seconds: default_ping_interval(),
            pong_wait_seconds: default_pong_wait(),
            write_wait_seconds: default_write_wait(),
        }
    }
}

fn default_create_channel_limit() -> usize {
    10
}

fn default_channel_id_length_limit() -> usize {
    140
}

fn default_queue_capacity() -> usize {
    200
}

fn default_outbound_buffer() -> usize {
    20
}

fn default_ping_interval() -> u64 {
    54
}

fn default_pong_wait() -> u64 {
    60
}

fn default_write_wait() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_replaces_zero_limits() {
        let config = HubConfig {
            client_create_channel_limit: 0,
            channel_id_length_limit: 0,
            ping_interval_seconds: 0,
            ..HubConfig::default()
        }
        .normalized();
        assert_eq!(config.client_create_channel_limit, 10);
        assert_eq!(config.channel_id_length_limit, 140);
        assert_eq!(config.ping_interval(), Duration::from_secs(54));
    }

    #[test]
    fn test_ping_period_shorter_than_read_deadline() {
        let config = HubConfig::default();
        assert!(config.ping_interval() < config.pong_wait());
    }
}
