//! Tunables shared by the hub and every connection pump.

use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024;
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(54);
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Limits and timers applied to every connection.
///
/// The ping interval must stay below the pong wait so a healthy peer always
/// has a chance to answer before its read deadline lapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Messages buffered per connection before it is evicted.
    pub queue_capacity: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_bytes: usize,
    /// How often the outbound pump pings the peer.
    pub ping_interval: Duration,
    /// How long the inbound pump waits for a pong before giving up.
    pub pong_wait: Duration,
    /// Upper bound on any single write.
    pub write_wait: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_wait: DEFAULT_PONG_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
        }
    }
}

impl HubConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::ZeroFrameLimit);
        }
        if self.write_wait.is_zero() {
            return Err(ConfigError::ZeroWriteWait);
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::ZeroPingInterval);
        }
        if self.ping_interval >= self.pong_wait {
            return Err(ConfigError::PingNotBeforeDeadline {
                ping_interval: self.ping_interval,
                pong_wait: self.pong_wait,
            });
        }
        Ok(self)
    }
}
