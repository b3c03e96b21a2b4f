use std::time::Duration;

use thiserror::Error;

/// Why a connection was torn down.
///
/// Every variant leads to the same recovery: the connection is unregistered
/// and its transport closed. Nothing is retried.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("no frame or pong received within {0:?}")]
    LivenessTimeout(Duration),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    HubClosed(#[from] HubClosed),
}

/// Failure reported by either half of a transport channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] axum::Error),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// The hub task has exited and no longer accepts requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hub is no longer running")]
pub struct HubClosed;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("outbound queue capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("maximum frame size must be at least 1 byte")]
    ZeroFrameLimit,

    #[error("write wait must be non-zero")]
    ZeroWriteWait,

    #[error("ping interval must be non-zero")]
    ZeroPingInterval,

    #[error("ping interval ({ping_interval:?}) must be shorter than the pong wait ({pong_wait:?})")]
    PingNotBeforeDeadline {
        ping_interval: Duration,
        pong_wait: Duration,
    },
}
