use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser};

use crate::{config::HubConfig, error::ConfigError};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:3434")]
    pub listen: SocketAddr,

    /// Page served at `/`.
    #[arg(long, default_value = "static/index.html")]
    pub index: PathBuf,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

/// Per-connection limits and timers.
#[derive(Args, Debug, Clone)]
pub struct TuningArgs {
    /// Messages buffered per connection before a slow reader is evicted.
    #[arg(long, default_value_t = 256)]
    pub queue_capacity: usize,

    /// Largest inbound frame accepted, in bytes.
    #[arg(long, default_value_t = 1024)]
    pub max_frame_bytes: usize,

    /// Seconds between liveness pings.
    #[arg(long, default_value_t = 54)]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before dropping the peer.
    #[arg(long, default_value_t = 60)]
    pub pong_wait_secs: u64,

    /// Seconds allowed for any single write.
    #[arg(long, default_value_t = 10)]
    pub write_wait_secs: u64,
}

impl TuningArgs {
    pub fn to_config(&self) -> Result<HubConfig, ConfigError> {
        HubConfig {
            queue_capacity: self.queue_capacity,
            max_frame_bytes: self.max_frame_bytes,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            pong_wait: Duration::from_secs(self.pong_wait_secs),
            write_wait: Duration::from_secs(self.write_wait_secs),
        }
        .validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_hub_config() {
        let cli = Cli::try_parse_from(["fanout-hub"]).expect("parse defaults");
        assert_eq!(cli.listen, "0.0.0.0:3434".parse().unwrap());
        assert_eq!(cli.index, PathBuf::from("static/index.html"));
        assert_eq!(cli.tuning.to_config().unwrap(), HubConfig::default());
    }

    #[test]
    fn tuning_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "fanout-hub",
            "--listen",
            "127.0.0.1:0",
            "--queue-capacity",
            "8",
            "--ping-interval-secs",
            "5",
            "--pong-wait-secs",
            "6",
        ])
        .expect("parse overrides");
        let config = cli.tuning.to_config().unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.pong_wait, Duration::from_secs(6));
    }

    #[test]
    fn ping_interval_must_precede_deadline() {
        let cli = Cli::try_parse_from(["fanout-hub", "--ping-interval-secs", "90"]).unwrap();
        assert!(matches!(
            cli.tuning.to_config(),
            Err(ConfigError::PingNotBeforeDeadline { .. })
        ));
    }
}
