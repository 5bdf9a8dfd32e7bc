//! Server configuration.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a notification fan-out pass reacts to a failed write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FanoutPolicy {
    /// Stop the pass at the first recipient whose write fails.
    #[default]
    FailFast,
    /// Log the failed write and keep delivering to the remaining recipients.
    BestEffort,
}

impl FanoutPolicy {
    /// Wire/CLI spelling of the policy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailFast => "fail-fast",
            Self::BestEffort => "best-effort",
        }
    }
}

impl fmt::Display for FanoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FanoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail-fast" => Ok(Self::FailFast),
            "best-effort" => Ok(Self::BestEffort),
            other => Err(format!(
                "unknown fan-out policy '{other}' (expected 'fail-fast' or 'best-effort')"
            )),
        }
    }
}

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (default `0.0.0.0:8080`).
    pub addr: SocketAddr,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Max inbound `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// How long a closing session waits for queued frames to be written.
    pub flush_timeout_ms: u64,
    /// Behaviour of a fan-out pass when one recipient cannot be written to.
    pub fanout_policy: FanoutPolicy,
}

impl ServerConfig {
    /// Flush timeout as a [`Duration`].
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            outbound_buffer: 256,
            max_message_size: 1024 * 1024, // 1 MiB
            flush_timeout_ms: 1000,
            fanout_policy: FanoutPolicy::FailFast,
        }
    }
}
