//! Peer monitor configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    8080
}

fn default_check_interval_ms() -> u64 {
    5_000
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_failure_threshold() -> u32 {
    3
}

/// Where the paired station lives and how hard to poll it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Probe deadline; an expired probe counts as a failure
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Consecutive failures before the peer is declared down
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl PeerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            check_interval_ms: default_check_interval_ms(),
            timeout_ms: default_timeout_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `http://<host>:<port>/health`
    pub fn health_url(&self) -> String {
        format!("http://{}:{}/health", self.host, self.port)
    }
}
