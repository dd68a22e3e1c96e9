//! Configuration Management
//!
//! Settings for the multicast demo, loaded from an optional JSON file.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use shmcast::disruptor::wait_strategy;

/// Demo configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Number of consumers joining the region
    pub consumers: usize,
    /// Number of values the producer publishes
    pub messages: u64,
    /// Wait strategy name (`busy-spin`, `spin-hint` or `backoff`)
    pub wait_strategy: String,
    /// Log level (`trace` through `error`)
    pub log_level: String,
    /// Pin the producer and each consumer to their own core
    pub pin_cores: bool,
    /// How long a consumer waits for the next value before giving up
    pub recv_timeout_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            consumers: 3,
            messages: 1_000_000,
            wait_strategy: "spin-hint".to_string(),
            log_level: "info".to_string(),
            pin_cores: false,
            recv_timeout_ms: 5_000,
        }
    }
}

impl DemoConfig {
    /// Load from `path`, or use the defaults when no path is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_json(&content)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    /// Parse a JSON document; missing fields take their default
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Reject settings the demo cannot run with
    pub fn validate(&self, reader_slots: usize) -> anyhow::Result<()> {
        if self.consumers == 0 {
            bail!("at least one consumer is required");
        }
        if self.consumers > reader_slots {
            bail!(
                "{} consumers requested but the region has {reader_slots} reader slots",
                self.consumers
            );
        }
        if wait_strategy::from_name(&self.wait_strategy).is_none() {
            bail!("unknown wait strategy: {}", self.wait_strategy);
        }
        self.level(None)?;
        Ok(())
    }

    /// Effective log level: a command line override wins over the file
    pub fn level(&self, override_level: Option<&str>) -> anyhow::Result<tracing::Level> {
        let raw = override_level.unwrap_or(&self.log_level);
        raw.parse()
            .map_err(|_| anyhow::anyhow!("invalid log level: {raw}"))
    }

    /// Consumer receive timeout
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}
