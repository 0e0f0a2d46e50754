//! Client timing and probe configuration

use std::time::Duration;

use hdmx_protocol::{OutputPort, PORT_COUNT};
use serde::{Deserialize, Serialize};

/// How the current input of an output is inferred when nothing is cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStrategy {
    /// Nudge down, observe, nudge back up
    #[default]
    Symmetric,
    /// Nudge up, observe, then route the previous input back explicitly
    IncreaseOnly,
}

/// Configuration for a [`MatrixClient`](crate::MatrixClient)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Delay after a route command before returning to the caller
    pub set_settle_ms: u64,
    /// Delay between a probe nudge and reading its response
    pub probe_settle_ms: u64,
    /// Maximum wait for the status line answering a probe nudge
    pub probe_timeout_ms: u64,
    /// Maximum wait for the status line confirming a restore
    pub restore_timeout_ms: u64,
    /// Maximum wait for the status line answering the fallback query
    pub fallback_timeout_ms: u64,
    /// Back-off after a transient read error
    pub read_backoff_ms: u64,
    /// Deadline for a single command write
    pub write_timeout_ms: u64,
    /// Probe strategy per output, indexed from `OUT1`
    pub probe_strategies: [ProbeStrategy; PORT_COUNT as usize],
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            set_settle_ms: 100,
            probe_settle_ms: 300,
            probe_timeout_ms: 3000,
            restore_timeout_ms: 1000,
            fallback_timeout_ms: 1000,
            read_backoff_ms: 1000,
            write_timeout_ms: 2000,
            probe_strategies: [ProbeStrategy::Symmetric; PORT_COUNT as usize],
        }
    }
}

impl ClientConfig {
    /// Use `strategy` when probing `output`
    pub fn with_strategy(mut self, output: OutputPort, strategy: ProbeStrategy) -> Self {
        self.probe_strategies[output.index()] = strategy;
        self
    }

    /// Probe strategy for an output
    pub fn strategy_for(&self, output: OutputPort) -> ProbeStrategy {
        self.probe_strategies[output.index()]
    }

    pub fn set_settle(&self) -> Duration {
        Duration::from_millis(self.set_settle_ms)
    }

    pub fn probe_settle(&self) -> Duration {
        Duration::from_millis(self.probe_settle_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_millis(self.restore_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.read_backoff(), Duration::from_secs(1));
        assert_eq!(config.probe_timeout(), Duration::from_secs(3));
        assert!(config
            .probe_strategies
            .iter()
            .all(|s| *s == ProbeStrategy::Symmetric));
    }

    #[test]
    fn test_with_strategy() {
        let out3 = OutputPort::new(3).unwrap();
        let config = ClientConfig::default().with_strategy(out3, ProbeStrategy::IncreaseOnly);
        assert_eq!(config.strategy_for(out3), ProbeStrategy::IncreaseOnly);
        assert_eq!(
            config.strategy_for(OutputPort::new(1).unwrap()),
            ProbeStrategy::Symmetric
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"probe_timeout_ms": 500, "probe_strategies": ["symmetric", "increase_only", "symmetric", "symmetric"]}"#,
        )
        .unwrap();
        assert_eq!(config.probe_timeout_ms, 500);
        assert_eq!(config.set_settle_ms, 100);
        assert_eq!(
            config.strategy_for(OutputPort::new(2).unwrap()),
            ProbeStrategy::IncreaseOnly
        );
    }
}
