//! Engine configuration with TOML file support.

use std::path::Path;
use std::time::Duration;

use bitswap_utils::{init_logging, LogFormat};
use serde::{Deserialize, Serialize};

use crate::strategy::StrategyKind;
use crate::EngineError;

/// Configuration for a decision [`Engine`](crate::Engine).
///
/// Can be loaded from a TOML file via [`EngineConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of workers draining the request queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Tasks a single partner may have in flight at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_per_partner: usize,

    /// Debt ratio below which an observation window counts against a peer.
    #[serde(default = "default_debt_ratio_threshold")]
    pub debt_ratio_threshold: f64,

    /// A partner freezes once its freeze value exceeds this.
    #[serde(default = "default_freeze_ceiling")]
    pub freeze_ceiling: u32,

    /// Amount removed from each frozen partner's value per decay tick.
    #[serde(default = "default_freeze_decay_step")]
    pub freeze_decay_step: u32,

    #[serde(default = "default_observation_interval_ms")]
    pub observation_interval_ms: u64,

    #[serde(default = "default_decay_interval_ms")]
    pub decay_interval_ms: u64,

    /// Bytes a peer may receive before its debt ratio is judged.
    #[serde(default = "default_grace_bytes")]
    pub grace_bytes: u64,

    /// Attempts after the first before a failing task is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub strategy: StrategyKind,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_workers() -> usize {
    8
}

fn default_max_in_flight() -> usize {
    4
}

fn default_debt_ratio_threshold() -> f64 {
    0.5
}

fn default_freeze_ceiling() -> u32 {
    3
}

fn default_freeze_decay_step() -> u32 {
    1
}

fn default_observation_interval_ms() -> u64 {
    10_000
}

fn default_decay_interval_ms() -> u64 {
    30_000
}

fn default_grace_bytes() -> u64 {
    1024 * 1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("EngineConfig is always serializable to TOML")
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.workers == 0 {
            return Err(EngineError::Config("workers must be at least 1".into()));
        }
        if self.max_in_flight_per_partner == 0 {
            return Err(EngineError::Config(
                "max_in_flight_per_partner must be at least 1".into(),
            ));
        }
        if !self.debt_ratio_threshold.is_finite() || self.debt_ratio_threshold < 0.0 {
            return Err(EngineError::Config(format!(
                "debt_ratio_threshold must be a non-negative number, got {}",
                self.debt_ratio_threshold
            )));
        }
        if self.freeze_ceiling == 0 {
            // A partner at zero could never thaw below the ceiling.
            return Err(EngineError::Config("freeze_ceiling must be at least 1".into()));
        }
        if self.freeze_decay_step == 0 {
            return Err(EngineError::Config("freeze_decay_step must be at least 1".into()));
        }
        if self.observation_interval_ms == 0 || self.decay_interval_ms == 0 {
            return Err(EngineError::Config("intervals must be non-zero".into()));
        }
        Ok(())
    }

    /// Install the global tracing subscriber with this config's format and level.
    pub fn init_logging(&self) -> Result<(), EngineError> {
        init_logging(self.log_format, &self.log_level)?;
        Ok(())
    }

    pub fn observation_interval(&self) -> Duration {
        Duration::from_millis(self.observation_interval_ms)
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_millis(self.decay_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_in_flight_per_partner: default_max_in_flight(),
            debt_ratio_threshold: default_debt_ratio_threshold(),
            freeze_ceiling: default_freeze_ceiling(),
            freeze_decay_step: default_freeze_decay_step(),
            observation_interval_ms: default_observation_interval_ms(),
            decay_interval_ms: default_decay_interval_ms(),
            grace_bytes: default_grace_bytes(),
            max_retries: default_max_retries(),
            strategy: StrategyKind::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
        }
    }
}
