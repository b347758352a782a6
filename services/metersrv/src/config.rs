//! Service configuration
//!
//! ```yaml
//! serial:
//!   port: /dev/ttyUSB0
//!   baudRate: 9600
//!   slaveID: 12
//! poller:
//!   period_ms: 1000
//! logging:
//!   level: info
//! snapshot_path: data/saved_serial_config.json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::LogConfig;
use errors::{MeterError, MeterResult};
use meter_modbus::SerialConfig;
use serde::{Deserialize, Serialize};

pub const SERVICE_NAME: &str = "metersrv";
pub const ENV_PREFIX: &str = "METERSRV";
pub const DEFAULT_SNAPSHOT_PATH: &str = "data/saved_serial_config.json";

// Default value functions for serde
fn default_period_ms() -> u64 {
    1000
}
fn default_full_read_every() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_step_ms() -> u64 {
    100
}
fn default_settle_ms() -> u64 {
    200
}
fn default_segment_timeout_ms() -> u64 {
    500
}
fn default_max_segments() -> u32 {
    10
}
fn default_segment_pause_ms() -> u64 {
    50
}
fn default_drain_attempts() -> u32 {
    5
}
fn default_drain_timeout_ms() -> u64 {
    10
}
fn default_failure_streak() -> u32 {
    3
}

/// Timing of the acquisition loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerOptions {
    /// Tick period
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Every Nth tick also reads the energy block
    #[serde(default = "default_full_read_every")]
    pub full_read_every: u64,
    /// Attempts per register block
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wait before retry `n` is `n × backoff_step_ms`
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    /// Pause between request and first read
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_segment_timeout_ms")]
    pub segment_timeout_ms: u64,
    #[serde(default = "default_max_segments")]
    pub max_segments: u32,
    /// Pause after a partial segment
    #[serde(default = "default_segment_pause_ms")]
    pub segment_pause_ms: u64,
    /// Stale-byte reads before each request
    #[serde(default = "default_drain_attempts")]
    pub drain_attempts: u32,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Cycles without an accepted reading before the status reports an error
    #[serde(default = "default_failure_streak")]
    pub failure_streak_threshold: u32,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            full_read_every: default_full_read_every(),
            max_retries: default_max_retries(),
            backoff_step_ms: default_backoff_step_ms(),
            settle_ms: default_settle_ms(),
            segment_timeout_ms: default_segment_timeout_ms(),
            max_segments: default_max_segments(),
            segment_pause_ms: default_segment_pause_ms(),
            drain_attempts: default_drain_attempts(),
            drain_timeout_ms: default_drain_timeout_ms(),
            failure_streak_threshold: default_failure_streak(),
        }
    }
}

impl PollerOptions {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_step_ms * u64::from(attempt + 1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn segment_timeout(&self) -> Duration {
        Duration::from_millis(self.segment_timeout_ms)
    }

    pub fn segment_pause(&self) -> Duration {
        Duration::from_millis(self.segment_pause_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> MeterResult<()> {
        let invalid = |field: &str, reason: &str| MeterError::InvalidConfig {
            field: format!("poller.{field}"),
            reason: reason.to_string(),
        };
        if self.period_ms == 0 {
            return Err(invalid("period_ms", "must be non-zero"));
        }
        if self.full_read_every == 0 {
            return Err(invalid("full_read_every", "must be non-zero"));
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries", "must be at least 1"));
        }
        if self.max_segments == 0 {
            return Err(invalid("max_segments", "must be at least 1"));
        }
        Ok(())
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub serial: SerialConfig,
    pub poller: PollerOptions,
    pub logging: LogConfig,
    pub snapshot_path: PathBuf,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            poller: PollerOptions::default(),
            logging: LogConfig {
                service_name: SERVICE_NAME.to_string(),
                ..LogConfig::default()
            },
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
        }
    }
}

impl MeterConfig {
    /// Defaults < file < `METERSRV_*` environment
    pub fn load(path: Option<&Path>) -> MeterResult<Self> {
        let config: MeterConfig = common::load_config(path, ENV_PREFIX)?;
        config.poller.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let opts = PollerOptions::default();
        assert_eq!(opts.period(), Duration::from_secs(1));
        assert_eq!(opts.full_read_every, 10);
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.backoff(0), Duration::from_millis(100));
        assert_eq!(opts.backoff(1), Duration::from_millis(200));
        assert_eq!(opts.settle(), Duration::from_millis(200));
        assert_eq!(opts.segment_timeout(), Duration::from_millis(500));
        assert_eq!(opts.max_segments, 10);
        assert_eq!(opts.drain_attempts, 5);
        assert_eq!(opts.failure_streak_threshold, 3);
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        let opts = PollerOptions {
            period_ms: 0,
            ..PollerOptions::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(MeterError::InvalidConfig { ref field, .. }) if field == "poller.period_ms"
        ));
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "serial:\n  port: /dev/ttyUSB0\n  slaveID: 12\npoller:\n  period_ms: 250\n";
        let config: MeterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.slave_id, 12);
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.poller.period_ms, 250);
        assert_eq!(config.poller.max_retries, 3);
        assert_eq!(config.snapshot_path, PathBuf::from(DEFAULT_SNAPSHOT_PATH));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metersrv.yaml");
        std::fs::write(&path, "serial:\n  port: COM7\n  slaveID: 3\n").unwrap();

        let config = MeterConfig::load(Some(&path)).unwrap();
        assert_eq!(config.serial.port, "COM7");
        assert_eq!(config.logging.service_name, "metersrv");
    }
}
