/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Configuration structures for the monitoring engine

use crate::error::{MonitoringError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for retention settings, one century
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Main monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Seconds between two sampling cycles of the monitoring loop
    pub performance_sample_interval_secs: u64,

    /// Seconds to wait after a failed sampling cycle
    pub error_backoff_secs: u64,

    /// Seconds between two retention sweeps
    pub cleanup_interval_secs: u64,

    /// Metrics collector configuration
    pub collector: CollectorConfig,

    /// Performance monitor configuration
    pub performance: PerformanceConfig,

    /// Alert manager configuration
    pub alerting: AlertingConfig,

    /// Snapshot storage configuration
    pub storage: StorageConfig,
}

/// Metrics collector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Historical entries older than this are dropped by retention sweeps
    pub retention_days: u32,

    /// Maximum number of historical entries kept per metric name
    pub max_history_per_metric: usize,
}

/// Performance monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Operations running longer than this are reported by `check_timeouts`
    pub timeout_threshold_secs: f64,

    /// Interval over which CPU usage is measured
    pub cpu_sample_interval_ms: u64,

    /// Per-operation duration history cap
    pub max_duration_samples: usize,

    /// Samples kept once the cap is exceeded
    pub trimmed_duration_samples: usize,
}

/// Alert manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Webhook receiving alert notifications
    pub webhook_url: Option<String>,

    /// Webhook request timeout
    pub webhook_timeout_secs: u64,

    /// Maximum number of events kept in the alert history
    pub max_alert_history: usize,

    /// Alert events older than this are dropped by retention sweeps
    pub alert_retention_days: u32,
}

/// Snapshot storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Maximum number of stored snapshots
    pub max_entries: usize,

    /// Snapshots kept once the cap is exceeded
    pub trimmed_entries: usize,
}

impl MonitoringConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.performance_sample_interval_secs == 0 {
            return Err(MonitoringError::config(
                "performance_sample_interval_secs must be greater than zero",
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(MonitoringError::config(
                "cleanup_interval_secs must be greater than zero",
            ));
        }
        if self.performance.trimmed_duration_samples > self.performance.max_duration_samples {
            return Err(MonitoringError::config(
                "performance.trimmed_duration_samples exceeds max_duration_samples",
            ));
        }
        if self.storage.trimmed_entries > self.storage.max_entries {
            return Err(MonitoringError::config(
                "storage.trimmed_entries exceeds max_entries",
            ));
        }
        for (key, days) in [
            ("collector.retention_days", self.collector.retention_days),
            ("alerting.alert_retention_days", self.alerting.alert_retention_days),
        ] {
            if days > MAX_RETENTION_DAYS {
                return Err(MonitoringError::config(format!(
                    "{} must not exceed {} days",
                    key, MAX_RETENTION_DAYS
                )));
            }
        }
        let timeout = self.performance.timeout_threshold_secs;
        if Duration::try_from_secs_f64(timeout).is_err() {
            return Err(MonitoringError::config(
                "performance.timeout_threshold_secs must be a non-negative number",
            ));
        }
        if let Some(url) = &self.alerting.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(MonitoringError::config(format!(
                    "alerting.webhook_url is not an http(s) url: {}",
                    url
                )));
            }
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.performance_sample_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl PerformanceConfig {
    /// Saturates out-of-range values; negative or NaN thresholds become zero
    pub fn timeout_threshold(&self) -> Duration {
        let secs = self.timeout_threshold_secs;
        Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 { Duration::MAX } else { Duration::ZERO })
    }

    pub fn cpu_sample_interval(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_interval_ms)
    }
}

impl AlertingConfig {
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            performance_sample_interval_secs: 60,
            error_backoff_secs: 60,
            cleanup_interval_secs: 3600, // 1 hour
            collector: CollectorConfig::default(),
            performance: PerformanceConfig::default(),
            alerting: AlertingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            max_history_per_metric: 10_000,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            timeout_threshold_secs: 30.0,
            cpu_sample_interval_ms: 1000,
            max_duration_samples: 1000,
            trimmed_duration_samples: 500,
        }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_secs: 10,
            max_alert_history: 10_000,
            alert_retention_days: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            trimmed_entries: 5_000,
        }
    }
}
