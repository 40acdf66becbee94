/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Operation timing, timeout detection, OS resource sampling and trend analysis

use crate::config::PerformanceConfig;
use crate::error::Result;
use crate::stats;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Disks, System};
use tracing::{debug, warn};
use uuid::Uuid;

/// Minimum number of samples before a trend is computed
const MIN_TREND_SAMPLES: usize = 5;

/// Number of most recent samples compared against the rest
const RECENT_WINDOW: usize = 10;

/// An operation being timed
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: Uuid,
    pub name: String,
    pub start_time: Instant,
}

/// An active operation that exceeded the timeout threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutReport {
    pub operation_id: Uuid,
    pub operation: String,
    /// Elapsed seconds
    pub duration: f64,
    /// Threshold in seconds
    pub threshold: f64,
}

/// Point-in-time OS resource usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemResources {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Bytes
    pub memory_available: u64,
    /// Bytes
    pub memory_total: u64,
    /// Percent of the root filesystem in use
    pub disk_usage: f64,
    /// Bytes
    pub disk_free: u64,
    /// Bytes
    pub disk_total: u64,
    pub timestamp: DateTime<Utc>,
}

impl SystemResources {
    /// Numeric fields keyed by name, as recorded into the collector
    pub fn to_metric_map(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("cpu_percent".to_string(), self.cpu_percent),
            ("memory_percent".to_string(), self.memory_percent),
            ("memory_available".to_string(), self.memory_available as f64),
            ("memory_total".to_string(), self.memory_total as f64),
            ("disk_usage".to_string(), self.disk_usage),
            ("disk_free".to_string(), self.disk_free as f64),
            ("disk_total".to_string(), self.disk_total as f64),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Degrading,
    Stable,
}

/// Result of [`PerformanceMonitor::analyze_trends`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrendAnalysis {
    /// Fewer than five durations recorded
    InsufficientData,
    /// No samples older than the recent window
    InsufficientHistoricalData,
    Analyzed {
        /// Mean of the recent window, in seconds
        average_duration: f64,
        trend_direction: TrendDirection,
        confidence: f64,
        sample_size: usize,
    },
}

/// Times operations and samples host resources
#[derive(Debug)]
pub struct PerformanceMonitor {
    active: Mutex<HashMap<Uuid, Operation>>,
    durations: Mutex<HashMap<String, Vec<f64>>>,
    system: Mutex<System>,
    timeout_threshold: Duration,
    cpu_sample_interval: Duration,
    max_samples: usize,
    trimmed_samples: usize,
}

impl PerformanceMonitor {
    pub fn new(config: &PerformanceConfig) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            durations: Mutex::new(HashMap::new()),
            system: Mutex::new(System::new()),
            timeout_threshold: config.timeout_threshold(),
            cpu_sample_interval: config.cpu_sample_interval(),
            max_samples: config.max_duration_samples.max(1),
            trimmed_samples: config.trimmed_duration_samples.min(config.max_duration_samples),
        }
    }

    /// Monitor with default settings and a custom timeout threshold
    pub fn with_timeout_threshold(timeout_threshold: Duration) -> Self {
        let config = PerformanceConfig {
            timeout_threshold_secs: timeout_threshold.as_secs_f64(),
            ..PerformanceConfig::default()
        };
        Self::new(&config)
    }

    pub fn timeout_threshold(&self) -> Duration {
        self.timeout_threshold
    }

    /// Start timing an operation
    pub fn start_operation(&self, name: impl Into<String>) -> Uuid {
        let operation = Operation {
            id: Uuid::new_v4(),
            name: name.into(),
            start_time: Instant::now(),
        };
        let id = operation.id;
        self.active.lock().insert(id, operation);
        id
    }

    /// Stop timing an operation and return its duration in seconds.
    ///
    /// Unknown or already completed ids yield `0.0`.
    pub fn complete_operation(&self, id: Uuid) -> f64 {
        let Some(operation) = self.active.lock().remove(&id) else {
            debug!("Completion for unknown operation {}", id);
            return 0.0;
        };

        let duration = operation.start_time.elapsed().as_secs_f64();
        self.record_duration(&operation.name, duration);
        duration
    }

    /// Fold an externally measured duration (seconds) into the history of `name`
    pub fn record_duration(&self, name: &str, duration_secs: f64) {
        let mut durations = self.durations.lock();
        let samples = durations.entry(name.to_string()).or_default();
        samples.push(duration_secs);
        if samples.len() > self.max_samples {
            let excess = samples.len() - self.trimmed_samples;
            samples.drain(..excess);
        }
    }

    /// Active operations running longer than the timeout threshold
    pub fn check_timeouts(&self) -> Vec<TimeoutReport> {
        let threshold = self.timeout_threshold.as_secs_f64();
        let active = self.active.lock();

        active
            .values()
            .filter_map(|operation| {
                let elapsed = operation.start_time.elapsed();
                (elapsed > self.timeout_threshold).then(|| TimeoutReport {
                    operation_id: operation.id,
                    operation: operation.name.clone(),
                    duration: elapsed.as_secs_f64(),
                    threshold,
                })
            })
            .collect()
    }

    pub fn active_operation_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Recorded durations for `name`, oldest first
    pub fn get_durations(&self, name: &str) -> Vec<f64> {
        self.durations.lock().get(name).cloned().unwrap_or_default()
    }

    /// Sample OS resource usage.
    ///
    /// Blocks for the CPU measurement interval. Returns `None` when the host
    /// does not report memory figures.
    pub fn get_system_resources(&self) -> Option<SystemResources> {
        let mut system = self.system.lock();

        system.refresh_cpu_usage();
        std::thread::sleep(self.cpu_sample_interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL));
        system.refresh_cpu_usage();
        let cpu_percent = f64::from(system.global_cpu_usage());

        system.refresh_memory();
        let memory_total = system.total_memory();
        let memory_available = system.available_memory();
        drop(system);

        if memory_total == 0 || !cpu_percent.is_finite() {
            warn!("System resource sampling returned no data");
            return None;
        }
        let memory_percent =
            memory_total.saturating_sub(memory_available) as f64 / memory_total as f64 * 100.0;

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_free) = match disks.iter().find(|d| d.mount_point() == Path::new("/")) {
            Some(root) => (root.total_space(), root.available_space()),
            None => disks.iter().fold((0u64, 0u64), |(total, free), disk| {
                (total + disk.total_space(), free + disk.available_space())
            }),
        };
        let disk_usage = if disk_total > 0 {
            disk_total.saturating_sub(disk_free) as f64 / disk_total as f64 * 100.0
        } else {
            0.0
        };

        Some(SystemResources {
            cpu_percent,
            memory_percent,
            memory_available,
            memory_total,
            disk_usage,
            disk_free,
            disk_total,
            timestamp: Utc::now(),
        })
    }

    /// Run [`Self::get_system_resources`] on the blocking thread pool
    pub async fn sample_system_resources(self: &Arc<Self>) -> Result<Option<SystemResources>> {
        let monitor = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || monitor.get_system_resources()).await?)
    }

    /// Compare the last ten durations of `name` against everything before them
    pub fn analyze_trends(&self, name: &str) -> TrendAnalysis {
        let samples = self.get_durations(name);
        if samples.len() < MIN_TREND_SAMPLES {
            return TrendAnalysis::InsufficientData;
        }

        let split = samples.len().saturating_sub(RECENT_WINDOW);
        let (historical, recent) = samples.split_at(split);
        if historical.is_empty() {
            return TrendAnalysis::InsufficientHistoricalData;
        }

        let recent_mean = stats::mean(recent);
        let historical_mean = stats::mean(historical);

        let trend_direction = if recent_mean > historical_mean * 1.1 {
            TrendDirection::Degrading
        } else if recent_mean < historical_mean * 0.9 {
            TrendDirection::Improving
        } else {
            TrendDirection::Stable
        };

        let confidence = if recent_mean > 0.0 {
            (1.0 - stats::std_dev(recent) / recent_mean).clamp(0.0, 1.0)
        } else {
            0.0
        };

        TrendAnalysis::Analyzed {
            average_duration: recent_mean,
            trend_direction,
            confidence,
            sample_size: samples.len(),
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(&PerformanceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_lifecycle() {
        let monitor = PerformanceMonitor::default();
        let id = monitor.start_operation("sql_query");
        assert_eq!(monitor.active_operation_count(), 1);

        std::thread::sleep(Duration::from_millis(5));
        let duration = monitor.complete_operation(id);
        assert!(duration > 0.0);
        assert_eq!(monitor.active_operation_count(), 0);
        assert_eq!(monitor.get_durations("sql_query").len(), 1);

        // second completion is a no-op
        assert_eq!(monitor.complete_operation(id), 0.0);
        assert_eq!(monitor.complete_operation(Uuid::new_v4()), 0.0);
        assert_eq!(monitor.get_durations("sql_query").len(), 1);
    }

    #[test]
    fn test_operation_ids_are_unique() {
        let monitor = PerformanceMonitor::default();
        let a = monitor.start_operation("upload");
        let b = monitor.start_operation("upload");
        assert_ne!(a, b);
        assert_eq!(monitor.active_operation_count(), 2);
    }

    #[test]
    fn test_check_timeouts() {
        let monitor = PerformanceMonitor::with_timeout_threshold(Duration::from_millis(50));
        let slow = monitor.start_operation("report_generation");
        assert!(monitor.check_timeouts().is_empty());

        std::thread::sleep(Duration::from_millis(80));
        let fast = monitor.start_operation("health_check");
        let reports = monitor.check_timeouts();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].operation_id, slow);
        assert_eq!(reports[0].operation, "report_generation");
        assert!(reports[0].duration > reports[0].threshold);
        assert!((reports[0].threshold - 0.05).abs() < 1e-9);

        // observation does not cancel the operation
        assert_eq!(monitor.active_operation_count(), 2);

        monitor.complete_operation(slow);
        monitor.complete_operation(fast);
        assert!(monitor.check_timeouts().is_empty());
    }

    #[test]
    fn test_duration_history_trimming() {
        let config = PerformanceConfig {
            max_duration_samples: 10,
            trimmed_duration_samples: 5,
            ..PerformanceConfig::default()
        };
        let monitor = PerformanceMonitor::new(&config);
        for i in 0..11 {
            monitor.record_duration("op", i as f64);
        }
        assert_eq!(monitor.get_durations("op"), vec![6.0, 7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn test_trends_insufficient_data() {
        let monitor = PerformanceMonitor::default();
        assert_eq!(monitor.analyze_trends("missing"), TrendAnalysis::InsufficientData);

        for _ in 0..4 {
            monitor.record_duration("op", 1.0);
        }
        assert_eq!(monitor.analyze_trends("op"), TrendAnalysis::InsufficientData);

        for _ in 0..6 {
            monitor.record_duration("op", 1.0);
        }
        assert_eq!(
            monitor.analyze_trends("op"),
            TrendAnalysis::InsufficientHistoricalData
        );
    }

    #[test]
    fn test_trends_stable() {
        let monitor = PerformanceMonitor::default();
        for _ in 0..10 {
            monitor.record_duration("op", 1.0);
        }
        for _ in 0..10 {
            monitor.record_duration("op", 1.05);
        }

        match monitor.analyze_trends("op") {
            TrendAnalysis::Analyzed {
                trend_direction,
                confidence,
                sample_size,
                average_duration,
            } => {
                assert_eq!(trend_direction, TrendDirection::Stable);
                assert_eq!(sample_size, 20);
                assert!((average_duration - 1.05).abs() < 1e-9);
                assert!((confidence - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected analysis: {:?}", other),
        }
    }

    #[test]
    fn test_trends_degrading_and_improving() {
        let degrading = PerformanceMonitor::default();
        let improving = PerformanceMonitor::default();
        for _ in 0..10 {
            degrading.record_duration("op", 1.0);
            improving.record_duration("op", 2.0);
        }
        for _ in 0..10 {
            degrading.record_duration("op", 2.0);
            improving.record_duration("op", 1.0);
        }

        assert!(matches!(
            degrading.analyze_trends("op"),
            TrendAnalysis::Analyzed { trend_direction: TrendDirection::Degrading, .. }
        ));
        assert!(matches!(
            improving.analyze_trends("op"),
            TrendAnalysis::Analyzed { trend_direction: TrendDirection::Improving, .. }
        ));
    }

    #[test]
    fn test_trend_serialization() {
        let json = serde_json::to_value(TrendAnalysis::InsufficientData).unwrap();
        assert_eq!(json, serde_json::json!({"status": "insufficient_data"}));
    }

    #[test]
    fn test_resources_metric_map() {
        let resources = SystemResources {
            cpu_percent: 12.0,
            memory_percent: 40.0,
            memory_available: 600,
            memory_total: 1000,
            disk_usage: 55.5,
            disk_free: 445,
            disk_total: 1000,
            timestamp: Utc::now(),
        };
        let map = resources.to_metric_map();
        assert_eq!(map.len(), 7);
        assert_eq!(map["cpu_percent"], 12.0);
        assert_eq!(map["memory_total"], 1000.0);
    }

    #[tokio::test]
    async fn test_sample_system_resources() {
        let config = PerformanceConfig {
            cpu_sample_interval_ms: 0,
            ..PerformanceConfig::default()
        };
        let monitor = Arc::new(PerformanceMonitor::new(&config));
        if let Some(resources) = monitor.sample_system_resources().await.unwrap() {
            assert!(resources.memory_total > 0);
            assert!((0.0..=100.0).contains(&resources.memory_percent));
            assert!((0.0..=100.0).contains(&resources.disk_usage));
        }
    }
}
