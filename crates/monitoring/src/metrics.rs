/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Metric recording, historical series and snapshot export
//!
//! The collector keeps one *current* entry per metric name (last write wins)
//! and an append-only historical series per name. Series are only shortened
//! by [`MetricsCollector::cleanup_old_data`] or by the per-metric cap.

use crate::retention;
use crate::stats;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Metric classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// System or application performance metric
    Performance,
    /// Business level metric (uploads, queries, ...)
    Business,
}

/// A single recorded metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MetricKind,
}

/// Summary statistics over a metric's retained history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub average: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

/// Current metric values partitioned by kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsExport {
    pub performance_metrics: HashMap<String, MetricEntry>,
    pub business_metrics: HashMap<String, MetricEntry>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CollectorState {
    current: HashMap<String, MetricEntry>,
    history: HashMap<String, VecDeque<MetricEntry>>,
}

/// Thread-safe metrics collector
#[derive(Debug)]
pub struct MetricsCollector {
    state: RwLock<CollectorState>,
    max_history_per_metric: usize,
}

impl MetricsCollector {
    /// Create a collector keeping at most `max_history_per_metric` entries per name
    pub fn new(max_history_per_metric: usize) -> Self {
        Self {
            state: RwLock::new(CollectorState::default()),
            max_history_per_metric: max_history_per_metric.max(1),
        }
    }

    /// Record a performance metric
    pub fn record_metric(&self, name: impl Into<String>, value: f64, unit: &str) {
        self.record(name.into(), value, unit, MetricKind::Performance);
    }

    /// Record a business metric
    pub fn record_business_metric(&self, name: impl Into<String>, value: f64, unit: &str) {
        self.record(name.into(), value, unit, MetricKind::Business);
    }

    fn record(&self, name: String, value: f64, unit: &str, kind: MetricKind) {
        let entry = MetricEntry {
            name: name.clone(),
            value,
            unit: unit.to_string(),
            timestamp: Utc::now(),
            kind,
        };

        let mut state = self.state.write();
        let series = state.history.entry(name.clone()).or_default();
        series.push_back(entry.clone());
        while series.len() > self.max_history_per_metric {
            series.pop_front();
        }
        state.current.insert(name, entry);
    }

    /// Summary statistics over the full retained history of `name`
    pub fn get_metrics_summary(&self, name: &str) -> Option<MetricSummary> {
        let values: Vec<f64> = {
            let state = self.state.read();
            state.history.get(name)?.iter().map(|e| e.value).collect()
        };
        if values.is_empty() {
            return None;
        }

        Some(MetricSummary {
            count: values.len(),
            average: stats::mean(&values),
            median: stats::median(&values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            std_dev: stats::std_dev(&values),
        })
    }

    /// Export current values split by kind
    pub fn export_metrics(&self) -> MetricsExport {
        let state = self.state.read();
        let mut performance_metrics = HashMap::new();
        let mut business_metrics = HashMap::new();

        for (name, entry) in &state.current {
            match entry.kind {
                MetricKind::Performance => performance_metrics.insert(name.clone(), entry.clone()),
                MetricKind::Business => business_metrics.insert(name.clone(), entry.clone()),
            };
        }

        MetricsExport {
            performance_metrics,
            business_metrics,
            timestamp: Utc::now(),
        }
    }

    /// Drop historical entries older than `retention_days`
    pub fn cleanup_old_data(&self, retention_days: u32) {
        let cutoff = retention::cutoff(retention::days(retention_days));
        let mut removed = 0usize;

        let mut state = self.state.write();
        for series in state.history.values_mut() {
            // Series are chronological, so expired entries form a prefix.
            while series.front().is_some_and(|e| e.timestamp < cutoff) {
                series.pop_front();
                removed += 1;
            }
        }
        state.history.retain(|_, series| !series.is_empty());

        debug!("Metrics retention sweep removed {} entries", removed);
    }

    /// Copy of the historical series for `name`
    pub fn get_history(&self, name: &str) -> Vec<MetricEntry> {
        self.state
            .read()
            .history
            .get(name)
            .map(|series| series.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Latest entry of every metric
    pub fn current_metrics(&self) -> HashMap<String, MetricEntry> {
        self.state.read().current.clone()
    }

    #[cfg(test)]
    fn backdate(&self, name: &str, age: chrono::Duration) {
        let mut state = self.state.write();
        if let Some(series) = state.history.get_mut(name) {
            for entry in series.iter_mut() {
                entry.timestamp = entry.timestamp - age;
            }
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_export_keeps_latest_value_per_kind() {
        let collector = MetricsCollector::default();
        collector.record_metric("response_time_ms", 120.0, "ms");
        collector.record_metric("response_time_ms", 340.0, "ms");
        collector.record_metric("cpu_percent", 12.5, "%");
        collector.record_business_metric("files_uploaded", 3.0, "");

        let export = collector.export_metrics();
        assert_eq!(export.performance_metrics.len(), 2);
        assert_eq!(export.performance_metrics["response_time_ms"].value, 340.0);
        assert!(!export.performance_metrics.contains_key("files_uploaded"));
        assert_eq!(export.business_metrics["files_uploaded"].value, 3.0);
        assert_eq!(export.business_metrics["files_uploaded"].kind, MetricKind::Business);
    }

    #[test]
    fn test_kind_follows_latest_write() {
        let collector = MetricsCollector::default();
        collector.record_metric("queries", 1.0, "");
        collector.record_business_metric("queries", 2.0, "");

        let export = collector.export_metrics();
        assert!(export.performance_metrics.is_empty());
        assert_eq!(export.business_metrics["queries"].value, 2.0);
    }

    #[test]
    fn test_summary() {
        let collector = MetricsCollector::default();
        assert!(collector.get_metrics_summary("latency").is_none());

        for value in [10.0, 20.0, 30.0, 40.0] {
            collector.record_metric("latency", value, "ms");
        }
        let summary = collector.get_metrics_summary("latency").unwrap();
        assert_eq!(summary.count, 4);
        assert_eq!(summary.average, 25.0);
        assert_eq!(summary.median, 25.0);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 40.0);
        assert!(summary.min <= summary.average && summary.average <= summary.max);
        assert!(summary.std_dev > 0.0);
    }

    #[test]
    fn test_summary_single_sample() {
        let collector = MetricsCollector::default();
        collector.record_metric("latency", 7.0, "ms");
        let summary = collector.get_metrics_summary("latency").unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.std_dev, 0.0);
    }

    #[test]
    fn test_history_cap() {
        let collector = MetricsCollector::new(3);
        for i in 0..5 {
            collector.record_metric("requests", i as f64, "");
        }
        let history = collector.get_history("requests");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].value, 2.0);
        assert_eq!(history[2].value, 4.0);
    }

    #[test]
    fn test_cleanup_old_data_keeps_current() {
        let collector = MetricsCollector::default();
        collector.record_metric("cpu_percent", 50.0, "%");
        collector.backdate("cpu_percent", Duration::days(45));
        collector.record_metric("memory_percent", 40.0, "%");

        collector.cleanup_old_data(30);

        assert!(collector.get_history("cpu_percent").is_empty());
        assert!(collector.get_metrics_summary("cpu_percent").is_none());
        assert_eq!(collector.get_history("memory_percent").len(), 1);
        assert!(collector.current_metrics().contains_key("cpu_percent"));
    }

    #[test]
    fn test_cleanup_with_oversized_retention_keeps_everything() {
        let collector = MetricsCollector::default();
        collector.record_metric("cpu_percent", 50.0, "%");
        collector.backdate("cpu_percent", Duration::days(3650));

        collector.cleanup_old_data(200_000_000);
        collector.cleanup_old_data(u32::MAX);

        assert_eq!(collector.get_history("cpu_percent").len(), 1);
    }
}
