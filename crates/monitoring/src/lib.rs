/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Monitoring and Alerting Engine
//!
//! Process-resident monitoring for an application server:
//!
//! - Performance and business metric recording with historical series
//! - Operation timing, timeout detection and trend analysis
//! - Host CPU, memory and disk sampling
//! - Static, adaptive and time-based thresholds
//! - Rule-based alerts with deduplication, recovery and escalation
//! - Webhook notifications
//!
//! [`MonitoringSystem`] wires the components together and runs the periodic
//! sampling loop. Request handlers record into it through
//! [`MonitoringSystem::collector`] and [`MonitoringSystem::performance`].

pub mod alert;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod performance;
mod retention;
pub mod rules;
mod stats;
pub mod storage;
pub mod thresholds;

pub use crate::alert::{Alert, AlertSeverity, AlertType};
pub use crate::config::MonitoringConfig;
pub use crate::engine::{AlertManager, AlertStatistics};
pub use crate::error::{MonitoringError, Result};
pub use crate::metrics::{MetricEntry, MetricKind, MetricSummary, MetricsCollector, MetricsExport};
pub use crate::notifier::{DeliveryResult, Notifier, WebhookNotifier};
pub use crate::performance::{PerformanceMonitor, SystemResources, TimeoutReport, TrendAnalysis, TrendDirection};
pub use crate::rules::{default_rules, AlertRule, ComparisonOperator};
pub use crate::storage::{MemoryStorage, MetricPoint, MetricSnapshot, MonitoringStorage};
pub use crate::thresholds::{Threshold, ThresholdManager, ThresholdType, TimePeriod};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Read-only aggregate for dashboards and HTTP endpoints
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub current_metrics: MetricsExport,
    /// `None` when the host could not be sampled
    pub system_resources: Option<SystemResources>,
    pub active_alerts: Vec<Alert>,
    pub alert_statistics: AlertStatistics,
    pub timestamp: DateTime<Utc>,
}

/// Main monitoring service
#[derive(Debug, Clone)]
pub struct MonitoringSystem {
    inner: Arc<MonitoringSystemInner>,
}

#[derive(Debug)]
struct MonitoringSystemInner {
    config: MonitoringConfig,
    collector: MetricsCollector,
    performance: Arc<PerformanceMonitor>,
    thresholds: ThresholdManager,
    alerts: AlertManager,
    storage: Arc<dyn MonitoringStorage>,
    started: AtomicBool,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl MonitoringSystem {
    /// Create a monitoring system backed by in-memory snapshot storage
    pub fn new(config: MonitoringConfig) -> Result<Self> {
        let storage = Arc::new(MemoryStorage::new(&config.storage));
        Self::with_storage(config, storage)
    }

    /// Create a monitoring system on top of a custom storage backend
    pub fn with_storage(config: MonitoringConfig, storage: Arc<dyn MonitoringStorage>) -> Result<Self> {
        info!("Initializing monitoring system");
        config.validate()?;

        let alerts = AlertManager::from_config(&config.alerting)?;
        for rule in default_rules() {
            alerts.add_rule(rule);
        }

        Ok(Self {
            inner: Arc::new(MonitoringSystemInner {
                collector: MetricsCollector::new(config.collector.max_history_per_metric),
                performance: Arc::new(PerformanceMonitor::new(&config.performance)),
                thresholds: ThresholdManager::new(),
                alerts,
                storage,
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                config,
            }),
        })
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.inner.config
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.inner.collector
    }

    pub fn performance(&self) -> &Arc<PerformanceMonitor> {
        &self.inner.performance
    }

    pub fn thresholds(&self) -> &ThresholdManager {
        &self.inner.thresholds
    }

    pub fn alert_manager(&self) -> &AlertManager {
        &self.inner.alerts
    }

    pub fn storage(&self) -> &Arc<dyn MonitoringStorage> {
        &self.inner.storage
    }

    /// Start the sampling loop and the retention sweeps
    pub async fn start(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(MonitoringError::internal("monitoring system has been stopped"));
        }
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Monitoring system already started");
            return Ok(());
        }

        info!("Starting monitoring system");
        self.start_sampling_loop();
        self.start_retention_sweeps();
        Ok(())
    }

    /// Stop background tasks and wait for pending notifications
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping monitoring system");

        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.alerts.flush_notifications().await;

        info!("Monitoring system stopped");
        Ok(())
    }

    /// Sample host resources, record them, store the raw sample and evaluate alert rules
    pub async fn collect_system_metrics(&self) -> Result<Vec<Alert>> {
        match self.inner.performance.sample_system_resources().await? {
            Some(resources) => self.ingest_snapshot(resources.to_metric_map()).await,
            None => {
                warn!("Skipping monitoring cycle, system resources unavailable");
                Ok(Vec::new())
            }
        }
    }

    /// Record, store and evaluate one metric snapshot
    pub async fn ingest_snapshot(&self, metrics: HashMap<String, f64>) -> Result<Vec<Alert>> {
        for (name, value) in &metrics {
            let unit = if name.ends_with("_percent") || name == "disk_usage" { "%" } else { "" };
            self.inner.collector.record_metric(name.as_str(), *value, unit);
        }

        self.inner
            .storage
            .store_metrics(MetricSnapshot::new(metrics.clone()))
            .await?;

        Ok(self.inner.alerts.evaluate_rules(&metrics).await)
    }

    /// Run sampling cycles forever.
    ///
    /// A failed cycle is logged and followed by the error backoff. The loop
    /// never returns; callers stop it by dropping or aborting the future.
    pub async fn start_monitoring(&self) {
        let interval = self.inner.config.sample_interval();
        let backoff = self.inner.config.error_backoff();
        info!("Monitoring loop running every {:?}", interval);

        loop {
            match self.run_cycle().await {
                Ok(()) => tokio::time::sleep(interval).await,
                Err(e) => {
                    error!("Monitoring cycle failed: {}", e);
                    ::metrics::counter!("monitoring_cycle_errors_total", "category" => e.category()).increment(1);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn run_cycle(&self) -> Result<()> {
        let events = self.collect_system_metrics().await?;
        debug!("Monitoring cycle emitted {} alert events", events.len());

        for report in self.inner.performance.check_timeouts() {
            warn!(
                "Operation {} ({}) running for {:.1}s, threshold {:.1}s",
                report.operation, report.operation_id, report.duration, report.threshold
            );
        }
        Ok(())
    }

    /// Apply retention to metric series and alert history
    pub fn run_retention_sweep(&self) {
        let config = &self.inner.config;
        self.inner.collector.cleanup_old_data(config.collector.retention_days);
        self.inner
            .alerts
            .cleanup_history(retention::days(config.alerting.alert_retention_days));
    }

    /// Assemble the dashboard view
    pub async fn get_monitoring_dashboard_data(&self) -> DashboardSnapshot {
        let system_resources = match self.inner.performance.sample_system_resources().await {
            Ok(resources) => resources,
            Err(e) => {
                warn!("Failed to sample system resources for dashboard: {}", e);
                None
            }
        };

        DashboardSnapshot {
            current_metrics: self.inner.collector.export_metrics(),
            system_resources,
            active_alerts: self.inner.alerts.get_active_alerts(),
            alert_statistics: self.inner.alerts.get_alert_statistics(),
            timestamp: Utc::now(),
        }
    }

    pub fn export_metrics(&self) -> MetricsExport {
        self.inner.collector.export_metrics()
    }

    /// Stored values of `name` from the last `hours`
    pub async fn get_historical_metrics(&self, name: &str, hours: u32) -> Result<Vec<MetricPoint>> {
        self.inner.storage.get_historical_metrics(name, hours).await
    }

    fn start_sampling_loop(&self) {
        let system = self.clone();
        let shutdown = self.inner.shutdown.clone();

        self.inner.tasks.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => debug!("Sampling loop cancelled"),
                _ = system.start_monitoring() => {}
            }
        });
    }

    fn start_retention_sweeps(&self) {
        let system = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let period = self.inner.config.cleanup_interval();

        self.inner.tasks.spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => system.run_retention_sweep(),
                }
            }
        });
    }
}
