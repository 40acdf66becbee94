/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! End-to-end tests for the monitoring system

use monitoring::config::{AlertingConfig, PerformanceConfig};
use monitoring::{
    AlertRule, AlertSeverity, AlertType, ComparisonOperator, MonitoringConfig, MonitoringSystem,
    ThresholdType, TrendAnalysis, TrendDirection,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(webhook_url: Option<String>) -> MonitoringConfig {
    MonitoringConfig {
        performance_sample_interval_secs: 1,
        performance: PerformanceConfig {
            cpu_sample_interval_ms: 0,
            ..PerformanceConfig::default()
        },
        alerting: AlertingConfig {
            webhook_url,
            ..AlertingConfig::default()
        },
        ..MonitoringConfig::default()
    }
}

fn cpu(value: f64) -> HashMap<String, f64> {
    HashMap::from([("cpu_percent".to_string(), value)])
}

#[tokio::test]
async fn cpu_escalation_and_recovery_through_default_rules() {
    let system = assert_ok!(MonitoringSystem::new(config(None)));

    let events = assert_ok!(system.ingest_snapshot(cpu(90.0)).await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rule_name, "high_cpu_usage");
    assert_eq!(events[0].alert_type, AlertType::Trigger);

    let events = assert_ok!(system.ingest_snapshot(cpu(97.0)).await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rule_name, "critical_cpu_usage");
    assert_eq!(events[0].severity, AlertSeverity::Critical);

    // still violating, nothing new
    assert!(assert_ok!(system.ingest_snapshot(cpu(96.0)).await).is_empty());
    assert_eq!(system.alert_manager().get_active_alerts().len(), 2);

    let events = assert_ok!(system.ingest_snapshot(cpu(50.0)).await);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.alert_type == AlertType::Recovery));
    assert!(system.alert_manager().get_active_alerts().is_empty());

    let stats = system.alert_manager().get_alert_statistics();
    assert_eq!(stats.total_alerts, 4);
    assert_eq!(stats.triggers, 2);
    assert_eq!(stats.recoveries, 2);
    assert_eq!(stats.active_alerts, 0);

    let history = assert_ok!(system.get_historical_metrics("cpu_percent", 1).await);
    let values: Vec<f64> = history.iter().map(|p| p.value).collect();
    assert_eq!(values, vec![90.0, 97.0, 96.0, 50.0]);

    let summary = system.collector().get_metrics_summary("cpu_percent").unwrap();
    assert_eq!(summary.count, 4);
    assert_eq!(summary.max, 97.0);
    assert_eq!(summary.min, 50.0);
}

#[tokio::test]
async fn alert_events_reach_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(body_partial_json(serde_json::json!({
            "rule_name": "slow_response_time",
            "type": "trigger",
            "severity": "warning"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(body_partial_json(serde_json::json!({
            "rule_name": "slow_response_time",
            "type": "recovery"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let system = assert_ok!(MonitoringSystem::new(config(Some(format!("{}/alerts", server.uri())))));

    let slow = HashMap::from([("response_time_ms".to_string(), 3200.0)]);
    let fast = HashMap::from([("response_time_ms".to_string(), 120.0)]);
    assert_eq!(assert_ok!(system.ingest_snapshot(slow.clone()).await).len(), 1);
    assert!(assert_ok!(system.ingest_snapshot(slow).await).is_empty());
    assert_eq!(assert_ok!(system.ingest_snapshot(fast).await).len(), 1);

    system.alert_manager().flush_notifications().await;
    server.verify().await;
}

#[tokio::test]
async fn unreachable_webhook_does_not_fail_cycle() {
    let system = assert_ok!(MonitoringSystem::new(config(Some("http://127.0.0.1:9/alerts".to_string()))));

    let events = assert_ok!(system.ingest_snapshot(cpu(99.0)).await);
    assert_eq!(events.len(), 2);

    let delivered = system.alert_manager().send_notification(&events[0]).await;
    assert!(!delivered);
    system.alert_manager().flush_notifications().await;
    assert_eq!(system.alert_manager().get_active_alerts().len(), 2);
}

#[tokio::test]
async fn custom_rule_with_pending_window() {
    let system = assert_ok!(MonitoringSystem::new(config(None)));
    system.alert_manager().add_rule(
        AlertRule::new("disk_pressure", "disk_usage", 80.0, ComparisonOperator::Ge, AlertSeverity::Warning)
            .with_duration(5),
    );

    let events = assert_ok!(system.ingest_snapshot(HashMap::from([("disk_usage".to_string(), 85.0)])).await);
    assert!(events.is_empty());
    assert!(system.alert_manager().get_active_alerts().is_empty());
}

#[tokio::test]
async fn operation_timing_and_trends() {
    let system = assert_ok!(MonitoringSystem::new(config(None)));
    let performance = system.performance();

    let id = performance.start_operation("db_query");
    assert_eq!(performance.active_operation_count(), 1);
    let elapsed = performance.complete_operation(id);
    assert!(elapsed >= 0.0);
    assert_eq!(performance.active_operation_count(), 0);
    assert_eq!(performance.complete_operation(id), 0.0);

    for _ in 0..10 {
        performance.record_duration("render", 0.1);
    }
    for _ in 0..10 {
        performance.record_duration("render", 0.5);
    }
    match performance.analyze_trends("render") {
        TrendAnalysis::Analyzed {
            trend_direction,
            sample_size,
            ..
        } => {
            assert_eq!(trend_direction, TrendDirection::Degrading);
            assert_eq!(sample_size, 20);
        }
        other => panic!("unexpected analysis: {:?}", other),
    }
}

#[tokio::test]
async fn adaptive_thresholds() {
    let system = assert_ok!(MonitoringSystem::new(config(None)));
    let thresholds = system.thresholds();

    let values = [10.0, 20.0, 30.0, 40.0, 50.0];
    assert_eq!(thresholds.calculate_adaptive_threshold("response_time_ms", &values, 80.0), 50.0);
    assert!(thresholds.get_threshold("response_time_ms").is_none());

    assert_eq!(thresholds.update_adaptive_threshold("response_time_ms", &values, 50.0), Some(30.0));
    let threshold = thresholds.get_threshold("response_time_ms").unwrap();
    assert_eq!(threshold.threshold_type, ThresholdType::Adaptive);
    assert_eq!(threshold.value, 30.0);

    // percent metrics cannot exceed 100
    assert_eq!(thresholds.update_adaptive_threshold("cpu_percent", &[150.0], 95.0), None);
    assert!(thresholds.get_threshold("cpu_percent").is_none());
}

#[tokio::test]
async fn lifecycle_with_live_sampling() {
    let system = assert_ok!(MonitoringSystem::new(config(None)));
    assert_ok!(system.start().await);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_secs(10), system.stop()).await));

    let dashboard = system.get_monitoring_dashboard_data().await;
    match &dashboard.system_resources {
        Some(resources) => {
            assert!(resources.memory_total > 0);
            assert!(resources.memory_available <= resources.memory_total);
            assert!((0.0..=100.0).contains(&resources.memory_percent));
            assert!((0.0..=100.0).contains(&resources.disk_usage));
        }
        None => {
            // an unsampleable host never records, stores or alerts
            assert!(dashboard.current_metrics.performance_metrics.is_empty());
            assert!(dashboard.active_alerts.is_empty());
            assert_eq!(dashboard.alert_statistics.total_alerts, 0);
            assert!(assert_ok!(system.get_historical_metrics("memory_total", 1).await).is_empty());
        }
    }
    assert_err!(system.start().await);
}
