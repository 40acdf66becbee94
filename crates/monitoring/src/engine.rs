/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Rule evaluation and the active alert set
//!
//! Every `(rule, metric)` pair is either inactive or active. A violated rule
//! on an inactive key triggers, a satisfied rule on an active key recovers,
//! and a rule that stays violated emits nothing. Notifications are
//! dispatched on background tasks so a slow webhook never holds up
//! evaluation.

use crate::alert::{alert_key, Alert, AlertSeverity, AlertType};
use crate::config::AlertingConfig;
use crate::error::Result;
use crate::notifier::{Notifier, WebhookNotifier};
use crate::retention;
use crate::rules::AlertRule;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Aggregates over the retained alert history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStatistics {
    pub total_alerts: usize,
    pub active_alerts: usize,
    pub triggers: usize,
    pub recoveries: usize,
    pub escalations: usize,
    /// Event count per severity
    pub severity_breakdown: HashMap<AlertSeverity, usize>,
}

#[derive(Debug, Default)]
struct AlertState {
    active: HashMap<String, Alert>,
    /// First time a rule with a pending window was seen violated
    pending: HashMap<String, DateTime<Utc>>,
    history: VecDeque<Alert>,
}

/// Evaluates alert rules and tracks firing alerts
#[derive(Debug)]
pub struct AlertManager {
    rules: RwLock<Vec<AlertRule>>,
    state: Mutex<AlertState>,
    notifier: Option<Arc<dyn Notifier>>,
    deliveries: TaskTracker,
    flush_lock: tokio::sync::Mutex<()>,
    max_history: usize,
}

impl AlertManager {
    /// Create a manager delivering through `notifier`, if any
    pub fn new(notifier: Option<Arc<dyn Notifier>>, max_history: usize) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            state: Mutex::new(AlertState::default()),
            notifier,
            deliveries: TaskTracker::new(),
            flush_lock: tokio::sync::Mutex::new(()),
            max_history: max_history.max(1),
        }
    }

    /// Create a manager posting to the configured webhook
    pub fn from_config(config: &AlertingConfig) -> Result<Self> {
        let notifier = match &config.webhook_url {
            Some(url) => {
                info!("Alert notifications will be posted to {}", url);
                Some(Arc::new(WebhookNotifier::new(url.clone(), config.webhook_timeout())?) as Arc<dyn Notifier>)
            }
            None => {
                warn!("No webhook configured, alert notifications are disabled");
                None
            }
        };
        Ok(Self::new(notifier, config.max_alert_history))
    }

    /// Append a rule; rules are evaluated in registration order
    pub fn add_rule(&self, rule: AlertRule) {
        info!("Adding alert rule: {}", rule.name);
        self.rules.write().push(rule);
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    /// Evaluate every rule whose metric is present in `metrics`.
    ///
    /// Returns the events emitted by this call, in rule order.
    pub async fn evaluate_rules(&self, metrics: &HashMap<String, f64>) -> Vec<Alert> {
        let now = Utc::now();

        let (events, active_count) = {
            let rules = self.rules.read();
            let mut state = self.state.lock();
            let mut events = Vec::new();

            for rule in rules.iter() {
                let Some(&value) = metrics.get(&rule.metric) else {
                    continue;
                };
                let key = alert_key(&rule.name, &rule.metric);

                if !rule.evaluate(value) {
                    state.pending.remove(&key);
                    if let Some(active) = state.active.remove(&key) {
                        info!("Alert recovered: {} ({} = {})", rule.name, rule.metric, value);
                        let mut event = Alert::from_rule(rule, value, AlertType::Recovery);
                        // recovery reports the severity the alert ended at
                        event.severity = active.severity;
                        event.escalated_from = active.escalated_from;
                        events.push(event);
                    }
                    continue;
                }

                if let Some(active) = state.active.get_mut(&key) {
                    if let Some(event) = escalate(rule, active, value, now) {
                        events.push(event);
                    }
                    continue;
                }

                if let Some(window) = rule.pending_window() {
                    let since = *state.pending.entry(key.clone()).or_insert(now);
                    if now - since < window {
                        debug!("Alert {} pending since {}", rule.name, since);
                        continue;
                    }
                    state.pending.remove(&key);
                }

                let alert = Alert::from_rule(rule, value, AlertType::Trigger);
                warn!(
                    "Alert triggered: {} ({} {} {}, value {})",
                    rule.name, rule.metric, rule.operator, rule.threshold, value
                );
                state.active.insert(key, alert.clone());
                events.push(alert);
            }

            for event in &events {
                state.history.push_back(event.clone());
            }
            while state.history.len() > self.max_history {
                state.history.pop_front();
            }

            (events, state.active.len())
        };

        gauge!("monitoring_active_alerts").set(active_count as f64);
        for event in &events {
            counter!(
                "monitoring_alert_events_total",
                "type" => event.alert_type.as_str(),
                "severity" => event.severity.as_str()
            )
            .increment(1);
            self.dispatch(event.clone());
        }

        events
    }

    /// Post one alert through the notifier. Failures are logged, never raised.
    pub async fn send_notification(&self, alert: &Alert) -> bool {
        match &self.notifier {
            Some(notifier) => deliver(notifier.as_ref(), alert).await,
            None => {
                debug!("No notifier configured, dropping notification for {}", alert.rule_name);
                false
            }
        }
    }

    fn dispatch(&self, alert: Alert) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        self.deliveries.spawn(async move {
            deliver(notifier.as_ref(), &alert).await;
        });
    }

    /// Wait for notifications dispatched so far
    pub async fn flush_notifications(&self) {
        // one flusher at a time, each sees its own close/reopen cycle
        let _guard = self.flush_lock.lock().await;
        self.deliveries.close();
        self.deliveries.wait().await;
        self.deliveries.reopen();
    }

    /// Currently firing alerts, oldest first
    pub fn get_active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.state.lock().active.values().cloned().collect();
        alerts.sort_by_key(|alert| alert.timestamp);
        alerts
    }

    /// The most recent `limit` events (all when `None`), oldest first
    pub fn get_alert_history(&self, limit: Option<usize>) -> Vec<Alert> {
        let state = self.state.lock();
        let skip = limit.map_or(0, |limit| state.history.len().saturating_sub(limit));
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn get_alert_statistics(&self) -> AlertStatistics {
        let state = self.state.lock();
        let mut statistics = AlertStatistics {
            total_alerts: state.history.len(),
            active_alerts: state.active.len(),
            ..Default::default()
        };

        for alert in &state.history {
            match alert.alert_type {
                AlertType::Trigger => statistics.triggers += 1,
                AlertType::Recovery => statistics.recoveries += 1,
                AlertType::Escalation => statistics.escalations += 1,
            }
            *statistics.severity_breakdown.entry(alert.severity).or_insert(0) += 1;
        }

        statistics
    }

    /// Drop history events older than `retention`; active alerts are kept
    pub fn cleanup_history(&self, retention: Duration) {
        let cutoff = retention::cutoff(retention);
        let mut state = self.state.lock();
        let before = state.history.len();
        while state.history.front().is_some_and(|alert| alert.timestamp < cutoff) {
            state.history.pop_front();
        }
        debug!("Alert retention sweep removed {} events", before - state.history.len());
    }

    #[cfg(test)]
    fn backdate(&self, key: &str, age: Duration) {
        let mut state = self.state.lock();
        if let Some(since) = state.pending.get_mut(key) {
            *since = *since - age;
        }
        if let Some(alert) = state.active.get_mut(key) {
            alert.timestamp = alert.timestamp - age;
        }
        for alert in state.history.iter_mut() {
            alert.timestamp = alert.timestamp - age;
        }
    }
}

/// Promote a still-violated active alert once its escalation delay has passed
fn escalate(rule: &AlertRule, active: &mut Alert, value: f64, now: DateTime<Utc>) -> Option<Alert> {
    let (after, severity) = rule.escalation()?;
    if active.escalated_from.is_some() || severity <= active.severity || now - active.timestamp < after {
        return None;
    }

    warn!("Alert escalated: {} {} -> {}", rule.name, active.severity, severity);
    let previous = active.severity;
    active.severity = severity;
    active.escalated_from = Some(previous);

    let mut event = Alert::from_rule(rule, value, AlertType::Escalation);
    event.severity = severity;
    event.escalated_from = Some(previous);
    Some(event)
}

async fn deliver(notifier: &dyn Notifier, alert: &Alert) -> bool {
    match notifier.send(alert).await {
        Ok(result) => {
            let outcome = if result.success { "success" } else { "rejected" };
            counter!("monitoring_notifications_total", "outcome" => outcome).increment(1);
            if !result.success {
                warn!(
                    "{} rejected notification for {}: {}",
                    notifier.name(),
                    alert.rule_name,
                    result.error.unwrap_or_default()
                );
            }
            result.success
        }
        Err(e) => {
            counter!("monitoring_notifications_total", "outcome" => "error").increment(1);
            warn!("Failed to deliver notification for {} via {}: {}", alert.rule_name, notifier.name(), e);
            false
        }
    }
}
