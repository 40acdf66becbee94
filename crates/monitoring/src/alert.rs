/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Alert data structures and types

use crate::rules::{AlertRule, ComparisonOperator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational alerts
    Info,
    /// Warning alerts
    Warning,
    /// Critical alerts requiring immediate attention
    Critical,
}

/// Kind of alert event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    /// Rule condition started to hold
    Trigger,
    /// Rule condition stopped holding
    Recovery,
    /// Active alert promoted to a higher severity
    Escalation,
}

/// Alert event, also the webhook payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub rule_name: String,
    pub metric: String,
    /// Metric value that caused the event
    pub value: f64,
    pub threshold: f64,
    pub severity: AlertSeverity,
    pub operator: ComparisonOperator,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Severity before an escalation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_from: Option<AlertSeverity>,
}

impl Alert {
    /// Create an event for `rule` observed at `value`
    pub fn from_rule(rule: &AlertRule, value: f64, alert_type: AlertType) -> Self {
        Self {
            rule_name: rule.name.clone(),
            metric: rule.metric.clone(),
            value,
            threshold: rule.threshold,
            severity: rule.severity,
            operator: rule.operator,
            timestamp: Utc::now(),
            alert_type,
            escalated_from: None,
        }
    }

    /// Key of the active-alert set: one active alert per rule and metric
    pub fn key(&self) -> String {
        alert_key(&self.rule_name, &self.metric)
    }

    /// Seconds since the event was created
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.timestamp).num_seconds()
    }
}

pub(crate) fn alert_key(rule_name: &str, metric: &str) -> String {
    format!("{}_{}", rule_name, metric)
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Recovery => "recovery",
            Self::Escalation => "escalation",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_from_rule() {
        let rule = AlertRule::new("high_cpu_usage", "cpu_percent", 85.0, ComparisonOperator::Gt, AlertSeverity::Warning);
        let alert = Alert::from_rule(&rule, 91.5, AlertType::Trigger);

        assert_eq!(alert.rule_name, "high_cpu_usage");
        assert_eq!(alert.metric, "cpu_percent");
        assert_eq!(alert.value, 91.5);
        assert_eq!(alert.threshold, 85.0);
        assert_eq!(alert.key(), "high_cpu_usage_cpu_percent");
        assert!(alert.age_seconds() <= 1);
    }

    #[test]
    fn test_webhook_payload_shape() {
        let rule = AlertRule::new("slow_response_time", "response_time_ms", 2000.0, ComparisonOperator::Gt, AlertSeverity::Warning);
        let alert = Alert::from_rule(&rule, 2500.0, AlertType::Recovery);
        let json = serde_json::to_value(&alert).unwrap();

        assert_eq!(json["rule_name"], "slow_response_time");
        assert_eq!(json["metric"], "response_time_ms");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["operator"], ">");
        assert_eq!(json["type"], "recovery");
        assert!(json["timestamp"].is_string());
        assert!(json.get("escalated_from").is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
        assert!(AlertSeverity::Warning > AlertSeverity::Info);
        assert_eq!(AlertSeverity::Critical.to_string(), "critical");
    }
}
