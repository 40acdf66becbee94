/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Alert rules and comparison operators

use crate::alert::AlertSeverity;
use crate::error::MonitoringError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default cooldown declared on rules
pub const DEFAULT_COOLDOWN_MINUTES: u32 = 15;

/// Comparison applied between a metric value and the rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

impl ComparisonOperator {
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Ge => value >= threshold,
            Self::Le => value <= threshold,
            Self::Eq => value == threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = MonitoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Ge),
            "<=" => Ok(Self::Le),
            "==" => Ok(Self::Eq),
            other => Err(MonitoringError::config(format!("Unknown comparison operator: {}", other))),
        }
    }
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold rule over a single metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule name
    pub name: String,
    /// Metric the rule watches
    pub metric: String,
    pub threshold: f64,
    pub operator: ComparisonOperator,
    pub severity: AlertSeverity,
    /// Minutes the condition must hold before the alert triggers
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    /// Minutes an alert stays active before it escalates
    #[serde(default)]
    pub escalation_minutes: Option<u32>,
    /// Severity an escalated alert is promoted to
    #[serde(default)]
    pub escalate_to: Option<AlertSeverity>,
    /// Declared only; re-triggers are gated on the active set
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: u32,
}

fn default_cooldown() -> u32 {
    DEFAULT_COOLDOWN_MINUTES
}

impl AlertRule {
    /// Create a new alert rule
    pub fn new(
        name: impl Into<String>,
        metric: impl Into<String>,
        threshold: f64,
        operator: ComparisonOperator,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            threshold,
            operator,
            severity,
            duration_minutes: None,
            escalation_minutes: None,
            escalate_to: None,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
        }
    }

    /// Require the condition to hold for `minutes` before triggering
    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    /// Promote the alert to `severity` once active for `minutes`
    pub fn with_escalation(mut self, minutes: u32, severity: AlertSeverity) -> Self {
        self.escalation_minutes = Some(minutes);
        self.escalate_to = Some(severity);
        self
    }

    pub fn with_cooldown(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    /// Check whether `value` violates the rule
    pub fn evaluate(&self, value: f64) -> bool {
        self.operator.compare(value, self.threshold)
    }

    pub(crate) fn pending_window(&self) -> Option<chrono::Duration> {
        self.duration_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| chrono::Duration::minutes(i64::from(minutes)))
    }

    pub(crate) fn escalation(&self) -> Option<(chrono::Duration, AlertSeverity)> {
        match (self.escalation_minutes, self.escalate_to) {
            (Some(minutes), Some(severity)) => {
                Some((chrono::Duration::minutes(i64::from(minutes)), severity))
            }
            _ => None,
        }
    }
}

/// Rules installed on every new monitoring system
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new("high_cpu_usage", "cpu_percent", 85.0, ComparisonOperator::Gt, AlertSeverity::Warning),
        AlertRule::new("critical_cpu_usage", "cpu_percent", 95.0, ComparisonOperator::Gt, AlertSeverity::Critical),
        AlertRule::new("high_memory_usage", "memory_percent", 90.0, ComparisonOperator::Gt, AlertSeverity::Warning),
        AlertRule::new("slow_response_time", "response_time_ms", 2000.0, ComparisonOperator::Gt, AlertSeverity::Warning),
    ]
}
