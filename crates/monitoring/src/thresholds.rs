/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Static, adaptive and time-based thresholds

use crate::stats;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// How a threshold value was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    Static,
    Adaptive,
    TimeBased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric_name: String,
    pub value: f64,
    #[serde(rename = "type")]
    pub threshold_type: ThresholdType,
    pub updated_at: DateTime<Utc>,
}

/// Time window a time-based threshold applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
    BusinessHours,
    OffHours,
    Weekend,
}

impl TimePeriod {
    /// Parse a period name; unknown names yield `None`
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "business_hours" => Some(Self::BusinessHours),
            "off_hours" => Some(Self::OffHours),
            "weekend" => Some(Self::Weekend),
            _ => None,
        }
    }

    /// Classify an instant: weekends, then 09:00-17:00 on weekdays
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        match timestamp.weekday() {
            Weekday::Sat | Weekday::Sun => Self::Weekend,
            _ if (9..17).contains(&timestamp.hour()) => Self::BusinessHours,
            _ => Self::OffHours,
        }
    }

    pub fn factor(&self) -> f64 {
        match self {
            Self::BusinessHours => 1.2,
            Self::OffHours => 1.5,
            Self::Weekend => 1.8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BusinessHours => "business_hours",
            Self::OffHours => "off_hours",
            Self::Weekend => "weekend",
        }
    }
}

/// Threshold table keyed by metric name
#[derive(Debug, Default)]
pub struct ThresholdManager {
    thresholds: RwLock<HashMap<String, Threshold>>,
}

impl ThresholdManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or overwrite the threshold for `name`
    pub fn set_threshold(&self, name: impl Into<String>, value: f64, threshold_type: ThresholdType) {
        let name = name.into();
        debug!("Setting {:?} threshold for {} to {}", threshold_type, name, value);
        self.thresholds.write().insert(
            name.clone(),
            Threshold {
                metric_name: name,
                value,
                threshold_type,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get_threshold(&self, name: &str) -> Option<Threshold> {
        self.thresholds.read().get(name).cloned()
    }

    pub fn thresholds(&self) -> HashMap<String, Threshold> {
        self.thresholds.read().clone()
    }

    /// Value at the `percentile` position of the sorted data.
    ///
    /// The index is `floor(percentile / 100 * len)` clamped to the last element.
    pub fn calculate_adaptive_threshold(&self, name: &str, data: &[f64], percentile: f64) -> f64 {
        if data.is_empty() {
            debug!("No data to derive adaptive threshold for {}", name);
            return 0.0;
        }

        let mut sorted = data.to_vec();
        sorted.sort_by(f64::total_cmp);
        let index = ((percentile / 100.0) * sorted.len() as f64).floor().max(0.0) as usize;
        sorted[index.min(sorted.len() - 1)]
    }

    /// `(mean + 2 * stddev)` scaled by the period factor; unknown periods use 1.0
    pub fn calculate_time_based_threshold(&self, name: &str, data: &[f64], period: &str) -> f64 {
        if data.is_empty() {
            debug!("No data to derive time-based threshold for {}", name);
            return 0.0;
        }

        let base = stats::mean(data) + 2.0 * stats::std_dev(data);
        let factor = TimePeriod::parse(period).map_or(1.0, |p| p.factor());
        base * factor
    }

    /// Reject negative values, and values above 100 for `*_percent` metrics
    pub fn validate_threshold(&self, name: &str, value: f64) -> bool {
        if value < 0.0 {
            return false;
        }
        if name.ends_with("_percent") && value > 100.0 {
            return false;
        }
        true
    }

    /// Derive an adaptive threshold and store it when it validates
    pub fn update_adaptive_threshold(&self, name: &str, data: &[f64], percentile: f64) -> Option<f64> {
        if data.is_empty() {
            return None;
        }
        let value = self.calculate_adaptive_threshold(name, data, percentile);
        if !self.validate_threshold(name, value) {
            warn!("Rejected adaptive threshold {} for {}", value, name);
            return None;
        }
        self.set_threshold(name, value, ThresholdType::Adaptive);
        Some(value)
    }
}
