/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Notification delivery for alert events

use crate::alert::Alert;
use crate::error::{MonitoringError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Whether delivery was successful
    pub success: bool,
    /// HTTP status returned by the receiver, if any
    pub status_code: Option<u16>,
    /// Delivery duration in milliseconds
    pub duration_ms: u64,
    /// Delivery timestamp
    pub timestamp: DateTime<Utc>,
    /// Error message if delivery failed
    pub error: Option<String>,
}

/// Destination for alert events
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Get notifier name
    fn name(&self) -> &str;

    /// Deliver one alert event.
    ///
    /// Transport failures are returned as errors; a response that is not
    /// accepted yields `Ok` with `success == false`.
    async fn send(&self, alert: &Alert) -> Result<DeliveryResult>;
}

/// Posts alerts as JSON to a webhook URL
#[derive(Debug)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Default request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitoringError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<DeliveryResult> {
        let start_time = Instant::now();

        debug!("Sending webhook notification for alert: {}", alert.key());

        let response = self.client.post(&self.url).json(alert).send().await?;
        let status = response.status();
        // Only a plain 200 counts as accepted.
        let success = status == reqwest::StatusCode::OK;

        if success {
            info!("Webhook notification sent: {} ({})", alert.rule_name, alert.alert_type);
        } else {
            error!("Webhook notification failed with status: {}", status);
        }

        Ok(DeliveryResult {
            success,
            status_code: Some(status.as_u16()),
            duration_ms: start_time.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            error: if success { None } else { Some(format!("HTTP {}", status)) },
        })
    }
}
