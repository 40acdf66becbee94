/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Raw metric snapshot storage
//!
//! [`MonitoringStorage`] is the persistence seam of the engine. The bundled
//! [`MemoryStorage`] is a bounded, non-durable append log.

use crate::config::StorageConfig;
use crate::error::Result;
use crate::retention;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::debug;

/// One sampling cycle's raw metric values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub metrics: HashMap<String, f64>,
}

impl MetricSnapshot {
    pub fn new(metrics: HashMap<String, f64>) -> Self {
        Self {
            timestamp: Utc::now(),
            metrics,
        }
    }
}

/// A single value of one metric taken from a stored snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Snapshot storage backend
#[async_trait]
pub trait MonitoringStorage: Send + Sync + fmt::Debug {
    /// Append a snapshot
    async fn store_metrics(&self, snapshot: MetricSnapshot) -> Result<()>;

    /// Values of `name` from snapshots taken within the last `hours`, oldest first
    async fn get_historical_metrics(&self, name: &str, hours: u32) -> Result<Vec<MetricPoint>>;
}

/// Bounded in-memory snapshot log
#[derive(Debug)]
pub struct MemoryStorage {
    entries: Mutex<VecDeque<MetricSnapshot>>,
    max_entries: usize,
    trimmed_entries: usize,
}

impl MemoryStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries: config.max_entries.max(1),
            trimmed_entries: config.trimmed_entries.min(config.max_entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(&StorageConfig::default())
    }
}

#[async_trait]
impl MonitoringStorage for MemoryStorage {
    async fn store_metrics(&self, snapshot: MetricSnapshot) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.push_back(snapshot);
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.trimmed_entries;
            entries.drain(..excess);
            debug!("Snapshot storage trimmed to {} entries", entries.len());
        }
        Ok(())
    }

    async fn get_historical_metrics(&self, name: &str, hours: u32) -> Result<Vec<MetricPoint>> {
        let cutoff = retention::cutoff(retention::hours(hours));
        let entries = self.entries.lock();

        Ok(entries
            .iter()
            .filter(|snapshot| snapshot.timestamp >= cutoff)
            .filter_map(|snapshot| {
                snapshot.metrics.get(name).map(|value| MetricPoint {
                    timestamp: snapshot.timestamp,
                    value: *value,
                })
            })
            .collect())
    }
}
