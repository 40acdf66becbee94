/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Error types for the monitoring engine

/// Result type for monitoring operations
pub type Result<T> = std::result::Result<T, MonitoringError>;

/// Monitoring engine errors
#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Resource sampling error
    #[error("Sampling error: {0}")]
    Sampling(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Background task failed to complete
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl MonitoringError {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new sampling error
    pub fn sampling<T: Into<String>>(msg: T) -> Self {
        Self::Sampling(msg.into())
    }

    /// Create a new storage error
    pub fn storage<T: Into<String>>(msg: T) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        Self::Internal(msg.into())
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Network(_) => "network",
            Self::Sampling(_) => "sampling",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Http(_) => "http",
            Self::Toml(_) => "toml",
            Self::Task(_) => "task",
        }
    }
}

impl From<String> for MonitoringError {
    fn from(msg: String) -> Self {
        Self::Internal(msg)
    }
}

impl From<&str> for MonitoringError {
    fn from(msg: &str) -> Self {
        Self::Internal(msg.to_string())
    }
}
