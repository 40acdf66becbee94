/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Standalone monitoring daemon

use anyhow::Context;
use clap::Parser;
use monitoring::{MonitoringConfig, MonitoringSystem};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "monitord", version, about = "Host monitoring and alerting daemon")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Webhook URL receiving alert events, overrides the configuration file
    #[arg(long, value_name = "URL")]
    webhook_url: Option<String>,

    /// Seconds between sampling cycles, overrides the configuration file
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MonitoringConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => MonitoringConfig::default(),
    };
    if let Some(url) = cli.webhook_url {
        config.alerting.webhook_url = Some(url);
    }
    if let Some(interval) = cli.interval {
        config.performance_sample_interval_secs = interval;
    }

    let system = MonitoringSystem::new(config).context("failed to initialize monitoring")?;
    system.start().await?;
    info!("monitord running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;

    system.stop().await?;
    let statistics = system.alert_manager().get_alert_statistics();
    info!(
        "Shutdown complete: {} alert events, {} still active",
        statistics.total_alerts, statistics.active_alerts
    );
    Ok(())
}
