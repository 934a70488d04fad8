// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Foreground daemon loop: resumes unfinished processes, runs the daily
//! expiry sweep and reminder dispatch, and serves Prometheus metrics.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, info_span, warn, Instrument};

use lifecycle_core::application::expiry_sweep::SweepOptions;
use lifecycle_core::domain::clock::Clock;
use lifecycle_core::domain::lifecycle_config::LifecycleConfigManifest;

use super::{remove_pid_file, write_pid_file};
use crate::embedded::LifecycleHost;

const TICK: Duration = Duration::from_secs(60);

pub async fn run_daemon(config_path: Option<PathBuf>) -> Result<()> {
    let config = LifecycleConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    let pid = std::process::id();
    write_pid_file(pid)?;
    let _guard = PidFileGuard;

    info!("Lifecycle daemon starting (PID: {})", pid);

    if let Some(metrics) = config
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.metrics.as_ref())
        .filter(|m| m.enabled)
    {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], metrics.port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port = metrics.port, "Metrics exporter listening");
    }

    let host = LifecycleHost::from_config(config).await?;

    match host.runtime.resume_incomplete().await {
        Ok(resumed) => info!(count = resumed.len(), "Startup resume complete"),
        Err(e) => error!(error = %e, "Failed to resume unfinished processes"),
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(TICK);
    let mut last_sweep: Option<NaiveDate> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                tick(&host, &mut last_sweep).await;
            }
        }
    }

    info!(running = host.runtime.running().len(), "Daemon shutting down");
    host.runtime.shutdown();

    Ok(())
}

async fn tick(host: &LifecycleHost, last_sweep: &mut Option<NaiveDate>) {
    let reaped = host.runtime.reap_finished();
    if reaped > 0 {
        info!(reaped, "Reaped finished processes");
    }

    // Requests created by one-shot commands are picked up here
    if let Err(e) = host.runtime.resume_incomplete().await {
        warn!(error = %e, "Resume pass failed");
    }

    let now = host.clock.now();
    if !sweep_due(now, host.config.spec.sweep.schedule_hour_utc, *last_sweep) {
        return;
    }
    let today = now.date_naive();
    *last_sweep = Some(today);

    async {
        let options = SweepOptions {
            run_date: today,
            dry_run: host.config.spec.sweep.dry_run,
            chunk_size: host.config.spec.sweep.chunk_size,
        };
        match host.sweep.run(options).await {
            Ok(report) => info!(
                batch_id = %report.log.id,
                expired = report.log.succeeded,
                failed = report.log.failed,
                deactivated = report.deactivated_agents.len(),
                "Scheduled sweep finished"
            ),
            Err(e) => error!(error = %e, "Scheduled sweep failed"),
        }

        match host
            .licenses
            .send_due_reminders(host.collaborators.notifications.as_ref(), today)
            .await
        {
            Ok(sent) => info!(sent, "Renewal reminders dispatched"),
            Err(e) => error!(error = %e, "Reminder dispatch failed"),
        }
    }
    .instrument(info_span!("daily_run", date = %today))
    .await;
}

/// The daily run fires once per UTC date, at or after the scheduled hour.
fn sweep_due(now: DateTime<Utc>, schedule_hour_utc: u32, last_run: Option<NaiveDate>) -> bool {
    now.hour() >= schedule_hour_utc && last_run != Some(now.date_naive())
}

struct PidFileGuard;

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sweep_due_once_per_day_after_hour() {
        let early = Utc.with_ymd_and_hms(2025, 3, 10, 1, 30, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap();
        let today = later.date_naive();

        assert!(!sweep_due(early, 2, None));
        assert!(sweep_due(later, 2, None));
        assert!(!sweep_due(later, 2, Some(today)));

        let next_day = Utc.with_ymd_and_hms(2025, 3, 11, 2, 0, 0).unwrap();
        assert!(sweep_due(next_day, 2, Some(today)));
    }
}
