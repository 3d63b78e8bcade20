/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use rmsched::clock::MonotonicClock;
use rmsched::config::DaemonConfig;
use rmsched::control::server;
use rmsched::os::{DryRunBackend, OsBackend};
use rmsched::scheduler::Scheduler;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Rate-monotonic scheduler daemon.
///
/// Example:
///   rmsched --config rmsched.yaml --listen 127.0.0.1:7878
#[derive(Debug, Parser)]
#[command(
    name = "rmsched",
    about = "Rate-monotonic scheduler daemon for periodic tasks",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML daemon configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Control surface address; overrides `control.listen` from the file.
    #[arg(short = 'l', long = "listen")]
    listen: Option<String>,

    /// Log OS directives instead of applying them to real processes.
    #[arg(short = 'n', long = "dry-run", default_value_t = false)]
    dry_run: bool,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Level is controlled by RUST_LOG when set (e.g. RUST_LOG=rmsched=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    info!("rmsched starting up...");

    if let Err(e) = run(cli).await {
        error!("rmsched failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // ── Load configuration ────────────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load_from_file(path)?,
        None => {
            warn!("No configuration file provided, using default scheduler settings");
            DaemonConfig::default()
        }
    };
    if let Some(listen) = cli.listen {
        config.control.listen = listen;
    }

    info!(
        admission   = ?config.scheduler.admission,
        max_tasks   = config.scheduler.max_tasks,
        rt_priority = config.scheduler.rt_priority,
        listen      = %config.control.listen,
        dry_run     = cli.dry_run,
        "Configuration"
    );

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let os = os_backend(cli.dry_run);
    let sched = Arc::new(Scheduler::start(
        config.scheduler,
        Arc::new(MonotonicClock::new()),
        os,
    )?);

    // ── Control surface ───────────────────────────────────────────────────────
    let listener = TcpListener::bind(&config.control.listen)
        .await
        .with_context(|| format!("Cannot bind control surface to {}", config.control.listen))?;

    let served = server::serve(listener, sched.clone(), async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    })
    .await;

    sched.shutdown();
    info!("rmsched stopped");
    served
}

#[cfg(target_os = "linux")]
fn os_backend(dry_run: bool) -> Arc<dyn OsBackend> {
    if dry_run {
        info!("Dry run: OS directives are logged, not applied");
        Arc::new(DryRunBackend::new())
    } else {
        Arc::new(rmsched::os::linux::LinuxBackend::new())
    }
}

#[cfg(not(target_os = "linux"))]
fn os_backend(dry_run: bool) -> Arc<dyn OsBackend> {
    if !dry_run {
        warn!("No OS backend for this platform; falling back to dry run");
    }
    Arc::new(DryRunBackend::new())
}
