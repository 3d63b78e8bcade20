/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Periodic workload process.
//!
//! Registers itself with the rmsched control surface, then runs `--jobs`
//! iterations of busy work lasting about `--computation` ms, yielding after
//! each one.  Under a real OS backend the daemon suspends the process between
//! periods; with `--self-pace` the process also sleeps to the next period
//! boundary itself, for daemons running in dry-run mode.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use thiserror::Error;
use tracing::{debug, error, info};

// ── CLI argument definition ───────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "rmsched-app",
    about = "Periodic workload driven by the rmsched control surface",
    long_about = None,
)]
struct Cli {
    /// Control surface address of the rmsched daemon.
    #[arg(short = 's', long = "server", default_value = "127.0.0.1:7878")]
    server: String,

    /// Period in milliseconds.
    #[arg(short = 'p', long = "period")]
    period_ms: u32,

    /// Computation time per period in milliseconds.
    #[arg(short = 'c', long = "computation")]
    computation_ms: u32,

    /// Number of jobs (periods) to run before deregistering.
    #[arg(short = 'j', long = "jobs", default_value_t = 10)]
    jobs: u32,

    /// Sleep to the next period boundary after every yield.
    #[arg(long = "self-pace", default_value_t = false)]
    self_pace: bool,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
enum AppError {
    #[error("scheduler refused '{request}': {reason}")]
    Refused { request: String, reason: String },

    #[error("unexpected response to '{request}': '{response}'")]
    Unexpected { request: String, response: String },

    #[error("control connection closed")]
    Closed,
}

/// Map one response line to success or [`AppError`].
fn check_response(request: &str, response: &str) -> Result<(), AppError> {
    let response = response.trim_end();
    if response == "OK" {
        return Ok(());
    }
    match response.strip_prefix("ERR ") {
        Some(reason) => Err(AppError::Refused {
            request: request.to_string(),
            reason: reason.to_string(),
        }),
        None => Err(AppError::Unexpected {
            request: request.to_string(),
            response: response.to_string(),
        }),
    }
}

// ── Control client ────────────────────────────────────────────────────────────

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(addr: &str) -> Result<Self> {
        let writer =
            TcpStream::connect(addr).with_context(|| format!("Cannot connect to {addr}"))?;
        let reader = BufReader::new(writer.try_clone().context("Cannot clone control stream")?);
        Ok(Self { reader, writer })
    }

    fn request(&mut self, line: &str) -> Result<()> {
        debug!(request = line, "sending");
        writeln!(self.writer, "{line}").context("failed to send request")?;

        let mut response = String::new();
        let n = self
            .reader
            .read_line(&mut response)
            .context("failed to read response")?;
        if n == 0 {
            return Err(AppError::Closed.into());
        }
        check_response(line, &response)?;
        Ok(())
    }
}

// ── Workload ──────────────────────────────────────────────────────────────────

/// Spin for `budget`, doing arithmetic the optimiser cannot drop.
fn busy_work(budget: Duration) -> u64 {
    let start = Instant::now();
    let mut acc: u64 = 1;
    let mut n: u64 = 1;
    while start.elapsed() < budget {
        for _ in 0..1_000 {
            acc = acc.wrapping_mul(n).wrapping_add(1);
            n = n % 20 + 1;
        }
    }
    std::hint::black_box(acc)
}

/// Start of the first period boundary strictly after `elapsed`.
fn next_boundary(elapsed: Duration, period: Duration) -> Duration {
    let p = period.as_millis().max(1);
    let k = elapsed.as_millis() / p + 1;
    Duration::from_millis((k * p) as u64)
}

fn run(cli: &Cli) -> Result<()> {
    let pid = process::id();
    let period = Duration::from_millis(u64::from(cli.period_ms));
    let mut client = Client::connect(&cli.server)?;

    client.request(&format!(
        "R: {pid}, {}, {}.",
        cli.period_ms, cli.computation_ms
    ))?;
    let origin = Instant::now();
    info!(pid, period_ms = cli.period_ms, computation_ms = cli.computation_ms, "registered");

    // Sleep until the first release.
    client.request(&format!("Y: {pid}"))?;
    if cli.self_pace {
        thread::sleep(next_boundary(origin.elapsed(), period).saturating_sub(origin.elapsed()));
    }

    for job in 0..cli.jobs {
        let started = origin.elapsed();
        busy_work(Duration::from_millis(u64::from(cli.computation_ms)));
        info!(
            pid,
            job,
            started_ms = started.as_millis() as u64,
            took_ms = (origin.elapsed() - started).as_millis() as u64,
            "job done"
        );

        client.request(&format!("Y: {pid}"))?;
        if cli.self_pace {
            let now = origin.elapsed();
            thread::sleep(next_boundary(now, period).saturating_sub(now));
        }
    }

    client.request(&format!("D: {pid}"))?;
    info!(pid, jobs = cli.jobs, "deregistered");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        error!("rmsched-app failed: {:#}", e);
        process::exit(1);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response_is_accepted() {
        assert_eq!(check_response("Y: 1", "OK\n"), Ok(()));
    }

    #[test]
    fn err_response_carries_reason() {
        assert_eq!(
            check_response("D: 1", "ERR task 1 is not registered\n"),
            Err(AppError::Refused {
                request: "D: 1".into(),
                reason: "task 1 is not registered".into()
            })
        );
    }

    #[test]
    fn garbage_response_is_unexpected() {
        assert!(matches!(
            check_response("S", "Process # 1 details:"),
            Err(AppError::Unexpected { .. })
        ));
    }

    #[test]
    fn next_boundary_is_strictly_after() {
        let p = Duration::from_millis(100);
        assert_eq!(next_boundary(Duration::ZERO, p), p);
        assert_eq!(
            next_boundary(Duration::from_millis(100), p),
            Duration::from_millis(200)
        );
        assert_eq!(
            next_boundary(Duration::from_millis(250), p),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn busy_work_lasts_at_least_the_budget() {
        let start = Instant::now();
        busy_work(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
