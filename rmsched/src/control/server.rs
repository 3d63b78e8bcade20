/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! TCP front end for the control protocol.
//!
//! One tokio task per connection.  Each request line is answered before the
//! next one is read; a malformed or oversized line gets an `ERR` response and
//! the connection stays open.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::{handle_line, Response};
use crate::scheduler::Scheduler;

/// Accept connections until `shutdown` resolves.
///
/// In-flight connections are not awaited; the caller tears down the
/// scheduler afterwards, which answers any late request with `ERR`.
pub async fn serve(
    listener: TcpListener,
    sched: Arc<Scheduler>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let local = listener
        .local_addr()
        .context("control listener has no local address")?;
    info!(addr = %local, "control server listening");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("control server stopping");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "control connection accepted");
                        let sched = sched.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, sched).await {
                                warn!(%peer, "control connection closed with error: {:#}", e);
                            }
                        });
                    }
                    Err(e) => error!("accept failed: {}", e),
                }
            }
        }
    }
}

/// Longest accepted request line, excluding the newline.
pub const MAX_REQUEST_LEN: usize = 50;

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line(String),
    TooLong,
    Eof,
}

/// Read one newline-terminated request of at most [`MAX_REQUEST_LEN`] bytes.
///
/// An oversized line is discarded up to and including its newline.
async fn read_request<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Frame> {
    buf.clear();
    let n = (&mut *reader)
        .take(MAX_REQUEST_LEN as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if n == 0 {
        return Ok(Frame::Eof);
    }

    if buf.last() != Some(&b'\n') && buf.len() > MAX_REQUEST_LEN {
        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    reader.consume(pos + 1);
                    break;
                }
                None => {
                    let len = available.len();
                    reader.consume(len);
                }
            }
        }
        return Ok(Frame::TooLong);
    }

    let line = String::from_utf8_lossy(buf);
    Ok(Frame::Line(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn serve_connection(stream: TcpStream, sched: Arc<Scheduler>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(MAX_REQUEST_LEN + 1);

    loop {
        let frame = read_request(&mut reader, &mut buf)
            .await
            .context("failed to read request")?;
        let response = match frame {
            Frame::Eof => break,
            Frame::TooLong => {
                warn!(limit = MAX_REQUEST_LEN, "oversized control request discarded");
                Response::Err(format!("request exceeds {MAX_REQUEST_LEN} bytes"))
            }
            Frame::Line(line) if line.trim().is_empty() => continue,
            Frame::Line(line) => {
                let sched = sched.clone();
                tokio::task::spawn_blocking(move || handle_line(&sched, &line))
                    .await
                    .unwrap_or_else(|e| Response::Err(format!("internal error: {e}")))
            }
        };

        let mut out = response.to_string();
        out.push('\n');
        writer
            .write_all(out.as_bytes())
            .await
            .context("failed to write response")?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
