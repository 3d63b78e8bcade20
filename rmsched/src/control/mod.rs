/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Line-oriented control protocol.
//!
//! | Request | Operation | Response |
//! |---|---|---|
//! | `R: <pid>, <period_ms>, <computation_ms>` | register | `OK` / `ERR <msg>` |
//! | `Y: <pid>` | yield | `OK` / `ERR <msg>` |
//! | `D: <pid>` | deregister | `OK` / `ERR <msg>` |
//! | `S` | status | task listing followed by `END` |
//!
//! Whitespace around fields is ignored and a trailing `.` is accepted, so the
//! classic `R: 1234, 100, 20.` form parses too.
//!
//! The network side lives in [`server`].

pub mod server;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::scheduler::Scheduler;
use crate::task::{TaskId, TaskStatus};

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Register {
        id: TaskId,
        period_ms: u32,
        computation_ms: u32,
    },
    Yield(TaskId),
    Deregister(TaskId),
    Status,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty request")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid number for '{field}': '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unexpected trailing input '{0}'")]
    TrailingInput(String),
}

fn parse_field<T: FromStr>(
    fields: &mut std::str::Split<'_, char>,
    field: &'static str,
) -> Result<T, ParseError> {
    let raw = fields
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingField(field))?;
    raw.parse().map_err(|_| ParseError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let line = line.strip_suffix('.').unwrap_or(line).trim_end();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let (verb, args) = match line.split_once(':') {
            Some((verb, args)) => (verb.trim(), args),
            None => (line, ""),
        };

        let mut fields = args.split(',');
        let cmd = match verb {
            "R" => Command::Register {
                id: TaskId(parse_field(&mut fields, "pid")?),
                period_ms: parse_field(&mut fields, "period")?,
                computation_ms: parse_field(&mut fields, "computation")?,
            },
            "Y" => Command::Yield(TaskId(parse_field(&mut fields, "pid")?)),
            "D" => Command::Deregister(TaskId(parse_field(&mut fields, "pid")?)),
            "S" => {
                if !args.trim().is_empty() {
                    return Err(ParseError::TrailingInput(args.trim().to_string()));
                }
                return Ok(Command::Status);
            }
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };

        let rest: Vec<&str> = fields.map(str::trim).filter(|s| !s.is_empty()).collect();
        if !rest.is_empty() {
            return Err(ParseError::TrailingInput(rest.join(", ")));
        }
        Ok(cmd)
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Err(String),
    Status(Vec<TaskStatus>),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => f.write_str("OK"),
            Response::Err(msg) => write!(f, "ERR {msg}"),
            Response::Status(tasks) => f.write_str(&render_status(tasks)),
        }
    }
}

/// Task listing, one block per task in registration order, terminated by
/// `END`.
pub fn render_status(tasks: &[TaskStatus]) -> String {
    let mut out = String::new();
    for (i, t) in tasks.iter().enumerate() {
        out.push_str(&format!(
            "Process # {} details:\nPID:{}\nP:{}\nC:{}\n",
            i + 1,
            t.id,
            t.period_ms,
            t.computation_ms
        ));
    }
    out.push_str("END");
    out
}

/// Apply one command to the scheduler.
///
/// Yield and deregister may block briefly on timer cancellation, so async
/// callers run this on a blocking thread.
pub fn handle(sched: &Scheduler, cmd: Command) -> Response {
    debug!(?cmd, "control request");
    let result = match cmd {
        Command::Register {
            id,
            period_ms,
            computation_ms,
        } => sched.register(id, period_ms, computation_ms).map(|_| ()),
        Command::Yield(id) => sched.yield_task(id),
        Command::Deregister(id) => sched.deregister(id),
        Command::Status => return Response::Status(sched.status()),
    };
    match result {
        Ok(()) => Response::Ok,
        Err(e) => Response::Err(e.to_string()),
    }
}

/// Parse and apply one request line.
pub fn handle_line(sched: &Scheduler, line: &str) -> Response {
    match line.parse::<Command>() {
        Ok(cmd) => handle(sched, cmd),
        Err(e) => Response::Err(e.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SchedulerConfig;
    use crate::os::RecordingBackend;
    use crate::task::TaskState;
    use std::sync::Arc;

    fn sched() -> Scheduler {
        Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(ManualClock::new(0)),
            Arc::new(RecordingBackend::accept_all()),
        )
    }

    #[test]
    fn parses_classic_register_line() {
        assert_eq!(
            "R: 1234, 100, 20.".parse(),
            Ok(Command::Register {
                id: TaskId(1234),
                period_ms: 100,
                computation_ms: 20
            })
        );
    }

    #[test]
    fn parses_without_spaces_or_trailing_dot() {
        assert_eq!(
            "R:7,50,5".parse(),
            Ok(Command::Register {
                id: TaskId(7),
                period_ms: 50,
                computation_ms: 5
            })
        );
        assert_eq!("Y: 7".parse(), Ok(Command::Yield(TaskId(7))));
        assert_eq!("  D:7.  ".parse(), Ok(Command::Deregister(TaskId(7))));
        assert_eq!("S".parse(), Ok(Command::Status));
    }

    #[test]
    fn malformed_lines_are_reported() {
        assert_eq!("".parse::<Command>(), Err(ParseError::Empty));
        assert_eq!(
            "X: 1".parse::<Command>(),
            Err(ParseError::UnknownCommand("X".into()))
        );
        assert_eq!(
            "R: 1, 100".parse::<Command>(),
            Err(ParseError::MissingField("computation"))
        );
        assert_eq!(
            "Y: abc".parse::<Command>(),
            Err(ParseError::InvalidNumber {
                field: "pid",
                value: "abc".into()
            })
        );
        assert_eq!(
            "D: 1, 2".parse::<Command>(),
            Err(ParseError::TrailingInput("2".into()))
        );
    }

    #[test]
    fn status_rendering_matches_listing_format() {
        let tasks = vec![
            TaskStatus {
                id: TaskId(10),
                period_ms: 100,
                computation_ms: 20,
                state: TaskState::Sleeping,
                next_release: 100,
            },
            TaskStatus {
                id: TaskId(11),
                period_ms: 50,
                computation_ms: 5,
                state: TaskState::Ready,
                next_release: 50,
            },
        ];
        assert_eq!(
            render_status(&tasks),
            "Process # 1 details:\nPID:10\nP:100\nC:20\n\
             Process # 2 details:\nPID:11\nP:50\nC:5\nEND"
        );
        assert_eq!(render_status(&[]), "END");
    }

    #[test]
    fn handle_line_drives_the_scheduler() {
        let s = sched();
        assert_eq!(handle_line(&s, "R: 1, 100, 20."), Response::Ok);
        assert_eq!(
            handle_line(&s, "R: 1, 100, 20."),
            Response::Err("task 1 is already registered".into())
        );
        assert!(matches!(handle_line(&s, "S"), Response::Status(v) if v.len() == 1));
        assert_eq!(handle_line(&s, "Y: 1"), Response::Ok);
        assert_eq!(handle_line(&s, "D: 1"), Response::Ok);
        assert!(matches!(handle_line(&s, "D: 1"), Response::Err(_)));
        assert!(matches!(handle_line(&s, "bogus"), Response::Err(_)));
    }

    #[test]
    fn admission_rejection_is_an_error_response() {
        let s = sched();
        assert_eq!(
            handle_line(&s, "R: 1, 10, 9"),
            Response::Err("admission rejected: utilization 900‰ exceeds bound 693‰".into())
        );
    }
}
