/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! OS collaborator primitives.
//!
//! The scheduler never runs threads itself; it projects its decisions onto the
//! host scheduler through [`OsBackend`]:
//!
//! | Decision | Directive |
//! |---|---|
//! | task dispatched | `set_priority(Fifo, rt_priority)` + `resume` |
//! | task preempted / yields | `set_priority(Normal, 0)` + `suspend` |
//! | running task deregistered | `set_priority(Normal, 0)` |
//!
//! Implementations: [`RecordingBackend`] (in-memory history, used by tests),
//! [`DryRunBackend`] (logs each directive and keeps nothing, used by
//! `--dry-run`) and, on Linux, [`linux::LinuxBackend`].

#[cfg(target_os = "linux")]
pub mod linux;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::info;

use crate::task::{SchedPolicy, TaskId};

// ── Process handle ────────────────────────────────────────────────────────────

/// Resolved handle to the OS thread/process behind a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.pid)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure of a priority / suspend / resume primitive.
///
/// Never fatal: the scheduler logs it and keeps operating on its internal
/// state.
#[derive(Debug, Error)]
#[error("{op} failed for pid {pid}: {reason}")]
pub struct OsError {
    pub op: &'static str,
    pub pid: u32,
    pub reason: String,
}

// ── Backend trait ─────────────────────────────────────────────────────────────

pub trait OsBackend: Send + Sync {
    /// Resolve a task identifier to a live process.
    fn lookup_process(&self, id: TaskId) -> Option<ProcessHandle>;

    fn set_priority(
        &self,
        handle: ProcessHandle,
        policy: SchedPolicy,
        level: i32,
    ) -> Result<(), OsError>;

    fn suspend(&self, handle: ProcessHandle) -> Result<(), OsError>;

    fn resume(&self, handle: ProcessHandle) -> Result<(), OsError>;
}

// ── RecordingBackend ──────────────────────────────────────────────────────────

/// One directive observed by [`RecordingBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsCall {
    SetPriority {
        pid: u32,
        policy: SchedPolicy,
        level: i32,
    },
    Suspend(u32),
    Resume(u32),
}

/// In-memory backend that records every directive in issue order.
///
/// Process lookup succeeds either for every id (`accept_all`) or only for the
/// ids that were added explicitly.  Primitive failures can be injected to
/// exercise the non-fatal error path.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    /// `None` → every id resolves.
    known: Mutex<Option<HashSet<u32>>>,
    calls: Mutex<Vec<OsCall>>,
    failing: AtomicBool,
}

impl RecordingBackend {
    /// Backend where every task id resolves to a process of the same pid.
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Backend where only `pids` resolve.
    pub fn with_processes(pids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            known: Mutex::new(Some(pids.into_iter().collect())),
            ..Default::default()
        }
    }

    pub fn add_process(&self, pid: u32) {
        if let Some(set) = self.known.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            set.insert(pid);
        }
    }

    /// Make every subsequent primitive return an error (lookups still work).
    pub fn fail_primitives(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// Copy of all directives recorded so far.
    pub fn calls(&self) -> Vec<OsCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the recorded directives.
    pub fn take_calls(&self) -> Vec<OsCall> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record(&self, op: &'static str, call: OsCall, pid: u32) -> Result<(), OsError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(OsError {
                op,
                pid,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl OsBackend for RecordingBackend {
    fn lookup_process(&self, id: TaskId) -> Option<ProcessHandle> {
        match &*self.known.lock().unwrap_or_else(PoisonError::into_inner) {
            None => Some(ProcessHandle::new(id.0)),
            Some(set) if set.contains(&id.0) => Some(ProcessHandle::new(id.0)),
            Some(_) => None,
        }
    }

    fn set_priority(
        &self,
        handle: ProcessHandle,
        policy: SchedPolicy,
        level: i32,
    ) -> Result<(), OsError> {
        let pid = handle.pid();
        self.record(
            "set_priority",
            OsCall::SetPriority { pid, policy, level },
            pid,
        )
    }

    fn suspend(&self, handle: ProcessHandle) -> Result<(), OsError> {
        self.record("suspend", OsCall::Suspend(handle.pid()), handle.pid())
    }

    fn resume(&self, handle: ProcessHandle) -> Result<(), OsError> {
        self.record("resume", OsCall::Resume(handle.pid()), handle.pid())
    }
}

// ── DryRunBackend ─────────────────────────────────────────────────────────────

/// Backend for daemons that must not touch real processes.  Every id
/// resolves; every directive is logged and succeeds.
#[derive(Debug, Default)]
pub struct DryRunBackend;

impl DryRunBackend {
    pub fn new() -> Self {
        Self
    }
}

impl OsBackend for DryRunBackend {
    fn lookup_process(&self, id: TaskId) -> Option<ProcessHandle> {
        Some(ProcessHandle::new(id.0))
    }

    fn set_priority(
        &self,
        handle: ProcessHandle,
        policy: SchedPolicy,
        level: i32,
    ) -> Result<(), OsError> {
        info!(pid = handle.pid(), ?policy, level, "dry run: set priority");
        Ok(())
    }

    fn suspend(&self, handle: ProcessHandle) -> Result<(), OsError> {
        info!(pid = handle.pid(), "dry run: suspend");
        Ok(())
    }

    fn resume(&self, handle: ProcessHandle) -> Result<(), OsError> {
        info!(pid = handle.pid(), "dry run: resume");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
