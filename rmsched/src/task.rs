/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core task data structures for the rate-monotonic scheduler.
//!
//! ```text
//! control surface ──(id, P, C)──►  TaskRecord  ──(status)──►  TaskStatus
//!                                   ↑ owned by TaskStore        ↑ read-only snapshot
//! ```
//!
//! # Ownership model
//! A [`TaskRecord`] is owned exclusively by the
//! [`TaskStore`](crate::scheduler::store::TaskStore).  The run queue and the
//! "currently running" slot only hold [`TaskKey`](crate::scheduler::store::TaskKey)s,
//! which are generation-checked on every lookup, so a stale reference resolves
//! to `None` instead of a freed record.

use std::fmt;
use std::str::FromStr;

use crate::os::ProcessHandle;

// ── Task identifier ───────────────────────────────────────────────────────────

/// Opaque task identifier (the registering process id).
///
/// Unique among live records; the store rejects a second registration with
/// [`SchedError::DuplicateId`](crate::scheduler::SchedError::DuplicateId).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(TaskId)
    }
}

impl From<u32> for TaskId {
    fn from(v: u32) -> Self {
        TaskId(v)
    }
}

// ── Task state ────────────────────────────────────────────────────────────────

/// Scheduling state of a registered task.
///
/// ```text
///            timer fires              dispatcher picks
/// SLEEPING ─────────────► READY ─────────────────────► RUNNING
///     ▲                    ▲ │                            │
///     │                    │ └── yield (boundary passed) ─┤
///     │                    └────── preempted ─────────────┤
///     └──────────── yield (time left in period) ──────────┘
/// ```
///
/// Deregistration removes the task from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    /// Waiting for its next period; not competing for the CPU.
    #[default]
    Sleeping,
    /// Period has elapsed; sitting in the run queue.
    Ready,
    /// Selected by the dispatcher.  At most one task system-wide.
    Running,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Sleeping => "SLEEPING",
            TaskState::Ready => "READY",
            TaskState::Running => "RUNNING",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Scheduling policy ─────────────────────────────────────────────────────────

/// Linux scheduling policy applied to a task's thread.
///
/// The running task is raised to `Fifo` at the configured real-time level;
/// every other task is held at `Normal` with level `0` (the baseline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    /// `SCHED_NORMAL` – standard Linux CFS scheduling.
    #[default]
    Normal,
    /// `SCHED_FIFO` – real-time FIFO.
    Fifo,
    /// `SCHED_RR` – real-time round-robin.
    RoundRobin,
}

impl SchedPolicy {
    /// Convert to the integer value expected by `sched_setscheduler(2)`.
    pub fn to_linux_int(self) -> i32 {
        match self {
            SchedPolicy::Normal => 0,
            SchedPolicy::Fifo => 1,
            SchedPolicy::RoundRobin => 2,
        }
    }
}

// ── TaskRecord ────────────────────────────────────────────────────────────────

/// One registered periodic task.
///
/// `period_ms` and `computation_ms` are immutable after registration;
/// `state` and `next_release` are mutated only under the store lock.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,

    /// OS handle resolved once at registration.
    pub process: ProcessHandle,

    /// Worst-case computation budget per period, in ms.
    pub computation_ms: u32,

    /// Release period in ms.  Shorter period = higher priority.
    pub period_ms: u32,

    pub state: TaskState,

    /// Absolute clock tick (ms) at which the current period ends and the next
    /// one begins.
    pub next_release: u64,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        process: ProcessHandle,
        period_ms: u32,
        computation_ms: u32,
        now: u64,
    ) -> Self {
        Self {
            id,
            process,
            computation_ms,
            period_ms,
            state: TaskState::Sleeping,
            next_release: now + u64::from(period_ms),
        }
    }

    /// Scaled utilisation `1000 * C / P` (truncating).
    pub fn utilization_permille(&self) -> u64 {
        crate::scheduler::admission::scaled_utilization(self.computation_ms, self.period_ms)
    }

    /// Read-only view for status reporting.
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            id: self.id,
            period_ms: self.period_ms,
            computation_ms: self.computation_ms,
            state: self.state,
            next_release: self.next_release,
        }
    }
}

// ── TaskStatus ────────────────────────────────────────────────────────────────

/// Snapshot of one record, as returned by
/// [`Scheduler::status`](crate::scheduler::Scheduler::status).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub id: TaskId,
    pub period_ms: u32,
    pub computation_ms: u32,
    pub state: TaskState,
    pub next_release: u64,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_sleeping_one_period_out() {
        let rec = TaskRecord::new(TaskId(7), ProcessHandle::new(7), 100, 20, 1_000);
        assert_eq!(rec.state, TaskState::Sleeping);
        assert_eq!(rec.next_release, 1_100);
        assert_eq!(rec.utilization_permille(), 200);
    }

    #[test]
    fn task_id_parses_with_surrounding_whitespace() {
        assert_eq!(" 42 ".parse::<TaskId>().unwrap(), TaskId(42));
        assert!("abc".parse::<TaskId>().is_err());
    }

    #[test]
    fn policy_maps_to_linux_constants() {
        assert_eq!(SchedPolicy::Normal.to_linux_int(), 0);
        assert_eq!(SchedPolicy::Fifo.to_linux_int(), 1);
        assert_eq!(SchedPolicy::RoundRobin.to_linux_int(), 2);
    }

    #[test]
    fn status_copies_every_field() {
        let mut rec = TaskRecord::new(TaskId(1), ProcessHandle::new(1), 50, 10, 0);
        rec.state = TaskState::Ready;
        let st = rec.status();
        assert_eq!(st.id, TaskId(1));
        assert_eq!(st.period_ms, 50);
        assert_eq!(st.computation_ms, 10);
        assert_eq!(st.state, TaskState::Ready);
        assert_eq!(st.next_release, 50);
    }
}
