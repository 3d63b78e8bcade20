/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the rate-monotonic scheduler.
//!
//! Every variant is recoverable at the point of the originating request and
//! is reported back through the control surface as `ERR <message>`:
//!
//! | Variant | Raised by |
//! |---|---|
//! | `InvalidParameters` | `register` – zero period/budget or `C > P` |
//! | `ProcessLookupFailed` | `register` – OS cannot resolve the id |
//! | `DuplicateId` | `register` – id already live |
//! | `Rejected` | `register` – utilisation bound exceeded |
//! | `CapacityExhausted` | `register` – record arena full |
//! | `NotFound` | `yield` / `deregister` on an unknown id |
//! | `TimerRaceIgnored` | release timer fired after deregistration (logged only) |
//! | `ShuttingDown` | any request after `shutdown()` |
//!
//! None of these ever reaches the dispatcher loop as a panic.

use thiserror::Error;

use super::store::TaskKey;
use crate::task::TaskId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedError {
    /// Admission control: the scaled utilisation with the candidate would
    /// exceed the bound.  Both values are in permille.
    #[error("admission rejected: utilization {utilization}‰ exceeds bound {bound}‰")]
    Rejected { utilization: u64, bound: u64 },

    #[error("task {0} is already registered")]
    DuplicateId(TaskId),

    #[error("task {0} is not registered")]
    NotFound(TaskId),

    #[error("no process found for task {0}")]
    ProcessLookupFailed(TaskId),

    /// A release fired for a record that no longer exists.  Logged, never
    /// escalated.
    #[error("release timer for {0} fired after deregistration")]
    TimerRaceIgnored(TaskKey),

    /// The record arena is full (or a record could not be allocated).
    #[error("task table exhausted (capacity {capacity})")]
    CapacityExhausted { capacity: usize },

    #[error("invalid task parameters: period {period_ms}ms, computation {computation_ms}ms")]
    InvalidParameters { period_ms: u32, computation_ms: u32 },

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_message_carries_both_values() {
        let e = SchedError::Rejected {
            utilization: 1200,
            bound: 693,
        };
        let msg = e.to_string();
        assert!(msg.contains("1200"), "{msg}");
        assert!(msg.contains("693"), "{msg}");
    }

    #[test]
    fn not_found_names_the_task() {
        assert_eq!(
            SchedError::NotFound(TaskId(12)).to_string(),
            "task 12 is not registered"
        );
    }
}
