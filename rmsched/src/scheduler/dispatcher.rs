/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Dispatcher: selects the highest-priority READY task and enforces
//! preemption.
//!
//! One cycle ([`Shared::dispatch_once`]):
//!
//! 1. Peek the run-queue head `T`.  Empty queue → nothing to do.
//! 2. If `R` is RUNNING and `R.period ≤ T.period`, `R` keeps the CPU.
//! 3. Otherwise demote `R` (READY, back into the queue, baseline priority,
//!    suspended) and clear the running slot.
//! 4. Pop `T`, mark it RUNNING, raise it to `SCHED_FIFO` at the configured
//!    level, resume it, and advance `T.next_release` by one period.
//!
//! State transitions happen under the store lock and the run-queue spin lock.
//! The directives lock is taken before the store lock is released, and the
//! OS directives are issued under it alone, so they reach the OS in
//! transition order while release callbacks proceed.
//!
//! The background thread ([`Shared::dispatcher_loop`]) blocks on [`Wakeup`]
//! and runs one cycle per signal.

use std::sync::{Condvar, Mutex, PoisonError};

use tracing::{debug, info, warn};

use super::Shared;
use crate::task::{SchedPolicy, TaskId, TaskState};

// ── Outcome ───────────────────────────────────────────────────────────────────

/// What one dispatch cycle decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The run queue was empty.
    Idle,
    /// The running task has equal or higher priority than the queue head.
    Kept { running: TaskId },
    /// `task` now runs; `preempted` was demoted to make room for it.
    Dispatched {
        task: TaskId,
        preempted: Option<TaskId>,
    },
}

// ── Wakeup ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct WakeState {
    pending: bool,
    stopped: bool,
}

/// Level-triggered wakeup for the dispatcher thread.  Signals that arrive
/// while a cycle is running are not lost.
#[derive(Debug, Default)]
pub(crate) struct Wakeup {
    state: Mutex<WakeState>,
    cv: Condvar,
}

impl Wakeup {
    pub(crate) fn signal(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending = true;
        self.cv.notify_one();
    }

    /// Block until signalled.  Returns `false` once stopped.
    pub(crate) fn wait(&self) -> bool {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !st.pending && !st.stopped {
            st = self.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
        st.pending = false;
        !st.stopped
    }

    pub(crate) fn stop(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stopped = true;
        self.cv.notify_all();
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
    }
}

// ── Dispatch cycle ────────────────────────────────────────────────────────────

impl Shared {
    pub(crate) fn dispatch_once(&self) -> DispatchOutcome {
        let mut store = self.lock_store();

        let (next, preempted) = {
            let mut ds = self.dispatch.lock();

            let Some(head) = ds.queue.peek_highest_priority() else {
                return DispatchOutcome::Idle;
            };

            if store.get(head.key).is_none() {
                // Deregistration removes queue entries under the same locks,
                // so this only guards against a broken invariant.
                warn!(key = %head.key, "run queue head has no record; dropping it");
                ds.queue.remove(head.key);
                drop(ds);
                self.wakeup.signal();
                return DispatchOutcome::Idle;
            }

            let mut preempted = None;
            if let Some(cur_key) = ds.current {
                match store.get_mut(cur_key) {
                    None => {
                        warn!(key = %cur_key, "running slot points at a removed record; clearing");
                        ds.current = None;
                    }
                    Some(cur) if cur.period_ms <= head.period_ms => {
                        debug!(
                            running = %cur.id,
                            running_period = cur.period_ms,
                            head_period = head.period_ms,
                            "running task keeps the CPU"
                        );
                        return DispatchOutcome::Kept { running: cur.id };
                    }
                    Some(cur) => {
                        cur.state = TaskState::Ready;
                        ds.queue.insert(cur_key, cur.period_ms);
                        ds.current = None;
                        preempted = Some((cur.id, cur.process));
                    }
                }
            }

            let Some(entry) = ds.queue.pop_highest_priority() else {
                return DispatchOutcome::Idle;
            };
            let Some(next) = store.get_mut(entry.key) else {
                return DispatchOutcome::Idle;
            };
            next.state = TaskState::Running;
            next.next_release += u64::from(next.period_ms);
            ds.current = Some(entry.key);

            (
                (next.id, next.process, next.period_ms, next.next_release),
                preempted,
            )
        };

        let (task, process, period_ms, next_release) = next;

        let directives = self.lock_directives();
        drop(store);

        if let Some((id, demoted)) = preempted {
            info!(task = %id, by = %task, "preempting running task");
            self.os_directive(id, self.os.set_priority(demoted, SchedPolicy::Normal, 0));
            self.os_directive(id, self.os.suspend(demoted));
        }

        self.os_directive(
            task,
            self.os
                .set_priority(process, SchedPolicy::Fifo, self.config.rt_priority),
        );
        self.os_directive(task, self.os.resume(process));
        drop(directives);

        info!(task = %task, period_ms, next_release, "dispatched");

        DispatchOutcome::Dispatched {
            task,
            preempted: preempted.map(|(id, _)| id),
        }
    }

    /// Dispatcher thread body.
    pub(crate) fn dispatcher_loop(&self) {
        info!("dispatcher thread started");
        while self.wakeup.wait() {
            let outcome = self.dispatch_once();
            debug!(?outcome, "dispatch cycle");
        }
        info!("dispatcher thread stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
