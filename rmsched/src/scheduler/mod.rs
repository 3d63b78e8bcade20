//! Rate-monotonic scheduler context.
//!
//! [`Scheduler`] owns every piece of shared state: the task record store, the
//! run queue with its "currently running" slot, the release timers and the
//! dispatcher wakeup.  It is constructed explicitly, optionally starts its two
//! background threads, and tears everything down in [`Scheduler::shutdown`].
//!
//! # Data flow
//! ```text
//! register ─► admission ─► TaskStore ─► ReleaseTimers ─► RunQueue ─► dispatcher ─► OsBackend
//!                                            ▲                           │
//!                                            └──── yield (rearm) ◄───────┘
//! ```
//!
//! # Locking discipline
//!
//! | Lock | Kind | Guards |
//! |---|---|---|
//! | `store` | `std::sync::Mutex` | record existence, `state`, `next_release` |
//! | `dispatch` | `spin::Mutex` | run queue + running slot |
//! | timer table | `std::sync::Mutex` (internal) | armed deadlines |
//! | `directives` | `std::sync::Mutex<()>` | order of OS directives |
//!
//! Order is always `store` → `dispatch`, `store` → timer table and `store` →
//! `directives`.  A state change takes `directives` before it releases
//! `store` and issues its OS directives after, so directives reach the OS in
//! transition order while the release callback, which only needs `store`,
//! never waits on a syscall.  The spin lock is never held across an OS
//! directive or any other lock acquisition.  Timer cancellation that waits
//! for an in-flight callback runs only after the store lock has been
//! released, because the callback itself takes it.
//!
//! # Example
//! ```rust
//! use std::sync::Arc;
//! use rmsched::clock::ManualClock;
//! use rmsched::config::SchedulerConfig;
//! use rmsched::os::RecordingBackend;
//! use rmsched::scheduler::{DispatchOutcome, Scheduler};
//! use rmsched::task::TaskId;
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let sched = Scheduler::new(
//!     SchedulerConfig::default(),
//!     clock.clone(),
//!     Arc::new(RecordingBackend::accept_all()),
//! );
//!
//! sched.register(TaskId(1), 100, 20).unwrap();
//! clock.advance(100);
//! sched.fire_due_timers();
//! assert!(matches!(sched.dispatch_once(), DispatchOutcome::Dispatched { .. }));
//! ```

pub mod admission;
pub mod dispatcher;
pub mod error;
pub mod run_queue;
pub mod store;
pub mod timer;

pub use dispatcher::DispatchOutcome;
pub use error::SchedError;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::os::{OsBackend, OsError};
use crate::task::{SchedPolicy, TaskId, TaskRecord, TaskState, TaskStatus};

use dispatcher::Wakeup;
use run_queue::DispatchState;
use store::{TaskKey, TaskStore};
use timer::ReleaseTimers;

// ── Shared state ──────────────────────────────────────────────────────────────

/// Everything the control surface, the dispatcher thread and the timer thread
/// share.
pub(crate) struct Shared {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    os: Arc<dyn OsBackend>,
    store: Mutex<TaskStore>,
    dispatch: spin::Mutex<DispatchState>,
    timers: ReleaseTimers,
    wakeup: Wakeup,
    /// Serialises OS directives without holding `store`.
    directives: Mutex<()>,
    shutting_down: AtomicBool,
}

impl Shared {
    fn lock_store(&self) -> MutexGuard<'_, TaskStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_directives(&self) -> MutexGuard<'_, ()> {
        self.directives.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `shutting_down` is set before teardown drains the store, so a caller
    /// that sees `false` while holding the store lock mutates a store that
    /// teardown has not reached yet.
    fn ensure_running(&self) -> Result<(), SchedError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SchedError::ShuttingDown);
        }
        Ok(())
    }

    /// Log a failed OS primitive.  Never fatal.
    fn os_directive(&self, task: TaskId, result: Result<(), OsError>) {
        if let Err(e) = result {
            warn!(task = %task, error = %e, "OS directive failed; continuing on internal state");
        }
    }

    /// Release callback: SLEEPING → READY, enqueue, wake the dispatcher.
    fn release(&self, key: TaskKey) -> Result<(), SchedError> {
        let mut store = self.lock_store();
        let Some(rec) = store.get_mut(key) else {
            return Err(SchedError::TimerRaceIgnored(key));
        };

        let (id, state) = (rec.id, rec.state);
        if state == TaskState::Sleeping {
            rec.state = TaskState::Ready;
            self.dispatch.lock().queue.insert(key, rec.period_ms);
        }
        drop(store);

        if state == TaskState::Sleeping {
            debug!(task = %id, "period released");
        } else {
            debug!(task = %id, state = %state, "release for a task that is not sleeping");
        }
        self.wakeup.signal();
        Ok(())
    }

    fn on_timer(&self, key: TaskKey) {
        if let Err(e) = self.release(key) {
            warn!(error = %e, "release ignored");
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// The rate-monotonic scheduler context.
///
/// Built with [`new`](Self::new) it has no threads: callers drive
/// [`fire_due_timers`](Self::fire_due_timers) and
/// [`dispatch_once`](Self::dispatch_once) themselves.  Built with
/// [`start`](Self::start) a timer thread and a dispatcher thread do that work.
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>, os: Arc<dyn OsBackend>) -> Self {
        info!(
            admission = ?config.admission,
            max_tasks = config.max_tasks,
            rt_priority = config.rt_priority,
            "scheduler created"
        );
        let shared = Shared {
            store: Mutex::new(TaskStore::with_capacity(config.max_tasks)),
            dispatch: spin::Mutex::new(DispatchState::default()),
            timers: ReleaseTimers::new(clock.clone()),
            wakeup: Wakeup::default(),
            directives: Mutex::new(()),
            shutting_down: AtomicBool::new(false),
            config,
            clock,
            os,
        };
        Self {
            shared: Arc::new(shared),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Create the scheduler and spawn the timer and dispatcher threads.
    pub fn start(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        os: Arc<dyn OsBackend>,
    ) -> anyhow::Result<Self> {
        let sched = Self::new(config, clock, os);

        let timer = {
            let shared = sched.shared.clone();
            thread::Builder::new()
                .name("rmsched-timer".into())
                .spawn(move || shared.timers.run(|key| shared.on_timer(key)))
                .context("failed to spawn release timer thread")?
        };
        sched.lock_threads().push(timer);

        let dispatcher = {
            let shared = sched.shared.clone();
            thread::Builder::new()
                .name("rmsched-dispatch".into())
                .spawn(move || shared.dispatcher_loop())
                .context("failed to spawn dispatcher thread")?
        };
        sched.lock_threads().push(dispatcher);

        info!("scheduler started");
        Ok(sched)
    }

    fn lock_threads(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Register ──────────────────────────────────────────────────────────────

    /// Admit and register a periodic task.  The first release is scheduled at
    /// `now + period_ms`.
    ///
    /// Admission and insertion run inside one store critical section, so two
    /// concurrent registrations can never both pass against the same total.
    ///
    /// # Errors
    /// `InvalidParameters`, `ProcessLookupFailed`, `DuplicateId`, `Rejected`,
    /// `CapacityExhausted` or `ShuttingDown`.  On error nothing is mutated.
    pub fn register(
        &self,
        id: TaskId,
        period_ms: u32,
        computation_ms: u32,
    ) -> Result<TaskId, SchedError> {
        self.shared.ensure_running()?;

        if period_ms == 0 || computation_ms == 0 || computation_ms > period_ms {
            warn!(task = %id, period_ms, computation_ms, "registration with invalid parameters");
            return Err(SchedError::InvalidParameters {
                period_ms,
                computation_ms,
            });
        }

        let shared = &self.shared;
        let process = shared.os.lookup_process(id).ok_or_else(|| {
            warn!(task = %id, "registration failed: process not found");
            SchedError::ProcessLookupFailed(id)
        })?;

        let mut store = shared.lock_store();
        shared.ensure_running()?;
        if store.contains(id) {
            return Err(SchedError::DuplicateId(id));
        }

        let utilization = admission::admit(
            &shared.config.admission,
            store.utilization_permille(),
            store.len(),
            computation_ms,
            period_ms,
        )
        .map_err(|e| {
            warn!(task = %id, period_ms, computation_ms, error = %e, "registration failed admission control");
            e
        })?;

        let now = shared.clock.now_ms();
        let record = TaskRecord::new(id, process, period_ms, computation_ms, now);
        let first_release = record.next_release;
        let key = store.insert(record)?;
        shared.timers.install(key);
        shared.timers.arm_at(key, first_release);
        drop(store);

        info!(
            task = %id,
            period_ms,
            computation_ms,
            total_permille = utilization,
            "registered"
        );
        Ok(id)
    }

    // ── Yield ─────────────────────────────────────────────────────────────────

    /// The task gives up the rest of its slot for the current period.
    ///
    /// * Before the period boundary: SLEEPING, out of the run queue, timer
    ///   armed for `next_release`.
    /// * At or after the boundary: READY and queued (a new period is already
    ///   due).
    ///
    /// Only the task occupying the running slot clears it.  In both cases the
    /// task is dropped to baseline priority and suspended.
    pub fn yield_task(&self, id: TaskId) -> Result<(), SchedError> {
        self.shared.ensure_running()?;
        let shared = &self.shared;

        let mut store = shared.lock_store();
        shared.ensure_running()?;
        let now = shared.clock.now_ms();

        let (key, process, was_current, release_at) = {
            let mut ds = shared.dispatch.lock();
            let key = match ds.current {
                Some(k) if store.get(k).map(|r| r.id) == Some(id) => k,
                _ => store.find(id).ok_or_else(|| {
                    warn!(task = %id, "yield for unknown task");
                    SchedError::NotFound(id)
                })?,
            };
            let was_current = ds.current == Some(key);
            let rec = store.get_mut(key).ok_or(SchedError::NotFound(id))?;

            let release_at = if now < rec.next_release {
                rec.state = TaskState::Sleeping;
                ds.queue.remove(key);
                Some(rec.next_release)
            } else {
                if rec.state != TaskState::Ready {
                    rec.state = TaskState::Ready;
                    ds.queue.insert(key, rec.period_ms);
                }
                None
            };
            if was_current {
                ds.current = None;
            }
            (key, rec.process, was_current, release_at)
        };

        match release_at {
            Some(deadline) => {
                shared.timers.arm_at(key, deadline);
            }
            None => {
                // Already released by the yield itself; drop any stale expiry.
                shared.timers.disarm(key);
            }
        }

        let directives = shared.lock_directives();
        drop(store);
        shared.os_directive(id, shared.os.set_priority(process, SchedPolicy::Normal, 0));
        shared.os_directive(id, shared.os.suspend(process));
        drop(directives);

        match release_at {
            Some(deadline) => info!(
                task = %id,
                release_in_ms = deadline - now,
                "yield: sleeping until next period"
            ),
            None => info!(task = %id, "yield: period boundary already passed, task ready"),
        }

        if was_current || release_at.is_none() {
            shared.wakeup.signal();
        }
        Ok(())
    }

    // ── Deregister ────────────────────────────────────────────────────────────

    /// Remove a task from any state.
    ///
    /// The record leaves the store and the run queue atomically; its timer is
    /// then cancelled synchronously, and only afterwards is the record
    /// dropped.  The running task is reset to baseline priority; any other
    /// task is resumed so it is not left suspended.
    pub fn deregister(&self, id: TaskId) -> Result<(), SchedError> {
        self.shared.ensure_running()?;
        let shared = &self.shared;

        let mut store = shared.lock_store();
        shared.ensure_running()?;
        let Some(key) = store.find(id) else {
            info!(task = %id, "deregistration: task not found");
            return Err(SchedError::NotFound(id));
        };

        let was_current = {
            let mut ds = shared.dispatch.lock();
            ds.queue.remove(key);
            let was_current = ds.current == Some(key);
            if was_current {
                ds.current = None;
            }
            was_current
        };
        let record = store.remove(key).ok_or(SchedError::NotFound(id))?;

        let directives = shared.lock_directives();
        drop(store);
        if was_current {
            shared.os_directive(id, shared.os.set_priority(record.process, SchedPolicy::Normal, 0));
        } else {
            shared.os_directive(id, shared.os.resume(record.process));
        }
        drop(directives);

        shared.timers.remove(key);
        drop(record);

        info!(task = %id, was_running = was_current, "deregistered");
        shared.wakeup.signal();
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Snapshot of every registered task, in registration order.
    pub fn status(&self) -> Vec<TaskStatus> {
        let store = self.shared.lock_store();
        let mut out = Vec::with_capacity(store.len());
        store.for_each(|_, rec| out.push(rec.status()));
        out
    }

    pub fn task(&self, id: TaskId) -> Option<TaskStatus> {
        let store = self.shared.lock_store();
        store.find(id).and_then(|k| store.get(k)).map(TaskRecord::status)
    }

    /// Tracked scaled utilisation (permille) of the registered set.
    pub fn utilization(&self) -> u64 {
        self.shared.lock_store().utilization_permille()
    }

    /// The task in the running slot.
    pub fn current(&self) -> Option<TaskId> {
        let store = self.shared.lock_store();
        let current = self.shared.dispatch.lock().current;
        current.and_then(|k| store.get(k)).map(|r| r.id)
    }

    /// Run queue contents, head first.
    pub fn run_queue(&self) -> Vec<TaskId> {
        let store = self.shared.lock_store();
        let keys: Vec<TaskKey> = self.shared.dispatch.lock().queue.iter().map(|e| e.key).collect();
        keys.into_iter()
            .filter_map(|k| store.get(k).map(|r| r.id))
            .collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    // ── Manual drive ──────────────────────────────────────────────────────────

    /// Run one dispatcher cycle on the calling thread.
    pub fn dispatch_once(&self) -> DispatchOutcome {
        self.shared.dispatch_once()
    }

    /// Fire every release timer that is due on the calling thread.
    pub fn fire_due_timers(&self) -> usize {
        let shared = &self.shared;
        shared.timers.fire_due(|key| shared.on_timer(key))
    }

    /// Earliest armed release deadline.
    pub fn next_release_deadline(&self) -> Option<u64> {
        self.shared.timers.next_deadline()
    }

    /// Verify queue/registry consistency.  Returns every violation found.
    pub fn check_invariants(&self) -> Result<(), Vec<String>> {
        let store = self.shared.lock_store();
        let ds = self.shared.dispatch.lock();
        let mut violations = Vec::new();
        let mut running = Vec::new();
        let mut sum = 0;

        store.for_each(|key, rec| {
            sum += rec.utilization_permille();
            let queued = ds.queue.contains(key);
            if (rec.state == TaskState::Ready) != queued {
                violations.push(format!("task {} is {} but queued={queued}", rec.id, rec.state));
            }
            if rec.state == TaskState::Running {
                running.push(rec.id);
                if ds.current != Some(key) {
                    violations.push(format!("task {} is RUNNING but not in the running slot", rec.id));
                }
            }
        });

        if running.len() > 1 {
            violations.push(format!("more than one RUNNING task: {running:?}"));
        }
        if let Some(cur) = ds.current {
            match store.get(cur) {
                Some(rec) if rec.state == TaskState::Running => {}
                Some(rec) => violations.push(format!("running slot holds {} in state {}", rec.id, rec.state)),
                None => violations.push("running slot holds a removed record".to_string()),
            }
        }
        if !ds.queue.is_sorted() {
            violations.push("run queue is not sorted by period".to_string());
        }
        if ds.queue.iter().any(|e| store.get(e.key).is_none()) {
            violations.push("run queue references a removed record".to_string());
        }
        if sum != store.utilization_permille() {
            violations.push(format!(
                "tracked utilization {} != sum {sum}",
                store.utilization_permille()
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Stop both threads, cancel every timer and drop every record.
    ///
    /// Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("scheduler shutting down");
        let shared = &self.shared;

        shared.wakeup.stop();
        shared.timers.stop();
        for handle in self.lock_threads().drain(..) {
            if handle.join().is_err() {
                warn!("scheduler thread panicked");
            }
        }

        let mut store = shared.lock_store();
        let current = {
            let mut ds = shared.dispatch.lock();
            ds.queue.clear();
            ds.current.take()
        };
        let records = store.drain();
        let directives = shared.lock_directives();
        drop(store);
        for (key, rec) in &records {
            if Some(*key) == current {
                shared.os_directive(rec.id, shared.os.set_priority(rec.process, SchedPolicy::Normal, 0));
            } else {
                shared.os_directive(rec.id, shared.os.resume(rec.process));
            }
        }
        drop(directives);

        shared.timers.remove_all();
        info!(freed = records.len(), "scheduler torn down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
