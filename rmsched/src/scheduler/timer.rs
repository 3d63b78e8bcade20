/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Release Timer Service: one one-shot timer per registered task.
//!
//! A timer is installed at registration and removed at deregistration.  Each
//! `arm` / `rearm` makes it fire exactly once at `now + delay`, invoking the
//! release callback with the task's [`TaskKey`].
//!
//! Expiry is driven by [`ReleaseTimers::fire_due`].  The background timer
//! thread calls it from [`ReleaseTimers::run`]; tests call it directly after
//! advancing a [`ManualClock`](crate::clock::ManualClock).
//!
//! # Synchronous cancellation
//! The table lock is released while a callback runs, and the key is parked
//! in `in_flight` for the duration.  [`cancel`](ReleaseTimers::cancel) and
//! [`remove`](ReleaseTimers::remove) wait until the key leaves `in_flight`,
//! so once they return no callback for that key is running or will run.
//! They must not be called from inside a release callback for the same key.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use super::store::TaskKey;
use crate::clock::Clock;

#[derive(Debug, Default)]
struct TimerTable {
    /// Installed timers → armed deadline (`None` when idle).
    timers: HashMap<TaskKey, Option<u64>>,
    /// Armed timers ordered by `(deadline, key)`.
    pending: BTreeSet<(u64, TaskKey)>,
    in_flight: HashSet<TaskKey>,
    stopped: bool,
}

impl TimerTable {
    fn disarm(&mut self, key: TaskKey) {
        if let Some(slot) = self.timers.get_mut(&key) {
            if let Some(deadline) = slot.take() {
                self.pending.remove(&(deadline, key));
            }
        }
    }
}

pub struct ReleaseTimers {
    clock: Arc<dyn Clock>,
    table: Mutex<TimerTable>,
    changed: Condvar,
}

impl ReleaseTimers {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            table: Mutex::new(TimerTable::default()),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the (idle) timer for a newly registered task.
    pub fn install(&self, key: TaskKey) {
        self.lock().timers.entry(key).or_insert(None);
    }

    /// Arm the timer to fire once after `delay_ms`.
    ///
    /// Returns `false` when no timer is installed for `key` (the task was
    /// deregistered concurrently).
    pub fn arm(&self, key: TaskKey, delay_ms: u64) -> bool {
        self.set_deadline(key, delay_ms, "armed")
    }

    /// Move an armed or idle timer to `now + delay_ms`.  Any earlier deadline
    /// is dropped, so the timer still fires once.
    pub fn rearm(&self, key: TaskKey, delay_ms: u64) -> bool {
        self.set_deadline(key, delay_ms, "rearmed")
    }

    /// Like [`rearm`](Self::rearm), with an absolute deadline in clock ticks.
    pub fn arm_at(&self, key: TaskKey, deadline: u64) -> bool {
        self.set_deadline_at(key, deadline, "armed at")
    }

    fn set_deadline(&self, key: TaskKey, delay_ms: u64, what: &str) -> bool {
        let deadline = self.clock.now_ms() + delay_ms;
        self.set_deadline_at(key, deadline, what)
    }

    fn set_deadline_at(&self, key: TaskKey, deadline: u64, what: &str) -> bool {
        let mut t = self.lock();
        if !t.timers.contains_key(&key) {
            return false;
        }
        t.disarm(key);
        t.timers.insert(key, Some(deadline));
        t.pending.insert((deadline, key));
        drop(t);

        debug!(key = %key, deadline, "release timer {what}");
        self.changed.notify_all();
        true
    }

    /// Drop a pending expiry without waiting.  Safe to call under the store
    /// lock.
    pub fn disarm(&self, key: TaskKey) {
        self.lock().disarm(key);
        self.changed.notify_all();
    }

    /// Disarm the timer and wait for an in-flight callback to finish.
    pub fn cancel(&self, key: TaskKey) {
        let mut t = self.lock();
        t.disarm(key);
        while t.in_flight.contains(&key) {
            t = self
                .changed
                .wait(t)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(t);
        self.changed.notify_all();
    }

    /// Cancel synchronously and destroy the timer.
    pub fn remove(&self, key: TaskKey) {
        self.cancel(key);
        self.lock().timers.remove(&key);
    }

    /// Cancel and destroy every timer (module teardown).
    pub fn remove_all(&self) {
        let mut t = self.lock();
        t.pending.clear();
        t.timers.clear();
        while !t.in_flight.is_empty() {
            t = self
                .changed
                .wait(t)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn deadline(&self, key: TaskKey) -> Option<u64> {
        self.lock().timers.get(&key).copied().flatten()
    }

    pub fn is_installed(&self, key: TaskKey) -> bool {
        self.lock().timers.contains_key(&key)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.lock().pending.first().map(|(d, _)| *d)
    }

    /// Fire every timer whose deadline is `<= now`, in `(deadline, key)`
    /// order.  Returns how many callbacks ran.
    pub fn fire_due(&self, mut on_release: impl FnMut(TaskKey)) -> usize {
        let mut fired = 0;
        loop {
            let key = {
                let mut t = self.lock();
                let now = self.clock.now_ms();
                let Some(&(deadline, key)) = t.pending.first() else {
                    break;
                };
                if deadline > now {
                    break;
                }
                t.pending.remove(&(deadline, key));
                t.timers.insert(key, None);
                t.in_flight.insert(key);
                key
            };

            on_release(key);
            fired += 1;

            self.lock().in_flight.remove(&key);
            self.changed.notify_all();
        }
        fired
    }

    /// Timer thread body: fire due timers, then sleep until the earliest
    /// deadline or until the table changes.  Returns after [`stop`](Self::stop).
    pub fn run(&self, mut on_release: impl FnMut(TaskKey)) {
        info!("release timer thread started");
        loop {
            self.fire_due(&mut on_release);

            let t = self.lock();
            if t.stopped {
                break;
            }
            let now = self.clock.now_ms();
            let next = t.pending.first().map(|(d, _)| *d);
            match next {
                None => {
                    drop(self.changed.wait(t).unwrap_or_else(PoisonError::into_inner));
                }
                Some(deadline) if deadline > now => {
                    drop(
                        self.changed
                            .wait_timeout(t, Duration::from_millis(deadline - now))
                            .unwrap_or_else(PoisonError::into_inner),
                    );
                }
                Some(_) => {}
            }
        }
        info!("release timer thread stopped");
    }

    pub fn stop(&self) {
        self.lock().stopped = true;
        self.changed.notify_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::os::ProcessHandle;
    use crate::scheduler::store::TaskStore;
    use crate::task::{TaskId, TaskRecord};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn setup(n: u32) -> (Arc<ManualClock>, ReleaseTimers, Vec<TaskKey>) {
        let clock = Arc::new(ManualClock::new(0));
        let timers = ReleaseTimers::new(clock.clone());
        let mut s = TaskStore::with_capacity(n as usize);
        let keys = (0..n)
            .map(|i| {
                s.insert(TaskRecord::new(TaskId(i), ProcessHandle::new(i), 10, 1, 0))
                    .unwrap()
            })
            .collect();
        (clock, timers, keys)
    }

    #[test]
    fn fires_once_at_deadline() {
        let (clock, timers, k) = setup(1);
        timers.install(k[0]);
        assert!(timers.arm(k[0], 50));

        clock.advance(49);
        assert_eq!(timers.fire_due(|_| {}), 0);

        clock.advance(1);
        let mut fired = Vec::new();
        assert_eq!(timers.fire_due(|key| fired.push(key)), 1);
        assert_eq!(fired, vec![k[0]]);

        clock.advance(100);
        assert_eq!(timers.fire_due(|_| {}), 0, "one-shot");
        assert!(timers.is_installed(k[0]));
    }

    #[test]
    fn arm_without_install_is_refused() {
        let (_clock, timers, k) = setup(1);
        assert!(!timers.arm(k[0], 10));
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn rearm_replaces_previous_deadline() {
        let (clock, timers, k) = setup(1);
        timers.install(k[0]);
        timers.arm(k[0], 10);
        timers.rearm(k[0], 30);
        assert_eq!(timers.deadline(k[0]), Some(30));

        clock.advance(10);
        assert_eq!(timers.fire_due(|_| {}), 0);
        clock.advance(20);
        assert_eq!(timers.fire_due(|_| {}), 1);
    }

    #[test]
    fn arm_at_uses_the_absolute_deadline() {
        let (clock, timers, k) = setup(1);
        timers.install(k[0]);
        clock.advance(30);
        assert!(timers.arm_at(k[0], 100));
        assert_eq!(timers.deadline(k[0]), Some(100));

        clock.advance(69);
        assert_eq!(timers.fire_due(|_| {}), 0);
        clock.advance(1);
        assert_eq!(timers.fire_due(|_| {}), 1);
    }

    #[test]
    fn due_timers_fire_in_deadline_order() {
        let (clock, timers, k) = setup(3);
        for (key, delay) in k.iter().zip([30, 10, 20]) {
            timers.install(*key);
            timers.arm(*key, delay);
        }
        clock.advance(100);
        let mut fired = Vec::new();
        timers.fire_due(|key| fired.push(key));
        assert_eq!(fired, vec![k[1], k[2], k[0]]);
    }

    #[test]
    fn disarm_keeps_timer_installed() {
        let (clock, timers, k) = setup(1);
        timers.install(k[0]);
        timers.arm(k[0], 5);
        timers.disarm(k[0]);
        assert_eq!(timers.deadline(k[0]), None);
        clock.advance(10);
        assert_eq!(timers.fire_due(|_| {}), 0);
        assert!(timers.rearm(k[0], 5));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let (clock, timers, k) = setup(1);
        timers.install(k[0]);
        timers.arm(k[0], 5);
        timers.remove(k[0]);
        clock.advance(10);
        assert_eq!(timers.fire_due(|_| {}), 0);
        assert!(!timers.is_installed(k[0]));
        assert!(!timers.rearm(k[0], 5));
    }

    #[test]
    fn remove_waits_for_in_flight_callback() {
        let (clock, timers, k) = setup(1);
        let timers = Arc::new(timers);
        timers.install(k[0]);
        timers.arm(k[0], 1);
        clock.advance(1);

        let callback_done = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let t = {
            let timers = timers.clone();
            let done = callback_done.clone();
            thread::spawn(move || {
                timers.fire_due(|_| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(50));
                    done.store(true, Ordering::SeqCst);
                });
            })
        };

        entered_rx.recv().unwrap();
        timers.remove(k[0]);
        assert!(
            callback_done.load(Ordering::SeqCst),
            "remove returned while the callback was still running"
        );
        t.join().unwrap();
    }

    #[test]
    fn run_loop_fires_and_stops() {
        let (clock, timers, k) = setup(1);
        let timers = Arc::new(timers);
        let (tx, rx) = std::sync::mpsc::channel();

        let handle = {
            let timers = timers.clone();
            thread::spawn(move || timers.run(move |key| tx.send(key).unwrap()))
        };

        timers.install(k[0]);
        timers.arm(k[0], 0);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), k[0]);

        clock.advance(1);
        timers.stop();
        handle.join().unwrap();
    }
}
