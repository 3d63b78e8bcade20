/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Run queue: READY tasks ordered by period ascending.
//!
//! Equal periods keep insertion order (the earlier arrival is dispatched
//! first), so dispatch is deterministic.  The queue stores the period next to
//! each key so ordering never needs a store lookup.
//!
//! The queue is always accessed through the scheduler's spin lock, together
//! with the "currently running" slot (see [`DispatchState`]).

use super::store::TaskKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub key: TaskKey,
    pub period_ms: u32,
}

#[derive(Debug, Default)]
pub struct RunQueue {
    entries: Vec<QueueEntry>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered insert after every entry with an equal or shorter period.
    ///
    /// Inserting a key that is already queued is a no-op.
    pub fn insert(&mut self, key: TaskKey, period_ms: u32) {
        if self.contains(key) {
            return;
        }
        let pos = self.entries.partition_point(|e| e.period_ms <= period_ms);
        self.entries.insert(pos, QueueEntry { key, period_ms });
    }

    /// Remove `key` if present.  Returns whether it was queued.
    pub fn remove(&mut self, key: TaskKey) -> bool {
        match self.entries.iter().position(|e| e.key == key) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn peek_highest_priority(&self) -> Option<QueueEntry> {
        self.entries.first().copied()
    }

    pub fn pop_highest_priority(&mut self) -> Option<QueueEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn contains(&self, key: TaskKey) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Non-decreasing by period.
    pub fn is_sorted(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].period_ms <= w[1].period_ms)
    }
}

/// State guarded by the scheduler's short, non-blocking critical section.
#[derive(Debug, Default)]
pub struct DispatchState {
    pub queue: RunQueue,
    /// The task currently in `RUNNING`, if any.
    pub current: Option<TaskKey>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::ProcessHandle;
    use crate::scheduler::store::TaskStore;
    use crate::task::{TaskId, TaskRecord};

    /// Real keys come from the store; mint a few.
    fn keys(n: u32) -> Vec<TaskKey> {
        let mut s = TaskStore::with_capacity(n as usize);
        (0..n)
            .map(|i| {
                s.insert(TaskRecord::new(TaskId(i), ProcessHandle::new(i), 10, 1, 0))
                    .unwrap()
            })
            .collect()
    }

    fn order(q: &RunQueue, ks: &[TaskKey]) -> Vec<usize> {
        q.iter()
            .map(|e| ks.iter().position(|k| *k == e.key).unwrap())
            .collect()
    }

    #[test]
    fn shorter_period_goes_first() {
        let k = keys(3);
        let mut q = RunQueue::new();
        q.insert(k[0], 100);
        q.insert(k[1], 20);
        q.insert(k[2], 50);
        assert_eq!(order(&q, &k), vec![1, 2, 0]);
        assert!(q.is_sorted());
        assert_eq!(q.peek_highest_priority().unwrap().key, k[1]);
    }

    #[test]
    fn equal_periods_keep_fifo_order() {
        let k = keys(4);
        let mut q = RunQueue::new();
        q.insert(k[0], 50);
        q.insert(k[1], 50);
        q.insert(k[2], 10);
        q.insert(k[3], 50);
        assert_eq!(order(&q, &k), vec![2, 0, 1, 3]);
    }

    #[test]
    fn remove_and_pop() {
        let k = keys(3);
        let mut q = RunQueue::new();
        q.insert(k[0], 30);
        q.insert(k[1], 10);
        q.insert(k[2], 20);
        assert!(q.remove(k[2]));
        assert!(!q.remove(k[2]));
        assert_eq!(q.pop_highest_priority().unwrap().key, k[1]);
        assert_eq!(q.pop_highest_priority().unwrap().key, k[0]);
        assert!(q.pop_highest_priority().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn double_insert_is_ignored() {
        let k = keys(1);
        let mut q = RunQueue::new();
        q.insert(k[0], 10);
        q.insert(k[0], 10);
        assert_eq!(q.len(), 1);
    }
}
