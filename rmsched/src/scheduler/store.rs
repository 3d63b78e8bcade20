/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task Record Store: the single owner of every [`TaskRecord`].
//!
//! Records live in a slot arena addressed by [`TaskKey`] (slot index +
//! generation).  Removing a record bumps the slot generation, so any key still
//! held by the run queue, the "currently running" slot or a release timer
//! resolves to `None` afterwards instead of aliasing a newer record.
//!
//! The store itself is plain data; the scheduler wraps it in a `Mutex` and
//! every operation (including `find` and `for_each`) runs under that lock.

use std::collections::HashMap;
use std::fmt;

use super::SchedError;
use crate::task::{TaskId, TaskRecord};

// ── TaskKey ───────────────────────────────────────────────────────────────────

/// Stable, generation-checked reference to a record in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    index: u32,
    generation: u32,
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}#{}", self.index, self.generation)
    }
}

// ── TaskStore ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    record: Option<TaskRecord>,
}

#[derive(Debug)]
pub struct TaskStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_id: HashMap<TaskId, TaskKey>,
    /// Registration order, for status listings.
    order: Vec<TaskKey>,
    capacity: usize,
    /// Running sum of `1000 * C / P` over live records.
    total_permille: u64,
}

impl TaskStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            order: Vec::new(),
            capacity,
            total_permille: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Tracked scaled utilisation of every live record.
    pub fn utilization_permille(&self) -> u64 {
        self.total_permille
    }

    /// Insert a freshly admitted record.
    ///
    /// Fails without side effects on a duplicate id or when no slot can be
    /// allocated.
    pub fn insert(&mut self, record: TaskRecord) -> Result<TaskKey, SchedError> {
        if self.by_id.contains_key(&record.id) {
            return Err(SchedError::DuplicateId(record.id));
        }
        if self.len() >= self.capacity {
            return Err(SchedError::CapacityExhausted {
                capacity: self.capacity,
            });
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                // Allocation failure must not abort; report it as exhaustion.
                self.slots
                    .try_reserve(1)
                    .and_then(|_| self.order.try_reserve(1))
                    .map_err(|_| SchedError::CapacityExhausted {
                        capacity: self.capacity,
                    })?;
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        let key = TaskKey {
            index,
            generation: slot.generation,
        };
        self.total_permille += record.utilization_permille();
        self.by_id.insert(record.id, key);
        self.order.push(key);
        slot.record = Some(record);
        Ok(key)
    }

    /// Remove the record behind `key`, invalidating every copy of the key.
    pub fn remove(&mut self, key: TaskKey) -> Option<TaskRecord> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.by_id.remove(&record.id);
        self.order.retain(|k| *k != key);
        self.total_permille -= record.utilization_permille();
        Some(record)
    }

    pub fn find(&self, id: TaskId) -> Option<TaskKey> {
        self.by_id.get(&id).copied()
    }

    pub fn get(&self, key: TaskKey) -> Option<&TaskRecord> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.record.as_ref()
    }

    pub fn get_mut(&mut self, key: TaskKey) -> Option<&mut TaskRecord> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.record.as_mut()
    }

    /// Visit every live record in registration order.
    pub fn for_each(&self, mut f: impl FnMut(TaskKey, &TaskRecord)) {
        for key in &self.order {
            if let Some(rec) = self.get(*key) {
                f(*key, rec);
            }
        }
    }

    /// Remove every record (module teardown).
    pub fn drain(&mut self) -> Vec<(TaskKey, TaskRecord)> {
        let keys = std::mem::take(&mut self.order);
        keys.into_iter()
            .filter_map(|k| self.remove(k).map(|r| (k, r)))
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::ProcessHandle;

    fn rec(id: u32, period_ms: u32, computation_ms: u32) -> TaskRecord {
        TaskRecord::new(TaskId(id), ProcessHandle::new(id), period_ms, computation_ms, 0)
    }

    #[test]
    fn insert_find_get_roundtrip() {
        let mut s = TaskStore::with_capacity(4);
        let k = s.insert(rec(1, 100, 20)).unwrap();
        assert_eq!(s.find(TaskId(1)), Some(k));
        assert_eq!(s.get(k).unwrap().period_ms, 100);
        assert_eq!(s.utilization_permille(), 200);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected_without_side_effects() {
        let mut s = TaskStore::with_capacity(4);
        s.insert(rec(1, 100, 20)).unwrap();
        assert_eq!(
            s.insert(rec(1, 50, 5)),
            Err(SchedError::DuplicateId(TaskId(1)))
        );
        assert_eq!(s.len(), 1);
        assert_eq!(s.utilization_permille(), 200);
    }

    #[test]
    fn capacity_exhaustion_fails_cleanly() {
        let mut s = TaskStore::with_capacity(1);
        s.insert(rec(1, 100, 10)).unwrap();
        assert_eq!(
            s.insert(rec(2, 100, 10)),
            Err(SchedError::CapacityExhausted { capacity: 1 })
        );
        assert_eq!(s.utilization_permille(), 100);
    }

    #[test]
    fn removed_key_goes_stale_even_when_slot_is_reused() {
        let mut s = TaskStore::with_capacity(4);
        let old = s.insert(rec(1, 100, 10)).unwrap();
        assert!(s.remove(old).is_some());
        assert!(s.get(old).is_none());
        assert!(s.remove(old).is_none(), "double remove is a no-op");

        let new = s.insert(rec(2, 100, 10)).unwrap();
        assert_ne!(old, new);
        assert!(s.get(old).is_none(), "stale key must not alias the new record");
        assert_eq!(s.get(new).unwrap().id, TaskId(2));
    }

    #[test]
    fn tracked_total_matches_sum_over_records() {
        let mut s = TaskStore::with_capacity(8);
        let a = s.insert(rec(1, 3, 1)).unwrap();
        s.insert(rec(2, 7, 2)).unwrap();
        s.insert(rec(3, 100, 1)).unwrap();
        s.remove(a);

        let mut sum = 0;
        s.for_each(|_, r| sum += r.utilization_permille());
        assert_eq!(s.utilization_permille(), sum);
    }

    #[test]
    fn for_each_visits_in_registration_order() {
        let mut s = TaskStore::with_capacity(8);
        for id in [5, 3, 9] {
            s.insert(rec(id, 100, 1)).unwrap();
        }
        let mut seen = Vec::new();
        s.for_each(|_, r| seen.push(r.id.0));
        assert_eq!(seen, vec![5, 3, 9]);
    }

    #[test]
    fn drain_empties_the_store() {
        let mut s = TaskStore::with_capacity(8);
        s.insert(rec(1, 100, 10)).unwrap();
        s.insert(rec(2, 100, 10)).unwrap();
        assert_eq!(s.drain().len(), 2);
        assert!(s.is_empty());
        assert_eq!(s.utilization_permille(), 0);
    }
}
