// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
//! An open-addressed hash map keyed by `K: Hash + Eq` instead of the
//! original's injected function-pointer hasher/comparator pair.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const DEFAULT_INITIAL_CAPACITY: usize = 32;

enum Slot<K, V> {
    Empty,
    Occupied(K, V),
    Tombstone,
}

/// Outcome of [`OpenHashMap::put`]: a sum type standing in for the
/// original's overloaded errno-on-`put` distinction between "inserted new"
/// and "replaced existing".
#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome<V> {
    Inserted,
    Replaced(V),
}

pub struct OpenHashMap<K, V> {
    slots: Vec<Slot<K, V>>,
    len: usize,
    tombstones: usize,
}

impl<K: Hash + Eq + Clone, V> Default for OpenHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, V> OpenHashMap<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(4);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Empty);
        OpenHashMap {
            slots,
            len: 0,
            tombstones: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn hash_of(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Probes for `key`'s slot when reading: stops at a matching occupant
    /// or the first truly empty slot, passing over tombstones (a
    /// tombstone does not mean the key is absent — something further
    /// along the probe sequence may still be it).
    fn find_slot(&self, key: &K) -> usize {
        let mask = self.slots.len() - 1;
        let mut idx = (Self::hash_of(key) as usize) & mask;
        loop {
            match &self.slots[idx] {
                Slot::Occupied(k, _) if k == key => return idx,
                Slot::Empty => return idx,
                _ => idx = (idx + 1) & mask,
            }
        }
    }

    /// Probes for `key`'s slot when inserting: like [`Self::find_slot`],
    /// but remembers the first tombstone seen so a fresh key reuses it
    /// instead of always landing past the end of the probe chain. Without
    /// this, tombstones never shrink back to `Empty` and a long-running
    /// map full of tombstones degrades to an infinite probe.
    fn find_slot_for_insert(&self, key: &K) -> usize {
        let mask = self.slots.len() - 1;
        let mut idx = (Self::hash_of(key) as usize) & mask;
        let mut first_tombstone = None;
        loop {
            match &self.slots[idx] {
                Slot::Occupied(k, _) if k == key => return idx,
                Slot::Empty => return first_tombstone.unwrap_or(idx),
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                    idx = (idx + 1) & mask;
                }
                Slot::Occupied(_, _) => idx = (idx + 1) & mask,
            }
        }
    }

    fn maybe_grow(&mut self) {
        if (self.len + self.tombstones) * 4 < self.slots.len() * 3 {
            return;
        }
        let old = std::mem::replace(&mut self.slots, Vec::new());
        let new_capacity = (old.len() * 2).max(DEFAULT_INITIAL_CAPACITY);
        self.slots = Vec::with_capacity(new_capacity);
        self.slots.resize_with(new_capacity, || Slot::Empty);
        self.len = 0;
        self.tombstones = 0;
        for slot in old {
            if let Slot::Occupied(k, v) = slot {
                self.insert_unchecked(k, v);
            }
        }
    }

    fn insert_unchecked(&mut self, key: K, value: V) {
        let idx = self.find_slot(&key);
        self.slots[idx] = Slot::Occupied(key, value);
        self.len += 1;
    }

    pub fn put(&mut self, key: K, value: V) -> PutOutcome<V> {
        self.maybe_grow();
        let idx = self.find_slot_for_insert(&key);
        match std::mem::replace(&mut self.slots[idx], Slot::Empty) {
            Slot::Occupied(k, old) => {
                self.slots[idx] = Slot::Occupied(k, value);
                PutOutcome::Replaced(old)
            }
            Slot::Tombstone => {
                self.slots[idx] = Slot::Occupied(key, value);
                self.len += 1;
                self.tombstones -= 1;
                PutOutcome::Inserted
            }
            Slot::Empty => {
                self.slots[idx] = Slot::Occupied(key, value);
                self.len += 1;
                PutOutcome::Inserted
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = self.find_slot(key);
        match &self.slots[idx] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.find_slot(key);
        match &mut self.slots[idx] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.find_slot(key);
        match std::mem::replace(&mut self.slots[idx], Slot::Tombstone) {
            Slot::Occupied(_, v) => {
                self.len -= 1;
                self.tombstones += 1;
                Some(v)
            }
            other @ Slot::Empty => {
                self.slots[idx] = other;
                None
            }
            Slot::Tombstone => {
                self.slots[idx] = Slot::Tombstone;
                None
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Occupied(k, _) => Some(k),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Occupied(k, v) => Some((k, v)),
            _ => None,
        })
    }

    /// Collects the keys for which `predicate` holds. Intended to be used
    /// with a subsequent loop of [`OpenHashMap::remove`] calls — this two-
    /// pass shape is required because mutating while iterating an open-
    /// addressed table can skip or revisit slots during probing.
    pub fn keys_matching(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> Vec<K> {
        self.iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_reports_inserted_then_replaced() {
        let mut map = OpenHashMap::new();
        assert_eq!(map.put("a", 1), PutOutcome::Inserted);
        assert_eq!(map.put("a", 2), PutOutcome::Replaced(1));
        assert_eq!(map.get(&"a"), Some(&2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_then_reinsert_works_with_tombstones() {
        let mut map = OpenHashMap::new();
        map.put("x", 1);
        map.put("y", 2);
        assert_eq!(map.remove(&"x"), Some(1));
        assert_eq!(map.get(&"x"), None);
        assert_eq!(map.get(&"y"), Some(&2));
        assert_eq!(map.put("x", 3), PutOutcome::Inserted);
        assert_eq!(map.get(&"x"), Some(&3));
    }

    #[test]
    fn grows_under_load() {
        let mut map = OpenHashMap::with_capacity(4);
        for i in 0..100 {
            map.put(i, i * 10);
        }
        assert_eq!(map.len(), 100);
        for i in 0..100 {
            assert_eq!(map.get(&i), Some(&(i * 10)));
        }
    }

    #[test]
    fn repeated_add_remove_churn_does_not_exhaust_capacity() {
        let mut map = OpenHashMap::with_capacity(4);
        for round in 0..500 {
            map.put("churn", round);
            map.remove(&"churn");
        }
        assert_eq!(map.len(), 0);
        assert!(map.capacity() <= 16, "tombstones should trigger regrowth, not unbounded growth");
        map.put("final", 1);
        assert_eq!(map.get(&"final"), Some(&1));
    }

    #[test]
    fn collect_then_delete_pattern_is_safe() {
        let mut map = OpenHashMap::new();
        for i in 0..10 {
            map.put(i, i % 2 == 0);
        }
        let evens = map.keys_matching(|_, v| *v);
        for k in evens {
            map.remove(&k);
        }
        assert_eq!(map.len(), 5);
        assert!(map.iter().all(|(_, v)| !*v));
    }
}
