//! Open-addressing hash table with tombstones, keyed by packed sequence words.
//!
//! Linear probing over a power-of-two capacity. Keys supply two reserved
//! sentinel values (`EMPTY`, `DELETED`); a deleted slot keeps its position in
//! the probe chain so later lookups still walk past it, and `insert` reuses
//! the first tombstone it crossed when the key turns out to be absent.
//!
//! Slot indices are stable across finds and erases but NOT across inserts,
//! which may grow and rehash the table. Callers that address entries by slot
//! (the abundant k-mer storage, the minimizer index bins) must not hold a
//! slot index across an insert.

use ahash::RandomState;
use std::hash::BuildHasher;

/// Key contract for the table: sentinel values plus a deterministic hash.
pub trait SlotKey: Copy + PartialEq {
    const EMPTY: Self;
    const DELETED: Self;
    fn hash_key(&self, state: &RandomState) -> u64;
}

impl SlotKey for crate::kmer::Kmer {
    const EMPTY: Self = crate::kmer::Kmer::EMPTY;
    const DELETED: Self = crate::kmer::Kmer::DELETED;
    #[inline]
    fn hash_key(&self, state: &RandomState) -> u64 {
        state.hash_one(self.bits())
    }
}

impl SlotKey for crate::minimizer::Minimizer {
    const EMPTY: Self = crate::minimizer::Minimizer::EMPTY;
    const DELETED: Self = crate::minimizer::Minimizer::DELETED;
    #[inline]
    fn hash_key(&self, state: &RandomState) -> u64 {
        state.hash_one(self.bits())
    }
}

/// Create a deterministic `RandomState` so probe order is identical across
/// runs.
fn fixed_hash_state() -> RandomState {
    RandomState::with_seeds(
        0x243f6a8885a308d3,
        0x13198a2e03707344,
        0xa4093822299f31d0,
        0x082efa98ec4e6c89,
    )
}

// ---------------------------------------------------------------------------
// SlotTable
// ---------------------------------------------------------------------------

/// Linear-probe open-addressing map from `K` to `V`.
pub struct SlotTable<K: SlotKey, V> {
    hasher: RandomState,
    keys: Vec<K>,
    vals: Vec<Option<V>>,
    pop: usize,
    num_empty: usize,
}

impl<K: SlotKey, V> SlotTable<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// A table ready to hold about `sz` entries without growing.
    pub fn with_capacity(sz: usize) -> Self {
        let cap = (sz + sz / 5).next_power_of_two().max(1024);
        Self {
            hasher: fixed_hash_state(),
            keys: vec![K::EMPTY; cap],
            vals: (0..cap).map(|_| None).collect(),
            pop: 0,
            num_empty: cap,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pop
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pop == 0
    }

    /// Current capacity; slot indices range over `0..capacity()`.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Slot index of `key`, or `None` if absent.
    pub fn find(&self, key: &K) -> Option<usize> {
        let cap = self.keys.len();
        let mut h = (key.hash_key(&self.hasher) as usize) & (cap - 1);
        let end_h = if h == 0 { cap - 1 } else { h - 1 };
        loop {
            if self.keys[h] == K::EMPTY {
                return None;
            }
            if self.keys[h] == *key {
                return Some(h);
            }
            if h == end_h {
                return None;
            }
            h = if h + 1 == cap { 0 } else { h + 1 };
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find(key).and_then(|slot| self.vals[slot].as_ref())
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.find(key).and_then(|slot| self.vals[slot].as_mut())
    }

    /// The entry at `slot`, if occupied.
    pub fn entry_at(&self, slot: usize) -> Option<(&K, &V)> {
        if slot < self.keys.len()
            && self.keys[slot] != K::EMPTY
            && self.keys[slot] != K::DELETED
        {
            Some((&self.keys[slot], self.vals[slot].as_ref().unwrap()))
        } else {
            None
        }
    }

    pub fn value_at_mut(&mut self, slot: usize) -> Option<&mut V> {
        if slot < self.keys.len()
            && self.keys[slot] != K::EMPTY
            && self.keys[slot] != K::DELETED
        {
            self.vals[slot].as_mut()
        } else {
            None
        }
    }

    /// Insert `key -> val`. Returns `(slot, true)` for a new entry; if the
    /// key is already present, the existing value is kept and
    /// `(slot, false)` is returned.
    pub fn insert(&mut self, key: K, val: V) -> (usize, bool) {
        if 5 * self.num_empty < self.keys.len() {
            self.grow(2 * self.keys.len());
        }

        let cap = self.keys.len();
        let mut h = (key.hash_key(&self.hasher) as usize) & (cap - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            if self.keys[h] == K::EMPTY {
                let slot = match first_tombstone {
                    Some(t) => t,
                    None => {
                        self.num_empty -= 1;
                        h
                    }
                };
                self.keys[slot] = key;
                self.vals[slot] = Some(val);
                self.pop += 1;
                return (slot, true);
            } else if self.keys[h] == key {
                return (h, false);
            } else if first_tombstone.is_none() && self.keys[h] == K::DELETED {
                first_tombstone = Some(h);
            }
            h = if h + 1 == cap { 0 } else { h + 1 };
        }
    }

    /// Insert with a value computed only for new entries; returns the slot.
    pub fn insert_with<F: FnOnce() -> V>(&mut self, key: K, make: F) -> usize {
        match self.find(&key) {
            Some(slot) => slot,
            None => self.insert(key, make()).0,
        }
    }

    /// Tombstone the entry at `slot`.
    pub fn erase_slot(&mut self, slot: usize) -> bool {
        if self.entry_at(slot).is_some() {
            self.keys[slot] = K::DELETED;
            self.vals[slot] = None;
            self.pop -= 1;
            true
        } else {
            false
        }
    }

    pub fn erase(&mut self, key: &K) -> bool {
        match self.find(key) {
            Some(slot) => self.erase_slot(slot),
            None => false,
        }
    }

    /// Occupied entries as `(slot, key, value)`, skipping empty and
    /// tombstoned slots.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &K, &V)> {
        self.keys
            .iter()
            .enumerate()
            .filter(|(_, k)| **k != K::EMPTY && **k != K::DELETED)
            .map(|(slot, k)| (slot, k, self.vals[slot].as_ref().unwrap()))
    }

    /// Slot indices of all occupied entries; a stable snapshot for loops
    /// that erase while sweeping.
    pub fn occupied_slots(&self) -> Vec<usize> {
        self.iter().map(|(slot, _, _)| slot).collect()
    }

    fn grow(&mut self, new_cap: usize) {
        let new_cap = new_cap.next_power_of_two();
        let old_keys = std::mem::replace(&mut self.keys, vec![K::EMPTY; new_cap]);
        let old_vals = std::mem::replace(
            &mut self.vals,
            (0..new_cap).map(|_| None).collect(),
        );
        self.pop = 0;
        self.num_empty = new_cap;
        for (k, v) in old_keys.into_iter().zip(old_vals) {
            if k != K::EMPTY && k != K::DELETED {
                self.insert(k, v.unwrap());
            }
        }
    }
}

impl<K: SlotKey, V> Default for SlotTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
