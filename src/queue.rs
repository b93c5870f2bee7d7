// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::collections::btree_map;

/// Something stored in a [`Queue`] that occupies buffer space.
pub(crate) trait QueueEntry {
    /// Number of payload bytes this entry accounts for.
    fn payload_size(&self) -> usize;
}

/// A keyed store with at-most-one entry per key and byte accounting.
///
/// Keys are usually sequence numbers ([`crate::types::Tsn`], [`crate::types::Ssn`]) that order
/// with serial number arithmetic. That order is only consistent as long as all keys in the queue
/// fit within half the number space, which the protocol windows guarantee.
///
/// The byte counter is maintained only here; an entry's size must not change behind the queue's
/// back, which is why mutable access goes through [`Queue::update`].
#[derive(Debug)]
pub(crate) struct Queue<K, V> {
    entries: BTreeMap<K, V>,
    num_bytes: usize,
}

impl<K: Ord + Copy, V: QueueEntry> Queue<K, V> {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new(), num_bytes: 0 }
    }

    /// Stores `value` unless `key` is already present, in which case nothing is overwritten and
    /// false is returned.
    pub fn check_and_insert(&mut self, key: K, value: V) -> bool {
        match self.entries.entry(key) {
            btree_map::Entry::Occupied(_) => false,
            btree_map::Entry::Vacant(e) => {
                self.num_bytes += value.payload_size();
                e.insert(value);
                true
            }
        }
    }

    pub fn get_and_extract(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.num_bytes -= value.payload_size();
        Some(value)
    }

    /// Removes and returns the entry with the lowest key.
    pub fn extract_oldest(&mut self) -> Option<(K, V)> {
        let (key, value) = self.entries.pop_first()?;
        self.num_bytes -= value.payload_size();
        Some((key, value))
    }

    /// Removes and returns the entry with the highest key.
    pub fn extract_newest(&mut self) -> Option<(K, V)> {
        let (key, value) = self.entries.pop_last()?;
        self.num_bytes -= value.payload_size();
        Some((key, value))
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Removes and drops the entry, returning whether it existed.
    pub fn delete(&mut self, key: &K) -> bool {
        self.get_and_extract(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Sum of [`QueueEntry::payload_size`] over all entries.
    pub fn num_bytes(&self) -> usize {
        self.num_bytes
    }

    /// Mutates an entry in place, re-accounting its size afterwards.
    pub fn update<R>(&mut self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let value = self.entries.get_mut(key)?;
        let before = value.payload_size();
        let result = f(value);
        self.num_bytes = self.num_bytes - before + value.payload_size();
        Some(result)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_key(&self) -> Option<K> {
        self.entries.keys().next().copied()
    }

    pub fn last_key(&self) -> Option<K> {
        self.entries.keys().next_back().copied()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> + '_ {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = K> + '_ {
        self.entries.keys().copied()
    }

    /// Removes every entry for which `remove` returns true, returning the removed entries in key
    /// order.
    pub fn extract_if(&mut self, mut remove: impl FnMut(&K, &V) -> bool) -> Vec<(K, V)> {
        let keys: Vec<K> =
            self.entries.iter().filter(|(k, v)| remove(k, v)).map(|(k, _)| *k).collect();
        keys.into_iter().filter_map(|k| self.get_and_extract(&k).map(|v| (k, v))).collect()
    }
}

impl<K: Ord + Copy, V: QueueEntry> Default for Queue<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueEntry for Vec<u8> {
    fn payload_size(&self) -> usize {
        self.len()
    }
}
