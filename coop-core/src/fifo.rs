//! Bounded FIFO containers.
//!
//! Every in-memory cache in the engine is capped by one of these two
//! containers: a list that drops its oldest element once the capacity is
//! exceeded, and an insertion-ordered map that drops its least-recently
//! inserted key. Capacity is a soft physical limit, not a validation rule;
//! no operation here can fail.
//!
//! Invariant: `len() <= capacity()` holds after every mutating call returns.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::hash::Hash;

// ---------------------------------------------------------------------------
// FifoList
// ---------------------------------------------------------------------------

/// A list with first-in-first-out eviction.
///
/// Pushing beyond `capacity` removes the front (oldest) element before the
/// call returns. Iteration order is insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FifoList<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> FifoList<T> {
    /// Create an empty list with the given capacity.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    /// Append an element, evicting the oldest one if the list is full.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    /// Number of retained elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over retained elements, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: PartialEq> FifoList<T> {
    /// Whether the list currently retains an equal element.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// Remove the first occurrence of an equal element, preserving the
    /// order of the rest. Returns whether anything was removed.
    pub fn remove_item(&mut self, item: &T) -> bool {
        match self.items.iter().position(|i| i == item) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// FifoMap
// ---------------------------------------------------------------------------

/// An insertion-ordered map with first-in-first-out eviction.
///
/// Inserting a new key beyond `capacity` removes the least-recently inserted
/// entry before the call returns. Re-inserting an existing key updates its
/// value in place without changing its insertion rank and without evicting.
#[derive(Debug, Clone)]
pub struct FifoMap<K, V> {
    capacity: usize,
    entries: IndexMap<K, V>,
}

impl<K: Hash + Eq, V> FifoMap<K, V> {
    /// Create an empty map with the given capacity.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    /// Insert a key/value pair, evicting the oldest entry if the key is new
    /// and the map is full. Returns the previous value for the key, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.entries.insert(key, value);
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
        previous
    }

    /// Fetch the value stored for `key`, or insert the default and return
    /// it. The eviction rule of [`FifoMap::insert`] applies on the miss path.
    pub fn get_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V
    where
        K: Clone,
    {
        if !self.entries.contains_key(&key) {
            self.insert(key.clone(), default());
        }
        // The entry was either present or inserted above; with capacity >= 1
        // the just-inserted key is never the eviction victim.
        self.entries
            .get_mut(&key)
            .unwrap_or_else(|| unreachable!("key inserted on the line above"))
    }

    /// Borrow the value stored for `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Mutably borrow the value stored for `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Whether the map currently retains `key`.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove `key`, preserving the insertion order of the rest.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key)
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Iterate over retained keys, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Iterate over retained values, oldest first.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }
}

// FifoMap serializes as an entry sequence rather than a map so that numeric
// keys survive JSON document storage.
impl<K: Serialize + Hash + Eq, V: Serialize> Serialize for FifoMap<K, V> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let entries: Vec<(&K, &V)> = self.entries.iter().collect();
        let mut state = serializer.serialize_struct("FifoMap", 2)?;
        state.serialize_field("capacity", &self.capacity)?;
        state.serialize_field("entries", &entries)?;
        state.end()
    }
}

impl<'de, K: DeserializeOwned + Hash + Eq + Clone, V: DeserializeOwned> Deserialize<'de>
    for FifoMap<K, V>
{
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(bound = "K: DeserializeOwned, V: DeserializeOwned")]
        struct Raw<K, V> {
            capacity: usize,
            entries: Vec<(K, V)>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let mut map = FifoMap::new(raw.capacity);
        for (key, value) in raw.entries {
            map.insert(key, value);
        }
        Ok(map)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_evicts_oldest_beyond_capacity() {
        let mut list = FifoList::new(3);
        for i in 0..5 {
            list.push(i);
        }
        assert_eq!(list.len(), 3);
        let retained: Vec<_> = list.iter().copied().collect();
        assert_eq!(retained, vec![2, 3, 4]);
    }

    #[test]
    fn list_capacity_invariant_after_any_sequence() {
        let mut list = FifoList::new(4);
        for i in 0..100 {
            list.push(i);
            assert!(list.len() <= list.capacity());
        }
    }

    #[test]
    fn list_contains_and_remove_preserve_order() {
        let mut list = FifoList::new(5);
        for i in 0..5 {
            list.push(i);
        }
        assert!(list.contains(&3));
        assert!(list.remove_item(&3));
        assert!(!list.contains(&3));
        assert!(!list.remove_item(&3));
        let retained: Vec<_> = list.iter().copied().collect();
        assert_eq!(retained, vec![0, 1, 2, 4]);
    }

    #[test]
    fn list_zero_capacity_is_treated_as_one() {
        let mut list = FifoList::new(0);
        list.push(1);
        list.push(2);
        assert_eq!(list.len(), 1);
        assert!(list.contains(&2));
    }

    #[test]
    fn map_evicts_least_recently_inserted() {
        let mut map = FifoMap::new(2);
        map.insert("a", 1);
        map.insert("b", 2);
        map.insert("c", 3);
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key(&"a"));
        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn map_reinsert_updates_without_eviction() {
        let mut map = FifoMap::new(2);
        map.insert("a", 1);
        map.insert("b", 2);
        assert_eq!(map.insert("a", 10), Some(1));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&"a"), Some(&10));
        // "a" kept its insertion rank, so the next new key evicts it.
        map.insert("c", 3);
        assert!(!map.contains_key(&"a"));
        assert!(map.contains_key(&"b"));
    }

    #[test]
    fn map_get_or_insert_with_creates_on_miss() {
        let mut map: FifoMap<u64, Vec<u32>> = FifoMap::new(4);
        map.get_or_insert_with(7, Vec::new).push(1);
        map.get_or_insert_with(7, Vec::new).push(2);
        assert_eq!(map.get(&7), Some(&vec![1, 2]));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn map_round_trips_through_json() {
        let mut map = FifoMap::new(3);
        map.insert(10_u64, "ten".to_string());
        map.insert(20_u64, "twenty".to_string());

        let json = serde_json::to_value(&map).expect("serialize");
        let back: FifoMap<u64, String> = serde_json::from_value(json).expect("deserialize");

        assert_eq!(back.capacity(), 3);
        let keys: Vec<_> = back.keys().copied().collect();
        assert_eq!(keys, vec![10, 20]);
        assert_eq!(back.get(&20).map(String::as_str), Some("twenty"));
    }
}
