// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! LRU eviction policy.

use std::collections::{HashMap, VecDeque};

use tidal_common::id::ObjectID;

#[derive(Debug)]
struct CacheEntry {
    object_id: ObjectID,
    size: i64,
}

/// LRU cache over object ids, tracked by bytes.
///
/// Removal is O(1) via tombstoning: the entry stays in the list but leaves
/// the index map; tombstones are skipped during eviction scans and compacted
/// away once they outnumber live entries.
pub struct LruCache {
    /// Front = least recently used.
    item_list: VecDeque<CacheEntry>,
    item_map: HashMap<ObjectID, usize>,
    capacity: i64,
    used_capacity: i64,
    num_evictions_total: i64,
    bytes_evicted_total: i64,
}

impl LruCache {
    pub fn new(capacity: i64) -> Self {
        Self {
            item_list: VecDeque::new(),
            item_map: HashMap::new(),
            capacity,
            used_capacity: 0,
            num_evictions_total: 0,
            bytes_evicted_total: 0,
        }
    }

    /// Track an object at the most-recently-used position.
    pub fn add(&mut self, key: ObjectID, size: i64) {
        if self.item_map.contains_key(&key) {
            return;
        }
        let index = self.item_list.len();
        self.item_list.push_back(CacheEntry {
            object_id: key,
            size,
        });
        self.item_map.insert(key, index);
        self.used_capacity += size;
    }

    /// Stop tracking an object. Returns its size (0 when unknown).
    pub fn remove(&mut self, key: &ObjectID) -> i64 {
        if let Some(&index) = self.item_map.get(key) {
            let size = self.item_list[index].size;
            self.item_map.remove(key);
            self.used_capacity -= size;
            size
        } else {
            0
        }
    }

    /// Choose victims, oldest first, until `num_bytes_required` are covered.
    /// Returns the bytes the chosen victims free.
    pub fn choose_objects_to_evict(
        &mut self,
        num_bytes_required: i64,
        objects_to_evict: &mut Vec<ObjectID>,
    ) -> i64 {
        let mut bytes_chosen = 0i64;
        let mut chosen = Vec::new();

        for entry in &self.item_list {
            if bytes_chosen >= num_bytes_required {
                break;
            }
            if !self.item_map.contains_key(&entry.object_id) {
                continue;
            }
            objects_to_evict.push(entry.object_id);
            chosen.push((entry.object_id, entry.size));
            bytes_chosen += entry.size;
        }

        for (oid, size) in &chosen {
            self.remove(oid);
            self.num_evictions_total += 1;
            self.bytes_evicted_total += size;
        }

        if self.item_list.len() > self.item_map.len() * 2 {
            self.compact();
        }

        bytes_chosen
    }

    fn compact(&mut self) {
        let live: VecDeque<CacheEntry> = self
            .item_list
            .drain(..)
            .filter(|e| self.item_map.contains_key(&e.object_id))
            .collect();
        self.item_list = live;
        self.item_map.clear();
        for (i, entry) in self.item_list.iter().enumerate() {
            self.item_map.insert(entry.object_id, i);
        }
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> i64 {
        self.capacity - self.used_capacity
    }

    pub fn used_capacity(&self) -> i64 {
        self.used_capacity
    }

    pub fn exists(&self, key: &ObjectID) -> bool {
        self.item_map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.item_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_map.is_empty()
    }

    pub fn num_evictions_total(&self) -> i64 {
        self.num_evictions_total
    }
}

/// Decides which sealed, unpinned objects make room for new ones.
pub struct EvictionPolicy {
    pinned_memory_bytes: i64,
    cache: LruCache,
}

impl EvictionPolicy {
    pub fn new(capacity: i64) -> Self {
        Self {
            pinned_memory_bytes: 0,
            cache: LruCache::new(capacity),
        }
    }

    /// A new object exists and is evictable.
    pub fn object_created(&mut self, object_id: ObjectID, size: i64) {
        self.cache.add(object_id, size);
    }

    /// Request `size` bytes; fills `objects_to_evict` with victims. Returns
    /// the bytes those victims free (0 when no eviction is needed).
    pub fn require_space(&mut self, size: i64, objects_to_evict: &mut Vec<ObjectID>) -> i64 {
        if self.cache.remaining_capacity() >= size {
            return 0;
        }
        let bytes_needed = size - self.cache.remaining_capacity();
        self.cache
            .choose_objects_to_evict(bytes_needed, objects_to_evict)
    }

    /// Pin: the object is being read and must not be evicted.
    pub fn begin_object_access(&mut self, object_id: &ObjectID) {
        let size = self.cache.remove(object_id);
        if size > 0 {
            self.pinned_memory_bytes += size;
        }
    }

    /// Unpin: evictable again.
    pub fn end_object_access(&mut self, object_id: ObjectID, size: i64) {
        self.cache.add(object_id, size);
        self.pinned_memory_bytes = (self.pinned_memory_bytes - size).max(0);
    }

    /// Object deleted outright.
    pub fn remove_object(&mut self, object_id: &ObjectID) {
        self.cache.remove(object_id);
    }

    pub fn pinned_memory_bytes(&self) -> i64 {
        self.pinned_memory_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_oid(val: u8) -> ObjectID {
        let mut data = [0u8; 28];
        data[0] = val;
        ObjectID::from_binary(&data)
    }

    #[test]
    fn test_lru_tracks_bytes() {
        let mut cache = LruCache::new(1000);
        cache.add(make_oid(1), 100);
        cache.add(make_oid(2), 200);
        assert_eq!(cache.used_capacity(), 300);
        assert_eq!(cache.remaining_capacity(), 700);
    }

    #[test]
    fn test_lru_eviction_order_is_oldest_first() {
        let mut cache = LruCache::new(1000);
        let o1 = make_oid(1);
        let o2 = make_oid(2);
        let o3 = make_oid(3);
        cache.add(o1, 100);
        cache.add(o2, 200);
        cache.add(o3, 300);

        let mut evicted = Vec::new();
        let freed = cache.choose_objects_to_evict(250, &mut evicted);
        assert!(freed >= 250);
        assert_eq!(evicted, vec![o1, o2]);
        assert!(cache.exists(&o3));
    }

    #[test]
    fn test_tombstones_are_skipped() {
        let mut cache = LruCache::new(1000);
        let o1 = make_oid(1);
        let o2 = make_oid(2);
        cache.add(o1, 100);
        cache.add(o2, 100);
        cache.remove(&o1);

        let mut evicted = Vec::new();
        cache.choose_objects_to_evict(50, &mut evicted);
        assert_eq!(evicted, vec![o2]);
    }

    #[test]
    fn test_pinned_object_not_evicted() {
        let mut policy = EvictionPolicy::new(1000);
        let o1 = make_oid(1);
        let o2 = make_oid(2);
        policy.object_created(o1, 400);
        policy.object_created(o2, 400);

        policy.begin_object_access(&o1);
        assert_eq!(policy.pinned_memory_bytes(), 400);

        let mut evicted = Vec::new();
        policy.require_space(500, &mut evicted);
        assert!(!evicted.contains(&o1));

        policy.end_object_access(o1, 400);
        assert_eq!(policy.pinned_memory_bytes(), 0);
    }

    #[test]
    fn test_require_space_under_capacity_is_noop() {
        let mut policy = EvictionPolicy::new(1000);
        policy.object_created(make_oid(1), 100);
        let mut evicted = Vec::new();
        assert_eq!(policy.require_space(500, &mut evicted), 0);
        assert!(evicted.is_empty());
    }
}
