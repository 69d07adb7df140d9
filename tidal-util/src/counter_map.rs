// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Counter map with automatic removal of zero entries.

use std::collections::HashMap;
use std::hash::Hash;

/// A map from keys to signed counts. Entries whose count returns to zero are
/// removed so the map only holds live keys.
#[derive(Debug, Clone)]
pub struct CounterMap<K: Eq + Hash> {
    counters: HashMap<K, i64>,
    total: i64,
}

impl<K: Eq + Hash> Default for CounterMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> CounterMap<K> {
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
            total: 0,
        }
    }

    /// Increment the count for a key, returning the new count.
    pub fn increment(&mut self, key: K) -> i64 {
        self.total += 1;
        let count = self.counters.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement the count for a key, returning the new count. A key that
    /// reaches zero is removed; decrementing a missing key records -1.
    pub fn decrement(&mut self, key: K) -> i64
    where
        K: Clone,
    {
        self.total -= 1;
        match self.counters.get_mut(&key) {
            Some(count) => {
                *count -= 1;
                let result = *count;
                if result == 0 {
                    self.counters.remove(&key);
                }
                result
            }
            None => {
                self.counters.insert(key, -1);
                -1
            }
        }
    }

    pub fn get(&self, key: &K) -> i64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &i64)> {
        self.counters.iter()
    }
}
