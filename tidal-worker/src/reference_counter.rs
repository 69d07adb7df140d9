// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Object reference counting.
//!
//! Three events move the counts: local handle copies, task submissions that
//! take the id as an argument, and remote borrower reports. An object is
//! freed only when all counts are zero, no borrower remains, and it is not
//! nested inside a live outer object; the owner then signals deletion to
//! every known location. Borrowers answer `WaitForRefRemoved` when their
//! last local copy drops; owner death poisons every reference the dead
//! worker owned.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use tidal_common::id::{NodeID, ObjectID, WorkerID};
use tidal_common::status::StatusCode;
use tidal_proto::common::Address;

#[derive(Default)]
struct Reference {
    local_ref_count: u64,
    submitted_task_ref_count: u64,
    borrowers: HashSet<Vec<u8>>,
    contained_in_outer: HashSet<ObjectID>,
    contains: HashSet<ObjectID>,
    owner_address: Option<Address>,
    owned_by_us: bool,
    spilled: bool,
    object_size: u64,
    locations: BTreeSet<NodeID>,
    /// Waiters resolved when the last local copy drops (`WaitForRefRemoved`).
    ref_removed_waiters: Vec<oneshot::Sender<()>>,
}

impl Reference {
    fn total_ref_count(&self) -> u64 {
        self.local_ref_count + self.submitted_task_ref_count
    }

    fn can_be_freed(&self) -> bool {
        self.total_ref_count() == 0
            && self.borrowers.is_empty()
            && self.contained_in_outer.is_empty()
    }
}

/// The owning worker's reference table.
pub struct ReferenceCounter {
    refs: Mutex<HashMap<ObjectID, Reference>>,
    /// Objects that reached zero and were freed, or whose owner died;
    /// readers get the recorded status instead of blocking forever.
    failures: Mutex<HashMap<ObjectID, StatusCode>>,
}

impl ReferenceCounter {
    pub fn new() -> Self {
        Self {
            refs: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    // ── reference events ────────────────────────────────────────────────

    /// A local handle copy.
    pub fn add_local_reference(&self, object_id: ObjectID) {
        let mut refs = self.refs.lock();
        refs.entry(object_id).or_default().local_ref_count += 1;
    }

    /// A local handle dropped. Returns the ids now free for deletion
    /// (the object itself plus any nested objects it was keeping alive).
    pub fn remove_local_reference(&self, object_id: &ObjectID) -> Vec<ObjectID> {
        let mut refs = self.refs.lock();
        let mut freed = Vec::new();

        if let Some(entry) = refs.get_mut(object_id) {
            entry.local_ref_count = entry.local_ref_count.saturating_sub(1);
            if entry.total_ref_count() == 0 {
                for waiter in entry.ref_removed_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }
        Self::collect_freed(&mut refs, *object_id, &mut freed);
        drop(refs);

        self.record_freed(&freed);
        freed
    }

    /// Submitting a task that takes these ids as arguments.
    pub fn update_submitted_task_references(&self, object_ids: &[ObjectID]) {
        let mut refs = self.refs.lock();
        for oid in object_ids {
            refs.entry(*oid).or_default().submitted_task_ref_count += 1;
        }
    }

    /// The task finished; `borrowed` lists per-object borrower addresses the
    /// reply reported (nested references the callee kept).
    pub fn update_finished_task_references(
        &self,
        object_ids: &[ObjectID],
        borrowed: &[(ObjectID, Address)],
    ) -> Vec<ObjectID> {
        let mut refs = self.refs.lock();
        for (oid, borrower) in borrowed {
            refs.entry(*oid)
                .or_default()
                .borrowers
                .insert(borrower.worker_id.clone());
        }

        let mut freed = Vec::new();
        for oid in object_ids {
            if let Some(entry) = refs.get_mut(oid) {
                entry.submitted_task_ref_count = entry.submitted_task_ref_count.saturating_sub(1);
            }
            Self::collect_freed(&mut refs, *oid, &mut freed);
        }
        drop(refs);

        self.record_freed(&freed);
        freed
    }

    /// A remote worker reported it no longer borrows the object.
    pub fn remove_borrower(&self, object_id: &ObjectID, borrower_worker_id: &[u8]) -> Vec<ObjectID> {
        let mut refs = self.refs.lock();
        if let Some(entry) = refs.get_mut(object_id) {
            entry.borrowers.remove(borrower_worker_id);
        }
        let mut freed = Vec::new();
        Self::collect_freed(&mut refs, *object_id, &mut freed);
        drop(refs);

        self.record_freed(&freed);
        freed
    }

    // ── ownership ───────────────────────────────────────────────────────

    /// Register an object we created. `contained_in` lists outer objects the
    /// value is nested inside of.
    pub fn add_owned_object(
        &self,
        object_id: ObjectID,
        owner_address: Address,
        contained_in: Vec<ObjectID>,
        object_size: u64,
    ) {
        let mut refs = self.refs.lock();
        {
            let entry = refs.entry(object_id).or_default();
            entry.owned_by_us = true;
            entry.owner_address = Some(owner_address);
            entry.object_size = object_size;
            for outer in &contained_in {
                entry.contained_in_outer.insert(*outer);
            }
        }
        for outer in &contained_in {
            if let Some(parent) = refs.get_mut(outer) {
                parent.contains.insert(object_id);
            }
        }
    }

    /// Register an object owned elsewhere that we hold a handle to.
    pub fn add_borrowed_object(&self, object_id: ObjectID, owner_address: Address) {
        let mut refs = self.refs.lock();
        let entry = refs.entry(object_id).or_default();
        entry.owned_by_us = false;
        entry.owner_address = Some(owner_address);
    }

    pub fn owned_by_us(&self, object_id: &ObjectID) -> bool {
        self.refs
            .lock()
            .get(object_id)
            .is_some_and(|r| r.owned_by_us)
    }

    pub fn get_owner(&self, object_id: &ObjectID) -> Option<Address> {
        self.refs
            .lock()
            .get(object_id)
            .and_then(|r| r.owner_address.clone())
    }

    /// Resolves once the local reference count of `object_id` reaches zero;
    /// immediate when it already is. Serves `WaitForRefRemoved`.
    pub fn wait_for_ref_removed(&self, object_id: &ObjectID) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut refs = self.refs.lock();
        match refs.get_mut(object_id) {
            Some(entry) if entry.total_ref_count() > 0 => {
                entry.ref_removed_waiters.push(tx);
            }
            _ => {
                let _ = tx.send(());
            }
        }
        rx
    }

    /// Every reference owned by a worker that died becomes unreadable.
    pub fn on_owner_died(&self, owner_worker_id: &WorkerID) -> Vec<ObjectID> {
        let refs = self.refs.lock();
        let affected: Vec<ObjectID> = refs
            .iter()
            .filter(|(_, r)| {
                !r.owned_by_us
                    && r.owner_address
                        .as_ref()
                        .is_some_and(|addr| addr.worker_id == owner_worker_id.as_bytes())
            })
            .map(|(oid, _)| *oid)
            .collect();
        drop(refs);

        let mut failures = self.failures.lock();
        for oid in &affected {
            failures.insert(*oid, StatusCode::OwnerDied);
        }
        affected
    }

    // ── locations & spill ───────────────────────────────────────────────

    pub fn add_object_location(&self, object_id: &ObjectID, node_id: NodeID) {
        if let Some(entry) = self.refs.lock().get_mut(object_id) {
            entry.locations.insert(node_id);
        }
    }

    pub fn remove_object_location(&self, object_id: &ObjectID, node_id: &NodeID) {
        if let Some(entry) = self.refs.lock().get_mut(object_id) {
            entry.locations.remove(node_id);
        }
    }

    pub fn get_object_locations(&self, object_id: &ObjectID) -> Vec<NodeID> {
        self.refs
            .lock()
            .get(object_id)
            .map(|r| r.locations.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn mark_spilled(&self, object_id: &ObjectID) {
        if let Some(entry) = self.refs.lock().get_mut(object_id) {
            entry.spilled = true;
        }
    }

    pub fn is_spilled(&self, object_id: &ObjectID) -> bool {
        self.refs.lock().get(object_id).is_some_and(|r| r.spilled)
    }

    pub fn object_size(&self, object_id: &ObjectID) -> u64 {
        self.refs
            .lock()
            .get(object_id)
            .map(|r| r.object_size)
            .unwrap_or(0)
    }

    // ── queries ─────────────────────────────────────────────────────────

    pub fn has_reference(&self, object_id: &ObjectID) -> bool {
        self.refs.lock().contains_key(object_id)
    }

    /// The failure recorded for an object (freed, or owner died).
    pub fn get_failure(&self, object_id: &ObjectID) -> Option<StatusCode> {
        self.failures.lock().get(object_id).copied()
    }

    pub fn num_tracked_objects(&self) -> usize {
        self.refs.lock().len()
    }

    // ── internals ───────────────────────────────────────────────────────

    /// Free `object_id` if nothing keeps it alive, cascading into nested
    /// objects it contained.
    fn collect_freed(
        refs: &mut HashMap<ObjectID, Reference>,
        object_id: ObjectID,
        freed: &mut Vec<ObjectID>,
    ) {
        let ready = refs
            .get(&object_id)
            .is_some_and(|entry| entry.can_be_freed());
        if !ready {
            return;
        }
        let entry = refs.remove(&object_id).unwrap();
        freed.push(object_id);

        // The outer object no longer pins its nested values.
        for inner in entry.contains {
            if let Some(inner_entry) = refs.get_mut(&inner) {
                inner_entry.contained_in_outer.remove(&object_id);
            }
            Self::collect_freed(refs, inner, freed);
        }
    }

    fn record_freed(&self, freed: &[ObjectID]) {
        if freed.is_empty() {
            return;
        }
        let mut failures = self.failures.lock();
        for oid in freed {
            failures.entry(*oid).or_insert(StatusCode::ObjectLost);
        }
    }
}

impl Default for ReferenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
