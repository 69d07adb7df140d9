// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Object directory: object id → cluster locations.
//!
//! Tracks which nodes hold a copy of each object plus its spill URL, and
//! notifies subscribers on every change. Fed locally by store add/delete
//! events and remotely by location updates published through the control
//! service.

use std::collections::{BTreeSet, HashMap};

use tidal_common::id::{NodeID, ObjectID};

/// Callback for location changes: (object, nodes holding it, spilled URL).
pub type LocationCallback = Box<dyn Fn(&ObjectID, &LocationInfo) + Send + Sync>;

/// Everything the directory knows about one object.
#[derive(Debug, Clone, Default)]
pub struct LocationInfo {
    /// Nodes holding a sealed copy, in deterministic order.
    pub node_ids: BTreeSet<NodeID>,
    /// Object size in bytes; 0 until learned.
    pub object_size: u64,
    /// URL the object is restorable from, empty if never spilled.
    pub spilled_url: String,
    /// Node that performed the spill.
    pub spilled_node_id: NodeID,
    /// The owner has confirmed the object is gone everywhere.
    pub pending_creation: bool,
}

/// The per-node object directory.
pub struct ObjectDirectory {
    locations: HashMap<ObjectID, LocationInfo>,
    subscriptions: HashMap<ObjectID, Vec<LocationCallback>>,
}

impl ObjectDirectory {
    pub fn new() -> Self {
        Self {
            locations: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    /// Record that `node_id` holds the object.
    pub fn report_object_added(&mut self, object_id: ObjectID, node_id: NodeID, size: u64) {
        let info = self.locations.entry(object_id).or_default();
        let is_new = info.node_ids.insert(node_id);
        if size > 0 {
            info.object_size = size;
        }
        if is_new {
            self.notify(&object_id);
        }
    }

    /// Record that `node_id` no longer holds the object.
    pub fn report_object_removed(&mut self, object_id: &ObjectID, node_id: &NodeID) {
        if let Some(info) = self.locations.get_mut(object_id) {
            if info.node_ids.remove(node_id) {
                self.notify(object_id);
            }
        }
    }

    /// Record a spill URL for the object.
    pub fn report_object_spilled(
        &mut self,
        object_id: ObjectID,
        url: String,
        spill_node_id: NodeID,
    ) {
        let info = self.locations.entry(object_id).or_default();
        info.spilled_url = url;
        info.spilled_node_id = spill_node_id;
        self.notify(&object_id);
    }

    /// Apply a full location snapshot from the control service.
    pub fn apply_location_update(
        &mut self,
        object_id: ObjectID,
        node_ids: impl IntoIterator<Item = NodeID>,
        spilled_url: String,
        size: u64,
    ) {
        let info = self.locations.entry(object_id).or_default();
        info.node_ids = node_ids.into_iter().collect();
        if !spilled_url.is_empty() {
            info.spilled_url = spilled_url;
        }
        if size > 0 {
            info.object_size = size;
        }
        self.notify(&object_id);
    }

    pub fn set_object_size(&mut self, object_id: &ObjectID, size: u64) {
        if let Some(info) = self.locations.get_mut(object_id) {
            info.object_size = size;
        }
    }

    pub fn get_locations(&self, object_id: &ObjectID) -> Option<&LocationInfo> {
        self.locations.get(object_id)
    }

    /// Nodes currently holding the object, in deterministic order.
    pub fn get_node_ids(&self, object_id: &ObjectID) -> Vec<NodeID> {
        self.locations
            .get(object_id)
            .map(|info| info.node_ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Subscribe to location changes for one object.
    pub fn subscribe(&mut self, object_id: ObjectID, callback: LocationCallback) {
        self.subscriptions
            .entry(object_id)
            .or_default()
            .push(callback);
    }

    pub fn unsubscribe(&mut self, object_id: &ObjectID) {
        self.subscriptions.remove(object_id);
    }

    /// Drop every location on a dead node and notify affected subscribers.
    pub fn handle_node_removed(&mut self, node_id: &NodeID) {
        let affected: Vec<ObjectID> = self
            .locations
            .iter_mut()
            .filter_map(|(oid, info)| info.node_ids.remove(node_id).then_some(*oid))
            .collect();
        for oid in &affected {
            self.notify(oid);
        }
    }

    pub fn remove_object(&mut self, object_id: &ObjectID) {
        self.locations.remove(object_id);
        self.subscriptions.remove(object_id);
    }

    pub fn num_objects_tracked(&self) -> usize {
        self.locations.len()
    }

    pub fn num_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    fn notify(&self, object_id: &ObjectID) {
        if let Some(callbacks) = self.subscriptions.get(object_id) {
            let info = self.locations.get(object_id).cloned().unwrap_or_default();
            for cb in callbacks {
                cb(object_id, &info);
            }
        }
    }
}

impl Default for ObjectDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn make_oid(val: u8) -> ObjectID {
        let mut data = [0u8; 28];
        data[0] = val;
        ObjectID::from_binary(&data)
    }

    fn make_nid(val: u8) -> NodeID {
        let mut data = [0u8; 28];
        data[0] = val;
        NodeID::from_binary(&data)
    }

    #[test]
    fn test_add_remove_location() {
        let mut dir = ObjectDirectory::new();
        let oid = make_oid(1);
        let node = make_nid(1);

        dir.report_object_added(oid, node, 128);
        assert_eq!(dir.get_node_ids(&oid), vec![node]);
        assert_eq!(dir.get_locations(&oid).unwrap().object_size, 128);

        dir.report_object_removed(&oid, &node);
        assert!(dir.get_node_ids(&oid).is_empty());
    }

    #[test]
    fn test_duplicate_add_is_idempotent() {
        let mut dir = ObjectDirectory::new();
        let oid = make_oid(1);
        let node = make_nid(1);
        dir.report_object_added(oid, node, 0);
        dir.report_object_added(oid, node, 0);
        assert_eq!(dir.get_node_ids(&oid).len(), 1);
    }

    #[test]
    fn test_spill_url_recorded() {
        let mut dir = ObjectDirectory::new();
        let oid = make_oid(1);
        let spill_node = make_nid(7);
        dir.report_object_spilled(oid, "file:///spill/ab".into(), spill_node);

        let info = dir.get_locations(&oid).unwrap();
        assert_eq!(info.spilled_url, "file:///spill/ab");
        assert_eq!(info.spilled_node_id, spill_node);
    }

    #[test]
    fn test_subscription_fires_on_changes() {
        let mut dir = ObjectDirectory::new();
        let oid = make_oid(1);
        let node = make_nid(1);

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        dir.subscribe(
            oid,
            Box::new(move |_oid, _info| {
                c.fetch_add(1, Ordering::Relaxed);
            }),
        );

        dir.report_object_added(oid, node, 0);
        dir.report_object_removed(&oid, &node);
        assert_eq!(calls.load(Ordering::Relaxed), 2);

        dir.unsubscribe(&oid);
        dir.report_object_added(oid, node, 0);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_node_removed_purges_and_notifies() {
        let mut dir = ObjectDirectory::new();
        let oid1 = make_oid(1);
        let oid2 = make_oid(2);
        let n1 = make_nid(1);
        let n2 = make_nid(2);

        dir.report_object_added(oid1, n1, 0);
        dir.report_object_added(oid1, n2, 0);
        dir.report_object_added(oid2, n1, 0);

        dir.handle_node_removed(&n1);
        assert_eq!(dir.get_node_ids(&oid1), vec![n2]);
        assert!(dir.get_node_ids(&oid2).is_empty());
    }

    #[test]
    fn test_apply_location_update_replaces_nodes() {
        let mut dir = ObjectDirectory::new();
        let oid = make_oid(1);
        dir.report_object_added(oid, make_nid(1), 0);

        dir.apply_location_update(oid, [make_nid(2), make_nid(3)], String::new(), 64);
        let nodes = dir.get_node_ids(&oid);
        assert_eq!(nodes, vec![make_nid(2), make_nid(3)]);
        assert_eq!(dir.get_locations(&oid).unwrap().object_size, 64);
    }

    #[test]
    fn test_node_ids_deterministic_order() {
        let mut dir = ObjectDirectory::new();
        let oid = make_oid(1);
        dir.report_object_added(oid, make_nid(9), 0);
        dir.report_object_added(oid, make_nid(3), 0);
        dir.report_object_added(oid, make_nid(6), 0);
        assert_eq!(
            dir.get_node_ids(&oid),
            vec![make_nid(3), make_nid(6), make_nid(9)]
        );
    }
}
