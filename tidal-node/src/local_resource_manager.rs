// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! This node's resources at instance granularity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

use tidal_common::id::NodeID;
use tidal_common::scheduling::{FixedPoint, ResourceSet};

use crate::scheduling_resources::{NodeResourceInstances, TaskResourceInstances};

/// Tracks the local node's total and available resources, instance by
/// instance. Versioned so the resource reporter only syncs changes.
pub struct LocalResourceManager {
    node_id: NodeID,
    local_resources: RwLock<NodeResourceInstances>,
    version: AtomicI64,
    is_draining: RwLock<bool>,
    draining_deadline_ms: RwLock<u64>,
}

impl LocalResourceManager {
    pub fn new(
        node_id: NodeID,
        total_resources: ResourceSet,
        labels: HashMap<String, String>,
    ) -> Self {
        Self {
            node_id,
            local_resources: RwLock::new(NodeResourceInstances::new(total_resources, labels)),
            version: AtomicI64::new(0),
            is_draining: RwLock::new(false),
            draining_deadline_ms: RwLock::new(0),
        }
    }

    /// Allocate resources for local work; None when they do not fit.
    pub fn allocate_local_task_resources(
        &self,
        request: &ResourceSet,
    ) -> Option<TaskResourceInstances> {
        let mut resources = self.local_resources.write();
        let result = resources.available.try_allocate(request);
        if result.is_some() {
            self.bump_version();
        }
        result
    }

    /// Release a previous allocation.
    pub fn release_task_resources(&self, allocation: &TaskResourceInstances) {
        self.local_resources.write().available.free(allocation);
        self.bump_version();
    }

    pub fn get_local_available_resources(&self) -> ResourceSet {
        self.local_resources.read().available.to_resource_set()
    }

    pub fn get_local_total_resources(&self) -> ResourceSet {
        self.local_resources.read().total.to_resource_set()
    }

    pub fn get_labels(&self) -> HashMap<String, String> {
        self.local_resources.read().labels.clone()
    }

    pub fn is_local_node_feasible(&self, request: &ResourceSet) -> bool {
        self.get_local_total_resources().is_superset_of(request)
    }

    pub fn is_local_node_available(&self, request: &ResourceSet) -> bool {
        !*self.is_draining.read() && self.get_local_available_resources().is_superset_of(request)
    }

    pub fn set_local_node_draining(&self, deadline_ms: u64) {
        *self.is_draining.write() = true;
        *self.draining_deadline_ms.write() = deadline_ms;
        self.bump_version();
    }

    pub fn is_local_node_draining(&self) -> bool {
        *self.is_draining.read()
    }

    pub fn draining_deadline_ms(&self) -> u64 {
        *self.draining_deadline_ms.read()
    }

    /// Create or extend a named resource (used by bundle commit to
    /// materialize placement-group resources).
    pub fn add_resource_instances(&self, resource: String, instances: Vec<FixedPoint>) {
        let mut resources = self.local_resources.write();

        let mut new_total = resources
            .total
            .get_instances(&resource)
            .map(|s| s.to_vec())
            .unwrap_or_default();
        let mut new_avail = resources
            .available
            .get_instances(&resource)
            .map(|s| s.to_vec())
            .unwrap_or_default();

        while new_total.len() < instances.len() {
            new_total.push(FixedPoint::ZERO);
            new_avail.push(FixedPoint::ZERO);
        }
        for (i, amount) in instances.iter().enumerate() {
            new_total[i] += *amount;
            new_avail[i] += *amount;
        }

        resources.total.set_instances(resource.clone(), new_total);
        resources.available.set_instances(resource, new_avail);
        self.bump_version();
    }

    /// Withdraw part of a named resource from both total and available
    /// (bundle return). The resource disappears once its total hits zero.
    pub fn subtract_resource_instances(&self, resource: &str, amount: FixedPoint) {
        let mut resources = self.local_resources.write();

        let mut new_total = resources
            .total
            .get_instances(resource)
            .map(|s| s.to_vec())
            .unwrap_or_default();
        let mut new_avail = resources
            .available
            .get_instances(resource)
            .map(|s| s.to_vec())
            .unwrap_or_default();
        if new_total.is_empty() {
            return;
        }

        let mut remaining = amount;
        for slot in new_total.iter_mut() {
            let take = if *slot >= remaining { remaining } else { *slot };
            *slot -= take;
            remaining -= take;
            if remaining.is_zero() {
                break;
            }
        }
        let mut remaining = amount;
        for slot in new_avail.iter_mut() {
            let take = if *slot >= remaining { remaining } else { *slot };
            *slot -= take;
            remaining -= take;
            if remaining.is_zero() {
                break;
            }
        }

        let total_left = new_total
            .iter()
            .copied()
            .fold(FixedPoint::ZERO, |a, b| a + b);
        if total_left.is_zero() {
            resources.total.set_instances(resource.to_string(), vec![]);
            resources
                .available
                .set_instances(resource.to_string(), vec![]);
        } else {
            resources
                .total
                .set_instances(resource.to_string(), new_total);
            resources
                .available
                .set_instances(resource.to_string(), new_avail);
        }
        self.bump_version();
    }

    /// Remove a named resource entirely (bundle return).
    pub fn delete_resource(&self, resource: &str) {
        let mut resources = self.local_resources.write();
        resources.total.set_instances(resource.to_string(), vec![]);
        resources
            .available
            .set_instances(resource.to_string(), vec![]);
        self.bump_version();
    }

    pub fn is_local_node_idle(&self) -> bool {
        let resources = self.local_resources.read();
        let total = resources.total.to_resource_set();
        let avail = resources.available.to_resource_set();
        let idle = total.iter().all(|(name, amount)| avail.get(name) >= amount);
        idle
    }

    pub fn version(&self) -> i64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn node_id(&self) -> &NodeID {
        &self.node_id
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rs(pairs: &[(&str, f64)]) -> ResourceSet {
        ResourceSet::from_map(pairs.iter().map(|(k, v)| (k.to_string(), *v)))
    }

    fn make_manager() -> LocalResourceManager {
        LocalResourceManager::new(
            NodeID::from_random(),
            rs(&[("CPU", 4.0), ("GPU", 2.0), ("memory", 8192.0)]),
            HashMap::new(),
        )
    }

    #[test]
    fn test_allocate_release() {
        let mgr = make_manager();
        let request = rs(&[("CPU", 2.0), ("GPU", 1.0)]);

        let alloc = mgr.allocate_local_task_resources(&request).unwrap();
        let avail = mgr.get_local_available_resources();
        assert_eq!(avail.get("CPU"), FixedPoint::from_f64(2.0));
        assert_eq!(avail.get("GPU"), FixedPoint::from_f64(1.0));
        assert!(!mgr.is_local_node_idle());

        mgr.release_task_resources(&alloc);
        assert!(mgr.is_local_node_idle());
    }

    #[test]
    fn test_allocate_insufficient() {
        let mgr = make_manager();
        assert!(mgr
            .allocate_local_task_resources(&rs(&[("CPU", 5.0)]))
            .is_none());
    }

    #[test]
    fn test_draining() {
        let mgr = make_manager();
        assert!(mgr.is_local_node_available(&rs(&[("CPU", 1.0)])));
        mgr.set_local_node_draining(9000);
        assert!(!mgr.is_local_node_available(&rs(&[("CPU", 1.0)])));
        assert_eq!(mgr.draining_deadline_ms(), 9000);
    }

    #[test]
    fn test_add_and_delete_named_resource() {
        let mgr = make_manager();
        mgr.add_resource_instances("CPU_group_abc".to_string(), vec![FixedPoint::from_f64(2.0)]);
        assert!(mgr.is_local_node_available(&rs(&[("CPU_group_abc", 2.0)])));

        mgr.delete_resource("CPU_group_abc");
        assert!(!mgr.is_local_node_available(&rs(&[("CPU_group_abc", 1.0)])));
    }

    #[test]
    fn test_version_bumps() {
        let mgr = make_manager();
        let v0 = mgr.version();
        let alloc = mgr
            .allocate_local_task_resources(&rs(&[("CPU", 1.0)]))
            .unwrap();
        assert!(mgr.version() > v0);
        let v1 = mgr.version();
        mgr.release_task_resources(&alloc);
        assert!(mgr.version() > v1);
    }
}
