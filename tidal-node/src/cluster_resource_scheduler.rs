// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The scheduling facade: local resources + cluster view + policies.

use std::collections::BTreeMap;
use std::sync::Arc;

use tidal_common::id::NodeID;
use tidal_common::scheduling::ResourceSet;
use tidal_common::status::{TidalError, TidalResult};

use crate::cluster_resource_manager::ClusterResourceManager;
use crate::local_resource_manager::LocalResourceManager;
use crate::scheduling_policy::{
    BundleSchedulingPolicy, CompositeSchedulingPolicy, SchedulingPolicy,
};
use crate::scheduling_resources::{
    BundleSchedulingResult, NodeResources, SchedulingOptions, TaskResourceInstances,
};

/// Picks nodes for single requests and gangs, and books resources on the
/// chosen nodes so consecutive decisions see each other.
pub struct ClusterResourceScheduler {
    local_node_id: NodeID,
    local_resource_manager: Arc<LocalResourceManager>,
    cluster_resource_manager: Arc<ClusterResourceManager>,
    scheduling_policy: CompositeSchedulingPolicy,
    bundle_scheduling_policy: BundleSchedulingPolicy,
}

impl ClusterResourceScheduler {
    pub fn new(
        local_node_id: NodeID,
        local_resource_manager: Arc<LocalResourceManager>,
        cluster_resource_manager: Arc<ClusterResourceManager>,
    ) -> Self {
        Self {
            local_node_id,
            local_resource_manager,
            cluster_resource_manager,
            scheduling_policy: CompositeSchedulingPolicy::new(0.5),
            bundle_scheduling_policy: BundleSchedulingPolicy,
        }
    }

    fn full_view(&self) -> BTreeMap<NodeID, NodeResources> {
        let mut view = self.cluster_resource_manager.get_resource_view();
        view.insert(
            self.local_node_id,
            NodeResources {
                total: self.local_resource_manager.get_local_total_resources(),
                available: self.local_resource_manager.get_local_available_resources(),
                labels: self.local_resource_manager.get_labels(),
                is_draining: self.local_resource_manager.is_local_node_draining(),
                draining_deadline_ms: self.local_resource_manager.draining_deadline_ms(),
            },
        );
        view
    }

    /// The best node for one request, or None when nothing fits now.
    pub fn get_best_schedulable_node(
        &self,
        request: &ResourceSet,
        options: &SchedulingOptions,
    ) -> Option<NodeID> {
        self.scheduling_policy
            .schedule(request, options, &self.full_view(), &self.local_node_id)
    }

    /// Pick a node and book the resources in one step. Distinguishes
    /// never-satisfiable requests (`Infeasible`) from transient shortage
    /// (`OutOfResource`).
    pub fn schedule_and_allocate(
        &self,
        request: &ResourceSet,
        options: &SchedulingOptions,
    ) -> TidalResult<(NodeID, Option<TaskResourceInstances>)> {
        match self.get_best_schedulable_node(request, options) {
            Some(node_id) if node_id == self.local_node_id => {
                let allocation = self
                    .local_resource_manager
                    .allocate_local_task_resources(request)
                    .ok_or_else(|| {
                        TidalError::out_of_resource("local resources taken concurrently")
                    })?;
                Ok((node_id, Some(allocation)))
            }
            Some(node_id) => {
                if !self
                    .cluster_resource_manager
                    .subtract_node_available(&node_id, request)
                {
                    return Err(TidalError::out_of_resource(format!(
                        "resources on {} taken concurrently",
                        node_id.hex()
                    )));
                }
                Ok((node_id, None))
            }
            None => {
                if self.is_feasible(request) {
                    Err(TidalError::out_of_resource(
                        "no node currently has the requested resources",
                    ))
                } else {
                    Err(TidalError::infeasible(
                        "no node can ever satisfy the requested resources",
                    ))
                }
            }
        }
    }

    /// Gang placement for a placement group's bundles.
    pub fn schedule_bundles(
        &self,
        requests: &[&ResourceSet],
        options: &SchedulingOptions,
    ) -> BundleSchedulingResult {
        self.bundle_scheduling_policy
            .schedule(requests, options, &self.full_view())
    }

    /// Release resources booked on a remote node.
    pub fn return_remote_resources(&self, node_id: &NodeID, request: &ResourceSet) {
        self.cluster_resource_manager
            .add_node_available(node_id, request);
    }

    /// Release a local allocation.
    pub fn release_local_resources(&self, allocation: &TaskResourceInstances) {
        self.local_resource_manager
            .release_task_resources(allocation);
    }

    /// Whether any node could ever satisfy the request.
    pub fn is_feasible(&self, request: &ResourceSet) -> bool {
        if self.local_resource_manager.is_local_node_feasible(request) {
            return true;
        }
        self.cluster_resource_manager
            .get_all_node_ids()
            .iter()
            .any(|id| self.cluster_resource_manager.has_feasible(id, request))
    }

    pub fn local_node_id(&self) -> &NodeID {
        &self.local_node_id
    }

    pub fn local_resource_manager(&self) -> &Arc<LocalResourceManager> {
        &self.local_resource_manager
    }

    pub fn cluster_resource_manager(&self) -> &Arc<ClusterResourceManager> {
        &self.cluster_resource_manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tidal_common::status::StatusCode;

    fn make_nid(val: u8) -> NodeID {
        let mut data = [0u8; 28];
        data[0] = val;
        NodeID::from_binary(&data)
    }

    fn rs(cpus: f64) -> ResourceSet {
        ResourceSet::from_map([("CPU".to_string(), cpus)])
    }

    fn make_scheduler(local_cpus: f64) -> ClusterResourceScheduler {
        let local = Arc::new(LocalResourceManager::new(
            make_nid(1),
            rs(local_cpus),
            HashMap::new(),
        ));
        let cluster = Arc::new(ClusterResourceManager::new());
        ClusterResourceScheduler::new(make_nid(1), local, cluster)
    }

    #[test]
    fn test_single_node_backlog_drains_as_resources_free() {
        // One node with 4 CPUs. Two 2-CPU tasks fit; a third 1-CPU task is
        // rejected as a transient shortage until one finishes.
        let scheduler = make_scheduler(4.0);
        let options = SchedulingOptions::hybrid();

        let (n1, alloc1) = scheduler.schedule_and_allocate(&rs(2.0), &options).unwrap();
        let (n2, _alloc2) = scheduler.schedule_and_allocate(&rs(2.0), &options).unwrap();
        assert_eq!(n1, make_nid(1));
        assert_eq!(n2, make_nid(1));

        let err = scheduler
            .schedule_and_allocate(&rs(1.0), &options)
            .unwrap_err();
        assert_eq!(err.code, StatusCode::OutOfResource);

        // One task finishes; now the third fits on the same node.
        scheduler.release_local_resources(&alloc1.unwrap());
        let (n3, _) = scheduler.schedule_and_allocate(&rs(1.0), &options).unwrap();
        assert_eq!(n3, make_nid(1));
    }

    #[test]
    fn test_infeasible_is_permanent() {
        let scheduler = make_scheduler(4.0);
        let err = scheduler
            .schedule_and_allocate(&rs(64.0), &SchedulingOptions::hybrid())
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Infeasible);
    }

    #[test]
    fn test_remote_node_booking() {
        let scheduler = make_scheduler(1.0);
        let remote = make_nid(9);
        scheduler
            .cluster_resource_manager()
            .add_or_update_node(remote, NodeResources::new(rs(8.0)));

        let (node, allocation) = scheduler
            .schedule_and_allocate(&rs(6.0), &SchedulingOptions::hybrid())
            .unwrap();
        assert_eq!(node, remote);
        assert!(allocation.is_none());

        // The booking is visible to the next decision.
        let err = scheduler
            .schedule_and_allocate(&rs(6.0), &SchedulingOptions::hybrid())
            .unwrap_err();
        assert_eq!(err.code, StatusCode::OutOfResource);

        scheduler.return_remote_resources(&remote, &rs(6.0));
        assert!(scheduler
            .schedule_and_allocate(&rs(6.0), &SchedulingOptions::hybrid())
            .is_ok());
    }

    #[test]
    fn test_bundle_scheduling_through_facade() {
        let scheduler = make_scheduler(4.0);
        scheduler
            .cluster_resource_manager()
            .add_or_update_node(make_nid(2), NodeResources::new(rs(4.0)));

        let r = rs(1.0);
        let requests: Vec<&ResourceSet> = vec![&r, &r];
        let result = scheduler.schedule_bundles(
            &requests,
            &SchedulingOptions::bundle(tidal_proto::gcs::PlacementStrategy::StrictSpread),
        );
        match result {
            BundleSchedulingResult::Success(nodes) => {
                assert_ne!(nodes[0], nodes[1]);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
