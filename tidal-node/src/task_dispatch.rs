// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Task dispatch against the cluster resource scheduler.
//!
//! `SchedulerNodeSelector` is the submitter's scheduling seam: selecting a
//! node books the task's resources through the scheduler facade (local
//! instance allocation or a remote deduction), and the submitter's
//! completion hook returns them. The available set is therefore mutated only
//! here, and a task holds its resources for exactly the dispatch window.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use tidal_common::id::{NodeID, TaskID};
use tidal_common::scheduling::ResourceSet;
use tidal_common::status::TidalResult;
use tidal_proto::task::TaskSpec;
use tidal_worker::normal_task_submitter::NodeSelector;

use crate::cluster_resource_scheduler::ClusterResourceScheduler;
use crate::scheduling_resources::{SchedulingOptions, TaskResourceInstances};

struct Booking {
    node_id: NodeID,
    request: ResourceSet,
    /// Present when the task landed on the local node.
    local_allocation: Option<TaskResourceInstances>,
}

/// Books resources per task through the cluster resource scheduler.
pub struct SchedulerNodeSelector {
    scheduler: Arc<ClusterResourceScheduler>,
    bookings: Mutex<HashMap<TaskID, Booking>>,
}

impl SchedulerNodeSelector {
    pub fn new(scheduler: Arc<ClusterResourceScheduler>) -> Self {
        Self {
            scheduler,
            bookings: Mutex::new(HashMap::new()),
        }
    }

    pub fn num_active_bookings(&self) -> usize {
        self.bookings.lock().len()
    }
}

impl NodeSelector for SchedulerNodeSelector {
    fn select_node(&self, spec: &TaskSpec) -> TidalResult<NodeID> {
        let request = ResourceSet::from_map(
            spec.required_resources
                .iter()
                .map(|(k, v)| (k.clone(), *v)),
        );
        let (node_id, local_allocation) = self
            .scheduler
            .schedule_and_allocate(&request, &SchedulingOptions::hybrid())?;

        let task_id = TaskID::try_from_binary(&spec.task_id);
        self.bookings.lock().insert(
            task_id,
            Booking {
                node_id,
                request,
                local_allocation,
            },
        );
        Ok(node_id)
    }

    fn on_task_finished(&self, spec: &TaskSpec, _node_id: &NodeID) {
        let task_id = TaskID::try_from_binary(&spec.task_id);
        let Some(booking) = self.bookings.lock().remove(&task_id) else {
            return;
        };
        match booking.local_allocation {
            Some(allocation) => self.scheduler.release_local_resources(&allocation),
            None => self
                .scheduler
                .return_remote_resources(&booking.node_id, &booking.request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_resource_manager::ClusterResourceManager;
    use crate::local_resource_manager::LocalResourceManager;
    use tidal_common::scheduling::FixedPoint;
    use tidal_common::status::StatusCode;

    fn make_selector(cpus: f64) -> (Arc<ClusterResourceScheduler>, SchedulerNodeSelector) {
        let local = Arc::new(LocalResourceManager::new(
            NodeID::from_random(),
            ResourceSet::from_map([("CPU".to_string(), cpus)]),
            std::collections::HashMap::new(),
        ));
        let scheduler = Arc::new(ClusterResourceScheduler::new(
            *local.node_id(),
            local,
            Arc::new(ClusterResourceManager::new()),
        ));
        let selector = SchedulerNodeSelector::new(Arc::clone(&scheduler));
        (scheduler, selector)
    }

    fn spec_with_cpus(cpus: f64) -> TaskSpec {
        let mut spec = TaskSpec {
            task_id: TaskID::from_random().binary(),
            ..Default::default()
        };
        spec.required_resources.insert("CPU".to_string(), cpus);
        spec
    }

    #[test]
    fn test_booking_holds_and_releases_resources() {
        let (scheduler, selector) = make_selector(4.0);

        let t1 = spec_with_cpus(2.0);
        let t2 = spec_with_cpus(2.0);
        let n1 = selector.select_node(&t1).unwrap();
        selector.select_node(&t2).unwrap();
        assert_eq!(selector.num_active_bookings(), 2);

        // The node is full; a third task is a transient shortage.
        let t3 = spec_with_cpus(1.0);
        let err = selector.select_node(&t3).unwrap_err();
        assert_eq!(err.code, StatusCode::OutOfResource);

        // One finishes; the third now fits.
        selector.on_task_finished(&t1, &n1);
        assert_eq!(selector.num_active_bookings(), 1);
        selector.select_node(&t3).unwrap();

        let avail = scheduler
            .local_resource_manager()
            .get_local_available_resources();
        assert_eq!(avail.get("CPU"), FixedPoint::from_f64(1.0));
    }

    #[test]
    fn test_finish_without_booking_is_noop() {
        let (_scheduler, selector) = make_selector(1.0);
        let spec = spec_with_cpus(1.0);
        selector.on_task_finished(&spec, &NodeID::from_random());
        assert_eq!(selector.num_active_bookings(), 0);
    }
}
