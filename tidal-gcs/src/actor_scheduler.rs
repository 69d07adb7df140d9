// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Actor placement.
//!
//! Placement runs against the scheduler facade's persistent cluster view:
//! the view is seeded from node registrations (through the node manager's
//! resource mirror), a successful placement deducts the actor's resources,
//! and the deduction is returned only when the actor leaves its node. The
//! available set is therefore mutated exclusively by the scheduler and
//! stays ≤ total across concurrent placements. Handing out a worker on the
//! chosen node is delegated to an injected provider; spawning worker
//! processes is outside the core.

use std::sync::Arc;

use tidal_common::id::NodeID;
use tidal_common::scheduling::ResourceSet;
use tidal_common::status::TidalResult;
use tidal_node::cluster_resource_scheduler::ClusterResourceScheduler;
use tidal_node::scheduling_resources::SchedulingOptions;
use tidal_proto::common::Address;
use tidal_proto::task::TaskSpec;

/// Where an actor ended up.
#[derive(Debug, Clone)]
pub struct ActorPlacement {
    pub node_id: NodeID,
    pub worker_address: Address,
    pub worker_pid: u32,
}

/// Hands out a worker on a chosen node to host an actor.
#[async_trait::async_trait]
pub trait WorkerProvider: Send + Sync {
    async fn acquire_worker(
        &self,
        node_id: &NodeID,
        task_spec: &TaskSpec,
    ) -> TidalResult<ActorPlacement>;
}

/// Places actors onto nodes.
#[async_trait::async_trait]
pub trait ActorScheduler: Send + Sync {
    async fn schedule(&self, task_spec: &TaskSpec) -> TidalResult<ActorPlacement>;

    /// The actor left `node_id` (death, restart, kill); the resources its
    /// placement booked go back to the node.
    fn on_actor_stopped(&self, node_id: &NodeID, task_spec: &TaskSpec) {
        let _ = (node_id, task_spec);
    }
}

fn actor_resources(task_spec: &TaskSpec) -> ResourceSet {
    ResourceSet::from_map(
        task_spec
            .required_resources
            .iter()
            .map(|(k, v)| (k.clone(), *v)),
    )
}

/// Resource-driven placement over the shared cluster scheduler.
pub struct ResourceActorScheduler {
    scheduler: Arc<ClusterResourceScheduler>,
    worker_provider: Arc<dyn WorkerProvider>,
}

impl ResourceActorScheduler {
    /// `scheduler` is the control service's facade: a zero-resource local
    /// node plus the cluster view mirrored from node registrations.
    pub fn new(
        scheduler: Arc<ClusterResourceScheduler>,
        worker_provider: Arc<dyn WorkerProvider>,
    ) -> Self {
        Self {
            scheduler,
            worker_provider,
        }
    }

    fn options() -> SchedulingOptions {
        SchedulingOptions {
            // The control service itself hosts no workers.
            avoid_local_node: true,
            ..SchedulingOptions::hybrid()
        }
    }
}

#[async_trait::async_trait]
impl ActorScheduler for ResourceActorScheduler {
    async fn schedule(&self, task_spec: &TaskSpec) -> TidalResult<ActorPlacement> {
        let request = actor_resources(task_spec);

        // Booking happens at selection; the deduction persists in the
        // cluster view until the actor stops.
        let (node_id, _) = self
            .scheduler
            .schedule_and_allocate(&request, &Self::options())?;

        match self.worker_provider.acquire_worker(&node_id, task_spec).await {
            Ok(placement) => Ok(placement),
            Err(err) => {
                self.scheduler.return_remote_resources(&node_id, &request);
                Err(err)
            }
        }
    }

    fn on_actor_stopped(&self, node_id: &NodeID, task_spec: &TaskSpec) {
        self.scheduler
            .return_remote_resources(node_id, &actor_resources(task_spec));
    }
}
