// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Node registration end to end: a node announces itself over the framed
//! transport, appears in the control service's tables and scheduling view,
//! and actors get placed onto it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tidal_common::id::{ActorID, JobID, NodeID, TaskID, WorkerID};
use tidal_common::scheduling::ResourceSet;
use tidal_common::status::TidalResult;
use tidal_gcs::actor_manager::GcsActorManager;
use tidal_gcs::actor_scheduler::{
    ActorPlacement, ResourceActorScheduler, WorkerProvider,
};
use tidal_gcs::node_manager::GcsNodeManager;
use tidal_gcs::placement_group_manager::{BundleResourceClient, GcsPlacementGroupManager};
use tidal_gcs::pubsub_handler::PubSubHandler;
use tidal_gcs::service::GcsService;
use tidal_gcs::store_client::InMemoryStoreClient;
use tidal_gcs::table_storage::GcsTableStorage;
use tidal_node::cluster_resource_manager::ClusterResourceManager;
use tidal_node::cluster_resource_scheduler::ClusterResourceScheduler;
use tidal_node::local_resource_manager::LocalResourceManager;
use tidal_node::registration;
use tidal_proto::common::Address;
use tidal_proto::gcs::{ActorState, Bundle};
use tidal_proto::task::{ActorCreationTaskSpec, TaskSpec};
use tidal_rpc::client::{RetryConfig, RpcClient};
use tidal_rpc::server::RpcServer;

/// Worker provider stub: the hosting node's endpoint, as in production.
struct EndpointWorkerProvider {
    node_manager: Arc<GcsNodeManager>,
}

#[async_trait::async_trait]
impl WorkerProvider for EndpointWorkerProvider {
    async fn acquire_worker(
        &self,
        node_id: &NodeID,
        _task_spec: &TaskSpec,
    ) -> TidalResult<ActorPlacement> {
        let node = self.node_manager.get_node(node_id).unwrap();
        Ok(ActorPlacement {
            node_id: *node_id,
            worker_address: Address {
                node_id: node_id.binary(),
                ip_address: node.node_manager_address.clone(),
                port: node.node_manager_port as i32,
                worker_id: WorkerID::from_random().binary(),
            },
            worker_pid: 0,
        })
    }
}

/// Bundle client stub; placement groups are not under test here.
struct NullBundleClient;

#[async_trait::async_trait]
impl BundleResourceClient for NullBundleClient {
    async fn prepare_bundles(&self, _node_id: &NodeID, _bundles: Vec<Bundle>) -> TidalResult<bool> {
        Ok(true)
    }
    async fn commit_bundles(&self, _node_id: &NodeID, _bundles: Vec<Bundle>) -> TidalResult<()> {
        Ok(())
    }
    async fn return_bundles(&self, _node_id: &NodeID, _bundles: Vec<Bundle>) -> TidalResult<()> {
        Ok(())
    }
}

struct ControlPlane {
    node_manager: Arc<GcsNodeManager>,
    actor_manager: Arc<GcsActorManager>,
    server: RpcServer,
}

async fn start_control_plane() -> ControlPlane {
    let table_storage = Arc::new(GcsTableStorage::new(Arc::new(InMemoryStoreClient::new())));
    let pubsub = Arc::new(PubSubHandler::new());
    let node_manager = Arc::new(GcsNodeManager::new(
        Arc::clone(&table_storage),
        Arc::clone(&pubsub),
    ));

    let cluster_resources = Arc::new(ClusterResourceManager::new());
    node_manager.set_resource_mirror(Arc::clone(&cluster_resources));
    let cluster_scheduler = Arc::new(ClusterResourceScheduler::new(
        NodeID::nil(),
        Arc::new(LocalResourceManager::new(
            NodeID::nil(),
            ResourceSet::new(),
            HashMap::new(),
        )),
        cluster_resources,
    ));

    let actor_scheduler = Arc::new(ResourceActorScheduler::new(
        cluster_scheduler,
        Arc::new(EndpointWorkerProvider {
            node_manager: Arc::clone(&node_manager),
        }),
    ));
    let actor_manager = GcsActorManager::new(
        Arc::clone(&table_storage),
        Arc::clone(&pubsub),
        actor_scheduler,
    );
    let placement_group_manager = GcsPlacementGroupManager::new(
        table_storage,
        pubsub,
        Arc::clone(&node_manager),
        Arc::new(NullBundleClient),
    );

    let service = Arc::new(GcsService::new(
        Arc::clone(&actor_manager),
        placement_group_manager,
        Arc::clone(&node_manager),
    ));
    let server = RpcServer::bind("127.0.0.1:0", service).await.unwrap();

    ControlPlane {
        node_manager,
        actor_manager,
        server,
    }
}

fn registration_row(node_id: &NodeID, port: u16, cpus: f64) -> tidal_proto::gcs::NodeTableData {
    let mut resources = BTreeMap::new();
    resources.insert("CPU".to_string(), cpus);
    registration::node_table_data(node_id, "127.0.0.1", port, &resources)
}

#[tokio::test]
async fn test_node_registers_over_the_wire() {
    let control_plane = start_control_plane().await;
    let client = RpcClient::new(
        control_plane.server.local_addr().to_string(),
        RetryConfig::default(),
    );

    let node_id = NodeID::from_random();
    let (confirmed, peers) = registration::register_with_control_service(
        &client,
        registration_row(&node_id, 9201, 4.0),
    )
    .await
    .unwrap();

    assert_eq!(confirmed, node_id);
    assert_eq!(peers.len(), 1);
    assert!(control_plane.node_manager.is_alive(&node_id));

    // A second node's registration snapshot includes the first.
    let second = NodeID::from_random();
    let (_, peers) = registration::register_with_control_service(
        &client,
        registration_row(&second, 9202, 2.0),
    )
    .await
    .unwrap();
    assert_eq!(peers.len(), 2);
}

#[tokio::test]
async fn test_registered_node_receives_actor_placement() {
    let control_plane = start_control_plane().await;
    let client = RpcClient::new(
        control_plane.server.local_addr().to_string(),
        RetryConfig::default(),
    );

    let node_id = NodeID::from_random();
    registration::register_with_control_service(&client, registration_row(&node_id, 9203, 4.0))
        .await
        .unwrap();

    let actor_id = ActorID::of(&JobID::from_int(1), &TaskID::nil(), 0);
    let mut spec = TaskSpec {
        task_id: TaskID::for_actor_creation_task(&actor_id).binary(),
        actor_creation_task_spec: Some(ActorCreationTaskSpec {
            actor_id: actor_id.binary(),
            ..Default::default()
        }),
        ..Default::default()
    };
    spec.required_resources.insert("CPU".to_string(), 2.0);

    let rx = control_plane
        .actor_manager
        .create_actor(&spec)
        .await
        .unwrap();
    let reply = rx.await.unwrap().unwrap();

    // The actor landed on the registered node, addressed at its endpoint.
    let address = reply.actor_address.unwrap();
    assert_eq!(address.node_id, node_id.binary());
    assert_eq!(address.port, 9203);

    let row = control_plane.actor_manager.get_actor(&actor_id).unwrap();
    assert_eq!(row.state, ActorState::Alive as i32);
    assert_eq!(row.node_id, node_id.binary());
}

#[tokio::test]
async fn test_unregistered_cluster_has_no_capacity() {
    let control_plane = start_control_plane().await;

    let actor_id = ActorID::of(&JobID::from_int(2), &TaskID::nil(), 0);
    let mut spec = TaskSpec {
        task_id: TaskID::for_actor_creation_task(&actor_id).binary(),
        actor_creation_task_spec: Some(ActorCreationTaskSpec {
            actor_id: actor_id.binary(),
            ..Default::default()
        }),
        ..Default::default()
    };
    spec.required_resources.insert("CPU".to_string(), 1.0);

    let rx = control_plane
        .actor_manager
        .create_actor(&spec)
        .await
        .unwrap();
    assert!(rx.await.unwrap().is_err());
}
