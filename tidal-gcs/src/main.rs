// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The global control service binary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tidal_common::id::{NodeID, WorkerID};
use tidal_common::scheduling::ResourceSet;
use tidal_common::status::{TidalError, TidalResult};
use tidal_gcs::actor_manager::GcsActorManager;
use tidal_gcs::actor_scheduler::{ActorPlacement, ResourceActorScheduler, WorkerProvider};
use tidal_gcs::node_manager::GcsNodeManager;
use tidal_gcs::placement_group_manager::GcsPlacementGroupManager;
use tidal_gcs::pubsub_handler::PubSubHandler;
use tidal_gcs::service::{GcsService, RpcBundleResourceClient};
use tidal_gcs::store_client::{InMemoryStoreClient, RedisStoreClient, StoreClient};
use tidal_gcs::table_storage::GcsTableStorage;
use tidal_node::cluster_resource_manager::ClusterResourceManager;
use tidal_node::cluster_resource_scheduler::ClusterResourceScheduler;
use tidal_node::local_resource_manager::LocalResourceManager;
use tidal_proto::common::Address;
use tidal_proto::task::TaskSpec;
use tidal_rpc::client::RetryConfig;
use tidal_rpc::server::RpcServer;

#[derive(Parser, Debug)]
#[command(name = "tidal-gcs", about = "Tidal global control service")]
struct Args {
    /// Address to serve on.
    #[arg(long, default_value = "0.0.0.0:6379")]
    listen_address: String,

    /// Redis endpoint for HA persistence (in-memory store when absent).
    #[arg(long)]
    redis_address: Option<String>,

    /// Control-plane credential for the Redis store.
    #[arg(long, default_value = "")]
    redis_password: String,

    /// Directory for log files (stderr when absent).
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log verbosity (0 = info, 1 = debug, 2 = trace).
    #[arg(short, long, default_value_t = 0)]
    verbosity: i32,
}

/// Hands actors to the hosting node's resident worker: the node daemon
/// serves the worker methods on its own endpoint, so the actor's address is
/// the node's endpoint. Spawning additional worker processes lives outside
/// the core.
struct NodeWorkerProvider {
    node_manager: Arc<GcsNodeManager>,
}

#[async_trait::async_trait]
impl WorkerProvider for NodeWorkerProvider {
    async fn acquire_worker(
        &self,
        node_id: &NodeID,
        _task_spec: &TaskSpec,
    ) -> TidalResult<ActorPlacement> {
        let node = self
            .node_manager
            .get_node(node_id)
            .ok_or_else(|| TidalError::not_found(format!("node {} unknown", node_id.hex())))?;
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tidal_util::logging::init_logging("tidal-gcs", args.log_dir.as_deref(), args.verbosity);

    let store_client: Arc<dyn StoreClient> = match &args.redis_address {
        Some(addr) => {
            tracing::info!(redis = %addr, "using Redis persistence");
            Arc::new(RedisStoreClient::new(
                addr,
                &args.redis_password,
                String::new(),
            )?)
        }
        None => Arc::new(InMemoryStoreClient::new()),
    };

    let table_storage = Arc::new(GcsTableStorage::new(store_client));
    let pubsub = Arc::new(PubSubHandler::new());
    let node_manager = Arc::new(GcsNodeManager::new(
        Arc::clone(&table_storage),
        Arc::clone(&pubsub),
    ));

    // The scheduler's persistent cluster view, kept in sync by node
    // registration, death and draining. The control service hosts no
    // workers itself, so its local side of the facade is empty.
    let cluster_resources = Arc::new(ClusterResourceManager::new());
    node_manager.set_resource_mirror(Arc::clone(&cluster_resources));
    node_manager.initialize().await?;
    let cluster_scheduler = Arc::new(ClusterResourceScheduler::new(
        NodeID::nil(),
        Arc::new(LocalResourceManager::new(
            NodeID::nil(),
            ResourceSet::new(),
            HashMap::new(),
        )),
        cluster_resources,
    ));

    let worker_provider = Arc::new(NodeWorkerProvider {
        node_manager: Arc::clone(&node_manager),
    });
    let actor_scheduler = Arc::new(ResourceActorScheduler::new(
        cluster_scheduler,
        worker_provider,
    ));
    let actor_manager = GcsActorManager::new(
        Arc::clone(&table_storage),
        Arc::clone(&pubsub),
        actor_scheduler,
    );
    actor_manager.initialize().await?;

    let bundle_client = Arc::new(RpcBundleResourceClient::new(
        Arc::clone(&node_manager),
        RetryConfig::default(),
    ));
    let placement_group_manager = GcsPlacementGroupManager::new(
        Arc::clone(&table_storage),
        Arc::clone(&pubsub),
        Arc::clone(&node_manager),
        bundle_client,
    );

    let service = Arc::new(GcsService::new(
        actor_manager,
        placement_group_manager,
        node_manager,
    ));
    let server = RpcServer::bind(&args.listen_address, service).await?;
    tracing::info!(addr = %server.local_addr(), "control service serving");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
