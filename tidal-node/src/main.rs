// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The per-node daemon binary.
//!
//! Startup order: pick the serving port, build the resource managers and the
//! resident worker, bind the endpoint, then register with the control
//! service. The registration reply seeds the cluster resource view and the
//! peer endpoint table, so cluster-wide scheduling decisions see every
//! registered node.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tidal_common::config::TidalConfig;
use tidal_common::id::NodeID;
use tidal_common::scheduling::ResourceSet;
use tidal_node::cluster_resource_manager::ClusterResourceManager;
use tidal_node::cluster_resource_scheduler::ClusterResourceScheduler;
use tidal_node::local_resource_manager::LocalResourceManager;
use tidal_node::placement_group_resource_manager::PlacementGroupResourceManager;
use tidal_node::registration;
use tidal_node::scheduling_resources::NodeResources;
use tidal_node::service::NodeService;
use tidal_node::task_dispatch::SchedulerNodeSelector;
use tidal_rpc::client::{RetryConfig, RpcClient};
use tidal_rpc::server::RpcServer;
use tidal_worker::core_worker::CoreWorker;
use tidal_worker::options::{WorkerOptions, WorkerType};
use tidal_worker::service::{RpcControlClient, RpcWorkerClientFactory, RpcWorkerClientPool};

#[derive(Parser, Debug)]
#[command(name = "tidal-node", about = "Tidal per-node daemon")]
struct Args {
    /// Endpoint of the global control service.
    #[arg(long, default_value = "127.0.0.1:6379")]
    cluster_address: String,

    /// Address this node advertises to peers.
    #[arg(long)]
    node_ip_address: Option<String>,

    /// Port to serve the node manager on (0 picks a free port).
    #[arg(long, default_value_t = 0)]
    node_manager_port: u16,

    /// Number of CPUs to declare for this node.
    #[arg(long, default_value_t = 0.0)]
    num_cpus: f64,

    /// Number of GPUs to declare for this node.
    #[arg(long, default_value_t = 0.0)]
    num_gpus: f64,

    /// Base64-encoded JSON configuration overriding the flags.
    #[arg(long)]
    config: Option<String>,

    /// Directory for log files (stderr when absent).
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log verbosity (0 = info, 1 = debug, 2 = trace).
    #[arg(short, long, default_value_t = 0)]
    verbosity: i32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tidal_util::logging::init_logging("tidal-node", args.log_dir.as_deref(), args.verbosity);

    let mut config = match &args.config {
        Some(b64) => TidalConfig::from_base64_json(b64)?,
        None => TidalConfig::default(),
    };
    config.cluster_address = args.cluster_address.clone();
    config.node_manager_port = args.node_manager_port;
    if let Some(ip) = &args.node_ip_address {
        config.node_ip_address = ip.clone();
    } else {
        config.node_ip_address = tidal_util::network::get_local_ip().to_string();
    }
    if args.num_cpus > 0.0 {
        config.num_cpus = args.num_cpus;
    }
    if args.num_gpus > 0.0 {
        config.num_gpus = args.num_gpus;
    }

    // The serving port must be known before the worker and the registration
    // row are built.
    if config.node_manager_port == 0 {
        let ip: IpAddr = config.node_ip_address.parse()?;
        config.node_manager_port = tidal_util::network::get_free_port(ip);
    }

    let node_id = NodeID::from_random();
    let resource_map = config.node_resource_map();
    let total_resources = ResourceSet::from_map(resource_map.clone());

    tracing::info!(
        node_id = %node_id.hex(),
        cluster_address = %config.cluster_address,
        resources = ?total_resources.to_map(),
        "starting node daemon"
    );

    // Resource accounting: local instances plus the registered peers' view,
    // mutated only through the scheduler facade.
    let local_resource_manager = Arc::new(LocalResourceManager::new(
        node_id,
        total_resources,
        HashMap::new(),
    ));
    let cluster_resource_manager = Arc::new(ClusterResourceManager::new());
    let scheduler = Arc::new(ClusterResourceScheduler::new(
        node_id,
        Arc::clone(&local_resource_manager),
        Arc::clone(&cluster_resource_manager),
    ));
    let pg_resource_manager = Arc::new(PlacementGroupResourceManager::new(Arc::clone(
        &local_resource_manager,
    )));

    // The resident worker hosts stateless tasks and actors placed here; it
    // is served on this node's endpoint.
    let worker_clients = Arc::new(RpcWorkerClientPool::new(RetryConfig::default()));
    let worker = CoreWorker::new(
        WorkerOptions {
            worker_type: WorkerType::Worker,
            node_ip_address: config.node_ip_address.clone(),
            node_manager_port: config.node_manager_port,
            ..Default::default()
        },
        Arc::new(SchedulerNodeSelector::new(Arc::clone(&scheduler))),
        Arc::clone(&worker_clients) as Arc<dyn tidal_worker::normal_task_submitter::WorkerClientPool>,
        Arc::new(RpcWorkerClientFactory::new(RetryConfig::default())),
        Arc::new(RpcControlClient::new(
            config.cluster_address.clone(),
            RetryConfig::default(),
        )),
    );

    let bind = format!("{}:{}", config.node_ip_address, config.node_manager_port);
    let server = RpcServer::bind(
        &bind,
        Arc::new(NodeService::new(pg_resource_manager, Arc::clone(&worker))),
    )
    .await?;
    tracing::info!(addr = %server.local_addr(), "node manager serving");

    // Locally scheduled tasks loop back through this node's own endpoint.
    worker_clients.set_node_address(node_id, bind.clone());

    // Announce to the control service and seed the cluster view from the
    // returned snapshot.
    let gcs_client = RpcClient::new(config.cluster_address.clone(), RetryConfig::default());
    let row = registration::node_table_data(
        &node_id,
        &config.node_ip_address,
        config.node_manager_port,
        &resource_map,
    );
    match registration::register_with_control_service(&gcs_client, row).await {
        Ok((_, peers)) => {
            for peer in &peers {
                let peer_id = NodeID::try_from_binary(&peer.node_id);
                if peer_id.is_nil() || peer_id == node_id {
                    continue;
                }
                let total = ResourceSet::from_map(
                    peer.resources_total.iter().map(|(k, v)| (k.clone(), *v)),
                );
                cluster_resource_manager.add_or_update_node(peer_id, NodeResources::new(total));
                worker_clients.set_node_address(peer_id, registration::peer_endpoint(peer));
            }
            tracing::info!(num_peers = peers.len(), "registered with control service");
        }
        Err(err) => {
            tracing::warn!(error = %err, "registration failed; running standalone");
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
