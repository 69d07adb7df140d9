// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The control service's wire surface and node-daemon clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use prost::Message;

use tidal_common::id::{ActorID, NodeID, PlacementGroupID};
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::gcs::{
    Bundle, CommitBundleResourcesReply, CommitBundleResourcesRequest, CreateActorRequest,
    CreatePlacementGroupReply, CreatePlacementGroupRequest, KillActorReply, KillActorRequest,
    PrepareBundleResourcesReply, PrepareBundleResourcesRequest, RegisterNodeReply,
    RegisterNodeRequest, RemovePlacementGroupReply, RemovePlacementGroupRequest,
    ReturnBundleResourcesReply, ReturnBundleResourcesRequest, WaitPlacementGroupReadyReply,
    WaitPlacementGroupReadyRequest,
};
use tidal_rpc::client::{RetryConfig, RpcClient};
use tidal_rpc::method;
use tidal_rpc::server::ServiceHandler;

use crate::actor_manager::GcsActorManager;
use crate::node_manager::GcsNodeManager;
use crate::placement_group_manager::{BundleResourceClient, GcsPlacementGroupManager};

/// Serves node registration, actor and placement-group management over the
/// framed transport.
pub struct GcsService {
    actor_manager: Arc<GcsActorManager>,
    placement_group_manager: Arc<GcsPlacementGroupManager>,
    node_manager: Arc<GcsNodeManager>,
}

impl GcsService {
    pub fn new(
        actor_manager: Arc<GcsActorManager>,
        placement_group_manager: Arc<GcsPlacementGroupManager>,
        node_manager: Arc<GcsNodeManager>,
    ) -> Self {
        Self {
            actor_manager,
            placement_group_manager,
            node_manager,
        }
    }
}

#[async_trait::async_trait]
impl ServiceHandler for GcsService {
    async fn handle(&self, method_id: u8, body: Bytes) -> TidalResult<Vec<u8>> {
        match method_id {
            method::REGISTER_NODE => {
                let request = RegisterNodeRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("decode: {e}")))?;
                let node = request
                    .node
                    .ok_or_else(|| TidalError::invalid_argument("missing node row"))?;
                let node_id = self
                    .node_manager
                    .register_node(node)
                    .await
                    .map_err(|e| TidalError::invalid_argument(e.to_string()))?;
                Ok(RegisterNodeReply {
                    node_id: node_id.binary(),
                    peers: self.node_manager.get_alive_nodes(),
                }
                .encode_to_vec())
            }
            method::CREATE_ACTOR => {
                let request = CreateActorRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("decode: {e}")))?;
                let task_spec = request
                    .task_spec
                    .ok_or_else(|| TidalError::invalid_argument("missing task spec"))?;
                let rx = self.actor_manager.create_actor(&task_spec).await?;
                let reply = rx
                    .await
                    .map_err(|_| TidalError::disconnected("creation interrupted"))??;
                Ok(reply.encode_to_vec())
            }
            method::KILL_ACTOR => {
                let request = KillActorRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("decode: {e}")))?;
                let actor_id = ActorID::try_from_binary(&request.actor_id);
                if !self.actor_manager.kill_actor(&actor_id, request.no_restart).await {
                    return Err(TidalError::not_found(format!(
                        "actor {} unknown",
                        actor_id.hex()
                    )));
                }
                Ok(KillActorReply {}.encode_to_vec())
            }
            method::CREATE_PLACEMENT_GROUP => {
                let request = CreatePlacementGroupRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("decode: {e}")))?;
                let pg = request
                    .placement_group
                    .ok_or_else(|| TidalError::invalid_argument("missing placement group"))?;
                let pg_id = self
                    .placement_group_manager
                    .create_placement_group(pg)
                    .await?;
                Ok(CreatePlacementGroupReply {
                    placement_group_id: pg_id.binary(),
                }
                .encode_to_vec())
            }
            method::REMOVE_PLACEMENT_GROUP => {
                let request = RemovePlacementGroupRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("decode: {e}")))?;
                let pg_id = PlacementGroupID::try_from_binary(&request.placement_group_id);
                self.placement_group_manager
                    .remove_placement_group(&pg_id)
                    .await?;
                Ok(RemovePlacementGroupReply {}.encode_to_vec())
            }
            method::WAIT_PLACEMENT_GROUP_READY => {
                let request = WaitPlacementGroupReadyRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("decode: {e}")))?;
                let pg_id = PlacementGroupID::try_from_binary(&request.placement_group_id);
                let ready = self
                    .placement_group_manager
                    .wait_placement_group_ready(&pg_id, Duration::from_secs(request.timeout_s))
                    .await;
                Ok(WaitPlacementGroupReadyReply { ready }.encode_to_vec())
            }
            other => Err(TidalError::not_implemented(format!("gcs method {other}"))),
        }
    }
}

/// RPC-backed bundle client: resolves node endpoints from the node table.
pub struct RpcBundleResourceClient {
    node_manager: Arc<GcsNodeManager>,
    clients: RwLock<HashMap<NodeID, RpcClient>>,
    retry_config: RetryConfig,
}

impl RpcBundleResourceClient {
    pub fn new(node_manager: Arc<GcsNodeManager>, retry_config: RetryConfig) -> Self {
        Self {
            node_manager,
            clients: RwLock::new(HashMap::new()),
            retry_config,
        }
    }

    fn client_for(&self, node_id: &NodeID) -> TidalResult<RpcClient> {
        if let Some(client) = self.clients.read().get(node_id) {
            return Ok(client.clone());
        }
        let node = self
            .node_manager
            .get_node(node_id)
            .ok_or_else(|| TidalError::not_found(format!("node {} unknown", node_id.hex())))?;
        let addr = format!("{}:{}", node.node_manager_address, node.node_manager_port);
        let client = RpcClient::new(addr, self.retry_config.clone());
        self.clients.write().insert(*node_id, client.clone());
        Ok(client)
    }
}

#[async_trait::async_trait]
impl BundleResourceClient for RpcBundleResourceClient {
    async fn prepare_bundles(&self, node_id: &NodeID, bundles: Vec<Bundle>) -> TidalResult<bool> {
        let client = self.client_for(node_id)?;
        let reply: PrepareBundleResourcesReply = client
            .call(
                method::PREPARE_BUNDLE_RESOURCES,
                &PrepareBundleResourcesRequest { bundles },
            )
            .await?;
        Ok(reply.success)
    }

    async fn commit_bundles(&self, node_id: &NodeID, bundles: Vec<Bundle>) -> TidalResult<()> {
        let client = self.client_for(node_id)?;
        let _: CommitBundleResourcesReply = client
            .call(
                method::COMMIT_BUNDLE_RESOURCES,
                &CommitBundleResourcesRequest { bundles },
            )
            .await?;
        Ok(())
    }

    async fn return_bundles(&self, node_id: &NodeID, bundles: Vec<Bundle>) -> TidalResult<()> {
        let client = self.client_for(node_id)?;
        let _: ReturnBundleResourcesReply = client
            .call(
                method::RETURN_BUNDLE_RESOURCES,
                &ReturnBundleResourcesRequest { bundles },
            )
            .await?;
        Ok(())
    }
}
