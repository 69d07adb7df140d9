// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The object manager's wire surface: Push / Pull / FreeObjects over the
//! framed transport, plus the peer client pool.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use prost::Message;

use tidal_common::id::NodeID;
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::object_manager::{
    FreeObjectsReply, FreeObjectsRequest, PullReply, PullRequest, PushReply, PushRequest,
};
use tidal_rpc::client::{RetryConfig, RpcClient};
use tidal_rpc::method;
use tidal_rpc::server::ServiceHandler;

use crate::object_manager::{ObjectManager, ObjectManagerClient};

/// Serves the object manager over the framed transport.
pub struct ObjectManagerService {
    manager: Arc<ObjectManager>,
}

impl ObjectManagerService {
    pub fn new(manager: Arc<ObjectManager>) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl ServiceHandler for ObjectManagerService {
    async fn handle(&self, method_id: u8, body: Bytes) -> TidalResult<Vec<u8>> {
        match method_id {
            method::PUSH => {
                let request = PushRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("push decode: {e}")))?;
                self.manager.handle_push(request)?;
                Ok(PushReply {}.encode_to_vec())
            }
            method::PULL => {
                let request = PullRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("pull decode: {e}")))?;
                self.manager.handle_pull(request).await?;
                Ok(PullReply {}.encode_to_vec())
            }
            method::FREE_OBJECTS => {
                let request = FreeObjectsRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("free decode: {e}")))?;
                self.manager.handle_free_objects(request);
                Ok(FreeObjectsReply {}.encode_to_vec())
            }
            other => Err(TidalError::not_implemented(format!(
                "object manager method {other}"
            ))),
        }
    }
}

/// Peer client pool: one retrying RPC client per node, addresses learned
/// from the node table.
pub struct RpcObjectManagerClientPool {
    clients: RwLock<HashMap<NodeID, RpcClient>>,
    addresses: RwLock<HashMap<NodeID, String>>,
    retry_config: RetryConfig,
}

impl RpcObjectManagerClientPool {
    pub fn new(retry_config: RetryConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            addresses: RwLock::new(HashMap::new()),
            retry_config,
        }
    }

    /// Learn or update a peer's endpoint.
    pub fn set_node_address(&self, node_id: NodeID, addr: String) {
        self.addresses.write().insert(node_id, addr);
        // A stale client for the old endpoint must not be reused.
        self.clients.write().remove(&node_id);
    }

    pub fn remove_node(&self, node_id: &NodeID) {
        self.addresses.write().remove(node_id);
        self.clients.write().remove(node_id);
    }

    fn client_for(&self, node_id: &NodeID) -> TidalResult<RpcClient> {
        if let Some(client) = self.clients.read().get(node_id) {
            return Ok(client.clone());
        }
        let addr = self
            .addresses
            .read()
            .get(node_id)
            .cloned()
            .ok_or_else(|| {
                TidalError::not_found(format!("no address known for node {}", node_id.hex()))
            })?;
        let client = RpcClient::new(addr, self.retry_config.clone());
        self.clients.write().insert(*node_id, client.clone());
        Ok(client)
    }
}

#[async_trait::async_trait]
impl ObjectManagerClient for RpcObjectManagerClientPool {
    async fn push(&self, node_id: &NodeID, request: PushRequest) -> TidalResult<()> {
        let client = self.client_for(node_id)?;
        let _: PushReply = client.call(method::PUSH, &request).await?;
        Ok(())
    }

    async fn pull(&self, node_id: &NodeID, request: PullRequest) -> TidalResult<()> {
        let client = self.client_for(node_id)?;
        let _: PullReply = client.call(method::PULL, &request).await?;
        Ok(())
    }

    async fn free_objects(
        &self,
        node_id: &NodeID,
        request: FreeObjectsRequest,
    ) -> TidalResult<()> {
        let client = self.client_for(node_id)?;
        let _: FreeObjectsReply = client.call(method::FREE_OBJECTS, &request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_requires_known_address() {
        let pool = RpcObjectManagerClientPool::new(RetryConfig::default());
        let node = NodeID::from_random();
        assert!(pool.client_for(&node).is_err());

        pool.set_node_address(node, "127.0.0.1:1".to_string());
        assert!(pool.client_for(&node).is_ok());

        pool.remove_node(&node);
        assert!(pool.client_for(&node).is_err());
    }
}
