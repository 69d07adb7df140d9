// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The worker's wire surface and the RPC-backed clients: the worker client
//! (and its per-node pool and per-address factory) plus the control-service
//! client.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use prost::Message;

use tidal_common::id::{NodeID, ObjectID, TaskID};
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::common::Address;
use tidal_proto::gcs::{
    CreateActorReply, CreateActorRequest, CreatePlacementGroupReply,
    CreatePlacementGroupRequest, KillActorReply, KillActorRequest, RemovePlacementGroupReply,
    RemovePlacementGroupRequest, WaitPlacementGroupReadyReply, WaitPlacementGroupReadyRequest,
};
use tidal_proto::task::{
    CancelTaskReply, CancelTaskRequest, PushTaskReply, PushTaskRequest, SubmitTaskReply,
    SubmitTaskRequest, TaskSpec, WaitForRefRemovedReply, WaitForRefRemovedRequest,
};
use tidal_rpc::client::{RetryConfig, RpcClient};
use tidal_rpc::method;
use tidal_rpc::server::ServiceHandler;

use crate::actor_manager::WorkerClientFactory;
use crate::actor_task_submitter::WorkerClient;
use crate::core_worker::{ControlClient, CoreWorker};
use crate::normal_task_submitter::WorkerClientPool;

/// Serves the worker over the framed transport.
pub struct WorkerService {
    worker: Arc<CoreWorker>,
}

impl WorkerService {
    pub fn new(worker: Arc<CoreWorker>) -> Self {
        Self { worker }
    }
}

#[async_trait::async_trait]
impl ServiceHandler for WorkerService {
    async fn handle(&self, method_id: u8, body: Bytes) -> TidalResult<Vec<u8>> {
        match method_id {
            method::PUSH_TASK => {
                let request = PushTaskRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("decode: {e}")))?;
                let reply = self
                    .worker
                    .task_receiver()
                    .handle_push_task(request)
                    .await
                    .map_err(|e| e.into_status())?;
                Ok(reply.encode_to_vec())
            }
            method::CANCEL_TASK => {
                let request = CancelTaskRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("decode: {e}")))?;
                let task_id = TaskID::try_from_binary(&request.task_id);
                self.worker.task_receiver().cancel_task(&task_id);
                Ok(CancelTaskReply { attempted: true }.encode_to_vec())
            }
            method::WAIT_FOR_REF_REMOVED => {
                let request = WaitForRefRemovedRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("decode: {e}")))?;
                let object_id = ObjectID::try_from_binary(&request.object_id);
                // Resolves when the last local copy of the reference drops.
                let rx = self
                    .worker
                    .reference_counter()
                    .wait_for_ref_removed(&object_id);
                let _ = rx.await;
                Ok(WaitForRefRemovedReply {}.encode_to_vec())
            }
            other => Err(TidalError::not_implemented(format!("worker method {other}"))),
        }
    }
}

/// RPC-backed transport to a remote worker.
pub struct RpcWorkerClient {
    client: RpcClient,
}

impl RpcWorkerClient {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl WorkerClient for RpcWorkerClient {
    async fn push_task(&self, request: PushTaskRequest) -> TidalResult<PushTaskReply> {
        self.client.call(method::PUSH_TASK, &request).await
    }
}

/// Builds worker transports straight from advertised addresses.
pub struct RpcWorkerClientFactory {
    retry_config: RetryConfig,
}

impl RpcWorkerClientFactory {
    pub fn new(retry_config: RetryConfig) -> Self {
        Self { retry_config }
    }
}

impl WorkerClientFactory for RpcWorkerClientFactory {
    fn client_for(&self, address: &Address) -> Arc<dyn WorkerClient> {
        let endpoint = format!("{}:{}", address.ip_address, address.port);
        Arc::new(RpcWorkerClient::new(RpcClient::new(
            endpoint,
            self.retry_config.clone(),
        )))
    }
}

/// Per-node worker client pool; endpoints are learned from registration
/// snapshots and node-table notifications.
pub struct RpcWorkerClientPool {
    addresses: RwLock<HashMap<NodeID, String>>,
    clients: RwLock<HashMap<NodeID, Arc<dyn WorkerClient>>>,
    retry_config: RetryConfig,
}

impl RpcWorkerClientPool {
    pub fn new(retry_config: RetryConfig) -> Self {
        Self {
            addresses: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            retry_config,
        }
    }

    /// Learn or refresh a node's worker endpoint.
    pub fn set_node_address(&self, node_id: NodeID, addr: String) {
        self.addresses.write().insert(node_id, addr);
        self.clients.write().remove(&node_id);
    }

    pub fn remove_node(&self, node_id: &NodeID) {
        self.addresses.write().remove(node_id);
        self.clients.write().remove(node_id);
    }
}

impl WorkerClientPool for RpcWorkerClientPool {
    fn client_for_node(&self, node_id: &NodeID) -> TidalResult<Arc<dyn WorkerClient>> {
        if let Some(client) = self.clients.read().get(node_id) {
            return Ok(Arc::clone(client));
        }
        let addr = self
            .addresses
            .read()
            .get(node_id)
            .cloned()
            .ok_or_else(|| {
                TidalError::not_found(format!("no worker endpoint for node {}", node_id.hex()))
            })?;
        let client: Arc<dyn WorkerClient> = Arc::new(RpcWorkerClient::new(RpcClient::new(
            addr,
            self.retry_config.clone(),
        )));
        self.clients.write().insert(*node_id, Arc::clone(&client));
        Ok(client)
    }
}

/// Driver-side submission entry point: hand a task spec to a node daemon
/// and get the assigned task id back. The outcome is read through the
/// task's return objects.
pub async fn submit_task_to_node(
    client: &RpcClient,
    task_spec: TaskSpec,
) -> TidalResult<TaskID> {
    let reply: SubmitTaskReply = client
        .call(
            method::SUBMIT_TASK,
            &SubmitTaskRequest {
                task_spec: Some(task_spec),
            },
        )
        .await?;
    let task_id = TaskID::try_from_binary(&reply.task_id);
    if task_id.is_nil() {
        return Err(TidalError::invalid("node returned a bad task id"));
    }
    Ok(task_id)
}

/// RPC-backed control-service client.
pub struct RpcControlClient {
    client: RpcClient,
}

impl RpcControlClient {
    pub fn new(cluster_address: impl Into<String>, retry_config: RetryConfig) -> Self {
        Self {
            client: RpcClient::new(cluster_address, retry_config),
        }
    }
}

#[async_trait::async_trait]
impl ControlClient for RpcControlClient {
    async fn create_actor(&self, request: CreateActorRequest) -> TidalResult<CreateActorReply> {
        self.client.call(method::CREATE_ACTOR, &request).await
    }

    async fn kill_actor(&self, request: KillActorRequest) -> TidalResult<()> {
        let _: KillActorReply = self.client.call(method::KILL_ACTOR, &request).await?;
        Ok(())
    }

    async fn create_placement_group(
        &self,
        request: CreatePlacementGroupRequest,
    ) -> TidalResult<CreatePlacementGroupReply> {
        self.client
            .call(method::CREATE_PLACEMENT_GROUP, &request)
            .await
    }

    async fn remove_placement_group(
        &self,
        request: RemovePlacementGroupRequest,
    ) -> TidalResult<()> {
        let _: RemovePlacementGroupReply = self
            .client
            .call(method::REMOVE_PLACEMENT_GROUP, &request)
            .await?;
        Ok(())
    }

    async fn wait_placement_group_ready(
        &self,
        request: WaitPlacementGroupReadyRequest,
    ) -> TidalResult<bool> {
        let reply: WaitPlacementGroupReadyReply = self
            .client
            .call(method::WAIT_PLACEMENT_GROUP_READY, &request)
            .await?;
        Ok(reply.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor_manager::WorkerClientFactory;
    use crate::core_worker::ControlClient;
    use crate::normal_task_submitter::{NodeSelector, WorkerClientPool};
    use crate::options::WorkerOptions;
    use tidal_common::id::NodeID;
    use tidal_proto::common::Address;
    use tidal_proto::gcs::{
        CreateActorReply, CreateActorRequest, CreatePlacementGroupReply,
        CreatePlacementGroupRequest, KillActorRequest, RemovePlacementGroupRequest,
        WaitPlacementGroupReadyRequest,
    };
    use tidal_proto::task::TaskSpec;

    struct NullSelector;
    impl NodeSelector for NullSelector {
        fn select_node(&self, _spec: &TaskSpec) -> TidalResult<NodeID> {
            Ok(NodeID::from_random())
        }
    }

    struct NullPool;
    impl WorkerClientPool for NullPool {
        fn client_for_node(&self, _node_id: &NodeID) -> TidalResult<Arc<dyn WorkerClient>> {
            Err(TidalError::not_found("no workers in this test"))
        }
    }

    struct NullFactory;
    impl WorkerClientFactory for NullFactory {
        fn client_for(&self, _address: &Address) -> Arc<dyn WorkerClient> {
            unreachable!("no actor clients in this test")
        }
    }

    struct NullControl;
    #[async_trait::async_trait]
    impl ControlClient for NullControl {
        async fn create_actor(
            &self,
            _request: CreateActorRequest,
        ) -> TidalResult<CreateActorReply> {
            Ok(CreateActorReply::default())
        }
        async fn kill_actor(&self, _request: KillActorRequest) -> TidalResult<()> {
            Ok(())
        }
        async fn create_placement_group(
            &self,
            _request: CreatePlacementGroupRequest,
        ) -> TidalResult<CreatePlacementGroupReply> {
            Ok(CreatePlacementGroupReply::default())
        }
        async fn remove_placement_group(
            &self,
            _request: RemovePlacementGroupRequest,
        ) -> TidalResult<()> {
            Ok(())
        }
        async fn wait_placement_group_ready(
            &self,
            _request: WaitPlacementGroupReadyRequest,
        ) -> TidalResult<bool> {
            Ok(false)
        }
    }

    fn make_worker() -> Arc<CoreWorker> {
        CoreWorker::new(
            WorkerOptions::default(),
            Arc::new(NullSelector),
            Arc::new(NullPool),
            Arc::new(NullFactory),
            Arc::new(NullControl),
        )
    }

    #[tokio::test]
    async fn test_push_task_over_service() {
        let worker = make_worker();
        worker
            .task_receiver()
            .set_executor(Arc::new(|_spec, _args| {
                Ok(vec![crate::memory_store::TidalObject::from_data(
                    bytes::Bytes::from("done"),
                )])
            }));
        let service = WorkerService::new(Arc::clone(&worker));

        let request = PushTaskRequest {
            intended_worker_id: worker.worker_id().binary(),
            task_spec: Some(TaskSpec {
                task_id: TaskID::from_random().binary(),
                num_returns: 1,
                ..Default::default()
            }),
            sequence_number: 0,
            client_processed_up_to: -1,
        };
        let reply_bytes = service
            .handle(method::PUSH_TASK, request.encode_to_vec().into())
            .await
            .unwrap();
        let reply = PushTaskReply::decode(reply_bytes.as_slice()).unwrap();
        assert_eq!(reply.return_objects[0].data, b"done");
    }

    #[tokio::test]
    async fn test_wait_for_ref_removed_over_service() {
        let worker = make_worker();
        let service = WorkerService::new(Arc::clone(&worker));

        let oid = tidal_test_utils::object_id_with_byte(1);
        worker.reference_counter().add_local_reference(oid);

        let request = WaitForRefRemovedRequest {
            object_id: oid.binary(),
            borrower_address: None,
        };
        let service_call = service.handle(method::WAIT_FOR_REF_REMOVED, request.encode_to_vec().into());
        let drop_ref = async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            worker.reference_counter().remove_local_reference(&oid);
            Ok::<Vec<u8>, TidalError>(Vec::new())
        };
        let (reply, _) = tokio::join!(service_call, drop_ref);
        assert!(reply.is_ok());
    }
}
