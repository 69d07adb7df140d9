// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The node daemon's wire surface.
//!
//! One endpoint serves the bundle resource 2PC, task submission
//! (`SubmitTask`), and the resident worker's methods (task dispatch, cancel,
//! reference waits). Actors placed on this node are hosted by the resident
//! worker, so the address the control service hands out for them is this
//! endpoint.

use std::sync::Arc;

use bytes::Bytes;
use prost::Message;

use tidal_common::id::PlacementGroupID;
use tidal_common::scheduling::ResourceSet;
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::gcs::{
    Bundle, CommitBundleResourcesReply, CommitBundleResourcesRequest,
    PrepareBundleResourcesReply, PrepareBundleResourcesRequest, ReturnBundleResourcesReply,
    ReturnBundleResourcesRequest,
};
use tidal_proto::task::{SubmitTaskReply, SubmitTaskRequest};
use tidal_rpc::method;
use tidal_rpc::server::ServiceHandler;
use tidal_worker::core_worker::CoreWorker;
use tidal_worker::service::WorkerService;

use crate::placement_group_resource_manager::PlacementGroupResourceManager;

fn bundle_key(bundle: &Bundle) -> TidalResult<(PlacementGroupID, i64)> {
    let pg_id = PlacementGroupID::try_from_binary(&bundle.placement_group_id);
    if pg_id.is_nil() {
        return Err(TidalError::invalid_argument("bad placement group id"));
    }
    Ok((pg_id, bundle.bundle_index))
}

fn bundle_resources(bundle: &Bundle) -> ResourceSet {
    ResourceSet::from_map(bundle.unit_resources.iter().map(|(k, v)| (k.clone(), *v)))
}

/// Serves the node daemon over the framed transport.
pub struct NodeService {
    pg_resource_manager: Arc<PlacementGroupResourceManager>,
    worker: Arc<CoreWorker>,
    worker_service: WorkerService,
}

impl NodeService {
    pub fn new(
        pg_resource_manager: Arc<PlacementGroupResourceManager>,
        worker: Arc<CoreWorker>,
    ) -> Self {
        Self {
            pg_resource_manager,
            worker_service: WorkerService::new(Arc::clone(&worker)),
            worker,
        }
    }
}

#[async_trait::async_trait]
impl ServiceHandler for NodeService {
    async fn handle(&self, method_id: u8, body: Bytes) -> TidalResult<Vec<u8>> {
        match method_id {
            method::PREPARE_BUNDLE_RESOURCES => {
                let request = PrepareBundleResourcesRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("prepare decode: {e}")))?;
                let mut specs = Vec::with_capacity(request.bundles.len());
                for bundle in &request.bundles {
                    specs.push((bundle_key(bundle)?, bundle_resources(bundle)));
                }
                let success = self.pg_resource_manager.prepare_bundles(&specs).is_ok();
                Ok(PrepareBundleResourcesReply { success }.encode_to_vec())
            }
            method::COMMIT_BUNDLE_RESOURCES => {
                let request = CommitBundleResourcesRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("commit decode: {e}")))?;
                let mut keys = Vec::with_capacity(request.bundles.len());
                for bundle in &request.bundles {
                    keys.push(bundle_key(bundle)?);
                }
                self.pg_resource_manager.commit_bundles(&keys)?;
                Ok(CommitBundleResourcesReply {}.encode_to_vec())
            }
            method::RETURN_BUNDLE_RESOURCES => {
                let request = ReturnBundleResourcesRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("return decode: {e}")))?;
                for bundle in &request.bundles {
                    self.pg_resource_manager.return_bundle(&bundle_key(bundle)?);
                }
                Ok(ReturnBundleResourcesReply {}.encode_to_vec())
            }
            method::SUBMIT_TASK => {
                let request = SubmitTaskRequest::decode(body)
                    .map_err(|e| TidalError::invalid_argument(format!("submit decode: {e}")))?;
                let spec = request
                    .task_spec
                    .ok_or_else(|| TidalError::invalid_argument("missing task spec"))?;
                let task_id = spec.task_id.clone();

                // Submission is acknowledged with the task id; the outcome
                // is read through the return objects.
                let (_return_ids, reply_rx) = self.worker.submit_task(spec);
                tokio::spawn(async move {
                    if let Ok(Err(err)) = reply_rx.await {
                        tracing::debug!(error = %err, "submitted task failed");
                    }
                });
                Ok(SubmitTaskReply { task_id }.encode_to_vec())
            }
            // Everything else belongs to the resident worker.
            other => self.worker_service.handle(other, body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_resource_manager::ClusterResourceManager;
    use crate::cluster_resource_scheduler::ClusterResourceScheduler;
    use crate::local_resource_manager::LocalResourceManager;
    use crate::task_dispatch::SchedulerNodeSelector;
    use std::collections::HashMap;
    use tidal_common::id::NodeID;
    use tidal_rpc::client::RetryConfig;
    use tidal_worker::options::WorkerOptions;
    use tidal_worker::service::{RpcControlClient, RpcWorkerClientFactory, RpcWorkerClientPool};

    fn make_service(cpus: f64) -> (Arc<LocalResourceManager>, NodeService) {
        let node_id = NodeID::from_random();
        let local = Arc::new(LocalResourceManager::new(
            node_id,
            ResourceSet::from_map([("CPU".to_string(), cpus)]),
            HashMap::new(),
        ));
        let scheduler = Arc::new(ClusterResourceScheduler::new(
            node_id,
            Arc::clone(&local),
            Arc::new(ClusterResourceManager::new()),
        ));
        let pg_manager = Arc::new(PlacementGroupResourceManager::new(Arc::clone(&local)));
        let worker = CoreWorker::new(
            WorkerOptions::default(),
            Arc::new(SchedulerNodeSelector::new(scheduler)),
            Arc::new(RpcWorkerClientPool::new(RetryConfig::default())),
            Arc::new(RpcWorkerClientFactory::new(RetryConfig::default())),
            Arc::new(RpcControlClient::new("127.0.0.1:1", RetryConfig::default())),
        );
        (local, NodeService::new(pg_manager, worker))
    }

    fn make_bundle(pg: u8, index: i64, cpus: f64) -> Bundle {
        let mut pg_id = vec![0u8; 16];
        pg_id[0] = pg;
        let mut bundle = Bundle {
            placement_group_id: pg_id,
            bundle_index: index,
            node_id: vec![],
            ..Default::default()
        };
        bundle.unit_resources.insert("CPU".to_string(), cpus);
        bundle
    }

    #[tokio::test]
    async fn test_prepare_commit_return_over_wire_shapes() {
        let (local, service) = make_service(4.0);

        let prepare = PrepareBundleResourcesRequest {
            bundles: vec![make_bundle(1, 0, 2.0)],
        };
        let reply_bytes = service
            .handle(method::PREPARE_BUNDLE_RESOURCES, prepare.encode_to_vec().into())
            .await
            .unwrap();
        let reply = PrepareBundleResourcesReply::decode(reply_bytes.as_slice()).unwrap();
        assert!(reply.success);

        let commit = CommitBundleResourcesRequest {
            bundles: vec![make_bundle(1, 0, 2.0)],
        };
        service
            .handle(method::COMMIT_BUNDLE_RESOURCES, commit.encode_to_vec().into())
            .await
            .unwrap();

        let ret = ReturnBundleResourcesRequest {
            bundles: vec![make_bundle(1, 0, 2.0)],
        };
        service
            .handle(method::RETURN_BUNDLE_RESOURCES, ret.encode_to_vec().into())
            .await
            .unwrap();

        assert_eq!(
            local.get_local_available_resources().get("CPU"),
            tidal_common::scheduling::FixedPoint::from_f64(4.0)
        );
    }

    #[tokio::test]
    async fn test_prepare_failure_reports_unsuccessful() {
        let (_, service) = make_service(1.0);
        let prepare = PrepareBundleResourcesRequest {
            bundles: vec![make_bundle(1, 0, 8.0)],
        };
        let reply_bytes = service
            .handle(method::PREPARE_BUNDLE_RESOURCES, prepare.encode_to_vec().into())
            .await
            .unwrap();
        let reply = PrepareBundleResourcesReply::decode(reply_bytes.as_slice()).unwrap();
        assert!(!reply.success);
    }

    #[tokio::test]
    async fn test_submit_task_runs_on_resident_worker() {
        let (_local, service) = make_service(4.0);
        service
            .worker
            .task_receiver()
            .set_executor(Arc::new(|_spec, _args| {
                Ok(vec![tidal_worker::memory_store::TidalObject::from_data(
                    bytes::Bytes::from("done"),
                )])
            }));

        let mut spec = tidal_proto::task::TaskSpec {
            task_id: tidal_common::id::TaskID::from_random().binary(),
            num_returns: 1,
            is_idempotent: true,
            ..Default::default()
        };
        spec.required_resources.insert("CPU".to_string(), 1.0);
        let task_id = spec.task_id.clone();

        let reply_bytes = service
            .handle(
                method::SUBMIT_TASK,
                SubmitTaskRequest {
                    task_spec: Some(spec),
                }
                .encode_to_vec()
                .into(),
            )
            .await
            .unwrap();
        let reply = SubmitTaskReply::decode(reply_bytes.as_slice()).unwrap();
        assert_eq!(reply.task_id, task_id);
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_implemented() {
        let (_, service) = make_service(1.0);
        let err = service.handle(99, Bytes::new()).await.unwrap_err();
        assert_eq!(
            err.code,
            tidal_common::status::StatusCode::NotImplemented
        );
    }
}
