// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Normal (stateless) task submission.
//!
//! The submitter resolves the task's argument dependencies, asks the
//! cluster scheduler for a destination, and dispatches over RPC. Transient
//! failures and momentary resource shortage retry within the task's budget;
//! permanent failures surface to the caller.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use tidal_common::id::{NodeID, ObjectID, TaskID};
use tidal_common::status::{StatusCode, TidalError, TidalResult};
use tidal_proto::common::Address;
use tidal_proto::task::{PushTaskReply, PushTaskRequest, TaskSpec};
use tidal_util::backoff::ExponentialBackoff;

use crate::actor_task_submitter::WorkerClient;
use crate::dependency_resolver::DependencyResolver;
use crate::reference_counter::ReferenceCounter;

/// Chooses the node a normal task runs on (the cluster scheduler seam).
/// A selector that books resources on selection releases them in
/// [`on_task_finished`](Self::on_task_finished), which the submitter calls
/// exactly once per successful selection, after the dispatch concludes.
pub trait NodeSelector: Send + Sync {
    fn select_node(&self, spec: &TaskSpec) -> TidalResult<NodeID>;

    /// The task dispatched to `node_id` is done (replied or failed); any
    /// resources booked by `select_node` go back.
    fn on_task_finished(&self, spec: &TaskSpec, node_id: &NodeID) {
        let _ = (spec, node_id);
    }
}

/// Hands out worker transports per node.
pub trait WorkerClientPool: Send + Sync {
    fn client_for_node(&self, node_id: &NodeID) -> TidalResult<Arc<dyn WorkerClient>>;
}

/// Submits stateless tasks.
pub struct NormalTaskSubmitter {
    caller_address: Address,
    resolver: Arc<DependencyResolver>,
    reference_counter: Arc<ReferenceCounter>,
    selector: Arc<dyn NodeSelector>,
    clients: Arc<dyn WorkerClientPool>,
    num_in_flight: Mutex<usize>,
}

impl NormalTaskSubmitter {
    pub fn new(
        caller_address: Address,
        resolver: Arc<DependencyResolver>,
        reference_counter: Arc<ReferenceCounter>,
        selector: Arc<dyn NodeSelector>,
        clients: Arc<dyn WorkerClientPool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            caller_address,
            resolver,
            reference_counter,
            selector,
            clients,
            num_in_flight: Mutex::new(0),
        })
    }

    /// Submit a task. The by-reference arguments are pinned for the task's
    /// duration; the receiver resolves with the reply.
    pub fn submit_task(
        self: &Arc<Self>,
        mut spec: TaskSpec,
    ) -> oneshot::Receiver<TidalResult<PushTaskReply>> {
        spec.caller_address = Some(self.caller_address.clone());

        let dependencies: Vec<ObjectID> = spec
            .dependencies()
            .iter()
            .map(|b| ObjectID::try_from_binary(b))
            .collect();
        self.reference_counter
            .update_submitted_task_references(&dependencies);

        let (tx, rx) = oneshot::channel();
        let submitter = Arc::clone(self);
        tokio::spawn(async move {
            *submitter.num_in_flight.lock() += 1;
            let result = submitter.drive(spec, &dependencies).await;
            *submitter.num_in_flight.lock() -= 1;
            submitter
                .reference_counter
                .update_finished_task_references(&dependencies, &[]);
            let _ = tx.send(result);
        });
        rx
    }

    async fn drive(
        &self,
        spec: TaskSpec,
        dependencies: &[ObjectID],
    ) -> TidalResult<PushTaskReply> {
        self.resolver
            .resolve_dependencies(dependencies)
            .await
            .map_err(|e| e.into_status())?;

        let task_id = TaskID::try_from_binary(&spec.task_id);
        let mut retries_left = spec.max_retries.max(0) as u32;
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), 2.0, Duration::from_secs(5));

        loop {
            let attempt = match self.selector.select_node(&spec) {
                Ok(node_id) => {
                    let outcome = self.dispatch_to(&spec, &node_id).await;
                    // The booking is held for the whole dispatch (the reply
                    // arrives after execution), then released.
                    self.selector.on_task_finished(&spec, &node_id);
                    outcome
                }
                Err(err) => Err(err),
            };
            match attempt {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    let retryable = match err.code {
                        // Momentary shortage always retries; the cluster
                        // state will change.
                        StatusCode::OutOfResource => true,
                        // Transport-level failures retry only within the
                        // task's budget, and never for non-idempotent tasks.
                        code if code.is_transient() => {
                            if !spec.is_idempotent || retries_left == 0 {
                                return Err(err);
                            }
                            retries_left -= 1;
                            true
                        }
                        _ => false,
                    };
                    if !retryable {
                        return Err(err);
                    }
                    tracing::debug!(
                        task_id = %task_id.hex(),
                        error = %err,
                        "task dispatch retrying"
                    );
                    tokio::time::sleep(backoff.next_delay_with_jitter()).await;
                }
            }
        }
    }

    async fn dispatch_to(&self, spec: &TaskSpec, node_id: &NodeID) -> TidalResult<PushTaskReply> {
        let client = self.clients.client_for_node(node_id)?;
        let reply = client
            .push_task(PushTaskRequest {
                intended_worker_id: Vec::new(),
                task_spec: Some(spec.clone()),
                sequence_number: 0,
                client_processed_up_to: -1,
            })
            .await?;
        if reply.is_retryable_error {
            return Err(TidalError::rpc_error(reply.task_execution_error));
        }
        Ok(reply)
    }

    pub fn num_in_flight(&self) -> usize {
        *self.num_in_flight.lock()
    }
}
