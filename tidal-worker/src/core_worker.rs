// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The worker facade.
//!
//! Ties the submission, execution, storage and reference-counting pieces
//! together behind the operations a driver or actor uses: Put / Get / Wait /
//! Free, task and actor submission, actor creation and kill.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use tidal_common::id::{ActorID, ObjectID, TaskID, WorkerID};
use tidal_common::status::{StatusCode, TidalError, TidalResult};
use tidal_proto::common::Address;
use tidal_proto::gcs::{
    CreateActorReply, CreateActorRequest, CreatePlacementGroupReply, CreatePlacementGroupRequest,
    KillActorRequest, RemovePlacementGroupRequest, WaitPlacementGroupReadyRequest,
};
use tidal_proto::task::{PushTaskReply, TaskSpec};

use crate::actor_handle::ActorHandle;
use crate::actor_manager::{ActorHandleManager, WorkerClientFactory};
use crate::actor_task_submitter::ActorTaskSubmitter;
use crate::context::WorkerContext;
use crate::dependency_resolver::DependencyResolver;
use crate::error::WorkerResult;
use crate::memory_store::{MemoryStore, TidalObject};
use crate::normal_task_submitter::{NodeSelector, NormalTaskSubmitter, WorkerClientPool};
use crate::options::WorkerOptions;
use crate::reference_counter::ReferenceCounter;
use crate::task_receiver::TaskReceiver;

/// The control-service surface a worker talks to.
#[async_trait::async_trait]
pub trait ControlClient: Send + Sync {
    async fn create_actor(&self, request: CreateActorRequest) -> TidalResult<CreateActorReply>;
    async fn kill_actor(&self, request: KillActorRequest) -> TidalResult<()>;
    async fn create_placement_group(
        &self,
        request: CreatePlacementGroupRequest,
    ) -> TidalResult<CreatePlacementGroupReply>;
    async fn remove_placement_group(
        &self,
        request: RemovePlacementGroupRequest,
    ) -> TidalResult<()>;
    async fn wait_placement_group_ready(
        &self,
        request: WaitPlacementGroupReadyRequest,
    ) -> TidalResult<bool>;
}

/// One worker process's engine.
pub struct CoreWorker {
    options: WorkerOptions,
    context: WorkerContext,
    address: Address,
    memory_store: Arc<MemoryStore>,
    reference_counter: Arc<ReferenceCounter>,
    resolver: Arc<DependencyResolver>,
    task_receiver: Arc<TaskReceiver>,
    actor_submitter: Arc<ActorTaskSubmitter>,
    handle_manager: ActorHandleManager,
    normal_submitter: Arc<NormalTaskSubmitter>,
    control: Arc<dyn ControlClient>,
    intentional_exit: AtomicBool,
}

impl CoreWorker {
    pub fn new(
        options: WorkerOptions,
        selector: Arc<dyn NodeSelector>,
        worker_clients: Arc<dyn WorkerClientPool>,
        client_factory: Arc<dyn WorkerClientFactory>,
        control: Arc<dyn ControlClient>,
    ) -> Arc<Self> {
        let worker_id = WorkerID::from_random();
        let context = WorkerContext::new(options.worker_type, worker_id, options.job_id);
        let address = Address {
            node_id: Vec::new(),
            ip_address: options.node_ip_address.clone(),
            port: options.node_manager_port as i32,
            worker_id: worker_id.binary(),
        };

        let memory_store = Arc::new(MemoryStore::new());
        let reference_counter = Arc::new(ReferenceCounter::new());
        let resolver = Arc::new(DependencyResolver::new(Arc::clone(&memory_store)));
        let task_receiver = Arc::new(TaskReceiver::new(
            worker_id,
            Arc::clone(&memory_store),
            options.max_concurrency,
            options.max_calls,
        ));
        let actor_submitter = ActorTaskSubmitter::new(address.clone());
        let handle_manager =
            ActorHandleManager::new(Arc::clone(&actor_submitter), client_factory);
        let normal_submitter = NormalTaskSubmitter::new(
            address.clone(),
            Arc::clone(&resolver),
            Arc::clone(&reference_counter),
            selector,
            worker_clients,
        );

        Arc::new(Self {
            options,
            context,
            address,
            memory_store,
            reference_counter,
            resolver,
            task_receiver,
            actor_submitter,
            handle_manager,
            normal_submitter,
            control,
            intentional_exit: AtomicBool::new(false),
        })
    }

    // ── objects ─────────────────────────────────────────────────────────

    /// Store a value and own it. Returns the new object id.
    pub fn put_object(&self, data: Bytes, metadata: Bytes) -> WorkerResult<ObjectID> {
        let index = self.context.next_put_index();
        let object_id = ObjectID::from_index(&self.context.current_task_id(), index as u32);
        let size = (data.len() + metadata.len()) as u64;

        self.memory_store
            .put(object_id, TidalObject::new(data, metadata, Vec::new()))?;
        self.reference_counter.add_owned_object(
            object_id,
            self.address.clone(),
            Vec::new(),
            size,
        );
        self.reference_counter.add_local_reference(object_id);
        self.resolver.on_object_available(&object_id);
        Ok(object_id)
    }

    /// Read objects, blocking up to `timeout` per missing object. Freed or
    /// owner-lost objects fail immediately with their recorded status.
    pub async fn get_objects(
        &self,
        object_ids: &[ObjectID],
        timeout: Duration,
    ) -> Vec<TidalResult<TidalObject>> {
        let mut results = Vec::with_capacity(object_ids.len());
        for oid in object_ids {
            if let Some(obj) = self.memory_store.get(oid) {
                results.push(Ok(obj));
                continue;
            }
            if let Some(code) = self.reference_counter.get_failure(oid) {
                results.push(Err(TidalError::new(
                    code,
                    format!("object {} is unavailable", oid.hex()),
                )));
                continue;
            }
            results.push(
                self.memory_store
                    .get_or_wait(oid, timeout)
                    .await
                    .map_err(|e| e.into_status()),
            );
        }
        results
    }

    /// Wait until `num_required` of the objects are local or the timeout
    /// fires. Returns (ready, remaining). Driven by the store's arrival
    /// notifications, not by polling.
    pub async fn wait_objects(
        &self,
        object_ids: &[ObjectID],
        num_required: usize,
        timeout: Duration,
    ) -> (Vec<ObjectID>, Vec<ObjectID>) {
        let num_required = num_required.min(object_ids.len());
        let deadline = tokio::time::Instant::now() + timeout;
        let notify = self.memory_store.arrival_notify();
        loop {
            // Register interest before scanning so an arrival between the
            // scan and the wait is not missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready: Vec<ObjectID> = object_ids
                .iter()
                .filter(|oid| self.memory_store.contains(oid))
                .copied()
                .collect();
            let remaining_time = deadline.saturating_duration_since(tokio::time::Instant::now());
            if ready.len() >= num_required || remaining_time.is_zero() {
                let remaining = object_ids
                    .iter()
                    .filter(|oid| !ready.contains(oid))
                    .copied()
                    .collect();
                return (ready, remaining);
            }
            let _ = tokio::time::timeout(remaining_time, notified).await;
        }
    }

    /// Drop one local reference; the object is deleted when nothing holds
    /// it anymore.
    pub fn remove_local_reference(&self, object_id: &ObjectID) {
        let freed = self.reference_counter.remove_local_reference(object_id);
        for oid in &freed {
            self.memory_store.delete(oid);
        }
    }

    pub fn add_local_reference(&self, object_id: ObjectID) {
        self.reference_counter.add_local_reference(object_id);
    }

    /// User-directed free. The ids become unreadable everywhere; with
    /// `local_only` false the node's object manager fans the free out.
    pub fn free_objects(&self, object_ids: &[ObjectID], _local_only: bool) {
        for oid in object_ids {
            self.memory_store.delete(oid);
            self.reference_counter.remove_local_reference(oid);
        }
    }

    // ── tasks ───────────────────────────────────────────────────────────

    /// Submit a stateless task. Returns its return-object ids and a
    /// receiver for the reply.
    pub fn submit_task(
        self: &Arc<Self>,
        spec: TaskSpec,
    ) -> (Vec<ObjectID>, oneshot::Receiver<TidalResult<PushTaskReply>>) {
        let task_id = TaskID::try_from_binary(&spec.task_id);
        let return_ids: Vec<ObjectID> = (0..spec.num_returns)
            .map(|i| ObjectID::from_index(&task_id, i as u32 + 1))
            .collect();
        for oid in &return_ids {
            self.reference_counter.add_owned_object(
                *oid,
                self.address.clone(),
                Vec::new(),
                0,
            );
            self.reference_counter.add_local_reference(*oid);
        }

        let inner_rx = self.normal_submitter.submit_task(spec);
        (return_ids, self.ingest_reply_returns(inner_rx))
    }

    /// Submit a task to an actor. Returns its return-object ids and a
    /// receiver for the reply.
    pub fn submit_actor_task(
        self: &Arc<Self>,
        actor_id: ActorID,
        spec: TaskSpec,
    ) -> TidalResult<(Vec<ObjectID>, oneshot::Receiver<TidalResult<PushTaskReply>>)> {
        let task_id = TaskID::try_from_binary(&spec.task_id);
        let return_ids: Vec<ObjectID> = (0..spec.num_returns)
            .map(|i| ObjectID::from_index(&task_id, i as u32 + 1))
            .collect();
        let max_retries = spec.max_retries.max(0) as u32;

        let inner_rx = self
            .actor_submitter
            .submit_task(actor_id, spec, max_retries)?;
        Ok((return_ids, self.ingest_reply_returns(inner_rx)))
    }

    /// Ingest a reply's inlined returns into the local store so `Get` finds
    /// them, then forward the reply.
    fn ingest_reply_returns(
        self: &Arc<Self>,
        inner_rx: oneshot::Receiver<TidalResult<PushTaskReply>>,
    ) -> oneshot::Receiver<TidalResult<PushTaskReply>> {
        let (tx, rx) = oneshot::channel();
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let result = match inner_rx.await {
                Ok(result) => result,
                Err(_) => Err(TidalError::disconnected("submitter dropped the reply")),
            };
            if let Ok(reply) = &result {
                for ret in &reply.return_objects {
                    let oid = ObjectID::try_from_binary(&ret.object_id);
                    if oid.is_nil() || ret.in_plasma {
                        continue;
                    }
                    let object = TidalObject::new(
                        Bytes::from(ret.data.clone()),
                        Bytes::from(ret.metadata.clone()),
                        Vec::new(),
                    );
                    let _ = worker.memory_store.put(oid, object);
                    worker.resolver.on_object_available(&oid);
                }
            }
            let _ = tx.send(result);
        });
        rx
    }

    // ── actors ──────────────────────────────────────────────────────────

    /// Create an actor through the control service and register its handle.
    pub async fn create_actor(self: &Arc<Self>, spec: TaskSpec) -> TidalResult<ActorID> {
        let creation = spec
            .actor_creation_task_spec
            .clone()
            .ok_or_else(|| TidalError::invalid_argument("missing actor creation spec"))?;
        let actor_id = ActorID::try_from_binary(&creation.actor_id);

        let reply = self
            .control
            .create_actor(CreateActorRequest {
                task_spec: Some(spec),
            })
            .await?;

        self.handle_manager
            .register_handle(ActorHandle::new(actor_id, 0, creation.is_detached));
        if !creation.name.is_empty() {
            self.handle_manager
                .register_named(&creation.namespace, &creation.name, actor_id);
        }
        // The creation reply doubles as the first ALIVE notification.
        if reply.actor_address.is_some() {
            self.handle_manager
                .on_actor_notification(&tidal_proto::gcs::ActorTableData {
                    actor_id: actor_id.binary(),
                    state: tidal_proto::gcs::ActorState::Alive as i32,
                    address: reply.actor_address.clone(),
                    ..Default::default()
                });
        }
        Ok(actor_id)
    }

    pub async fn kill_actor(&self, actor_id: &ActorID, no_restart: bool) -> TidalResult<()> {
        self.control
            .kill_actor(KillActorRequest {
                actor_id: actor_id.binary(),
                no_restart,
            })
            .await
    }

    /// Feed an actor-table notification into the handle cache and the
    /// submitter connection state.
    pub fn on_actor_notification(&self, data: &tidal_proto::gcs::ActorTableData) {
        self.handle_manager.on_actor_notification(data);
    }

    /// A worker elsewhere died; objects it owned become unreadable here.
    pub fn on_worker_died(&self, worker_id: &WorkerID) {
        let affected = self.reference_counter.on_owner_died(worker_id);
        for oid in &affected {
            self.resolver.on_object_failed(
                oid,
                crate::error::WorkerError::Status(TidalError::owner_died(format!(
                    "owner of {} died",
                    oid.hex()
                ))),
            );
        }
    }

    // ── placement groups ────────────────────────────────────────────────

    pub async fn create_placement_group(
        &self,
        request: CreatePlacementGroupRequest,
    ) -> TidalResult<CreatePlacementGroupReply> {
        self.control.create_placement_group(request).await
    }

    pub async fn remove_placement_group(
        &self,
        request: RemovePlacementGroupRequest,
    ) -> TidalResult<()> {
        self.control.remove_placement_group(request).await
    }

    pub async fn wait_placement_group_ready(
        &self,
        request: WaitPlacementGroupReadyRequest,
    ) -> TidalResult<bool> {
        self.control.wait_placement_group_ready(request).await
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Intentional exit: refuse new tasks and flag the side channel. The
    /// process exit code stays 0.
    pub fn exit(&self) {
        self.intentional_exit.store(true, Ordering::Relaxed);
        self.task_receiver.set_exiting();
    }

    pub fn is_exiting_intentionally(&self) -> bool {
        self.intentional_exit.load(Ordering::Relaxed)
    }

    // ── accessors ───────────────────────────────────────────────────────

    pub fn worker_id(&self) -> WorkerID {
        self.context.worker_id()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    pub fn memory_store(&self) -> &Arc<MemoryStore> {
        &self.memory_store
    }

    pub fn reference_counter(&self) -> &Arc<ReferenceCounter> {
        &self.reference_counter
    }

    pub fn task_receiver(&self) -> &Arc<TaskReceiver> {
        &self.task_receiver
    }

    pub fn actor_submitter(&self) -> &Arc<ActorTaskSubmitter> {
        &self.actor_submitter
    }

    /// Whether an object read would fail permanently, and with what.
    pub fn object_failure(&self, object_id: &ObjectID) -> Option<StatusCode> {
        self.reference_counter.get_failure(object_id)
    }
}
