// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The execution loop for incoming task dispatches.
//!
//! For each request: validate the target (duplicate actor creations reply OK,
//! foreign actor tasks reject retryable), admit through the caller's
//! scheduling queue, resolve by-reference arguments, invoke the user
//! function on the right concurrency-group pool, and write the returns:
//! inlined under the size threshold, stored otherwise. Application errors
//! become typed error objects, never RPC failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use tidal_common::constants::TASK_RPC_INLINED_BYTES_LIMIT;
use tidal_common::id::{ActorID, ObjectID, TaskID, WorkerID};
use tidal_common::status::TidalError;
use tidal_proto::task::{PushTaskReply, PushTaskRequest, ReturnObject, TaskSpec};

use crate::error::{WorkerError, WorkerResult};
use crate::memory_store::{MemoryStore, TidalObject};
use crate::options::ExecutionMode;
use crate::scheduling_queue::SchedulingQueue;

/// Executes one task: its specification plus the resolved argument values,
/// producing the return values. The payloads are opaque to the core.
pub type TaskExecutor =
    Arc<dyn Fn(&TaskSpec, Vec<TidalObject>) -> WorkerResult<Vec<TidalObject>> + Send + Sync>;

struct ActorAssignment {
    actor_id: ActorID,
    execute_out_of_order: bool,
    #[allow(dead_code)]
    mode: ExecutionMode,
}

/// Receives and executes tasks for one worker.
pub struct TaskReceiver {
    worker_id: WorkerID,
    memory_store: Arc<MemoryStore>,
    executor: Mutex<Option<TaskExecutor>>,
    assignment: Mutex<Option<ActorAssignment>>,
    /// One queue per caller worker.
    queues: Mutex<HashMap<Vec<u8>, Arc<SchedulingQueue>>>,
    /// Bounded pools per concurrency group; "" is the default group.
    group_pools: Mutex<HashMap<String, Arc<Semaphore>>>,
    arg_fetch_timeout: Duration,
    num_executed: AtomicUsize,
    /// Tasks executed before the worker asks to exit (0 = unlimited).
    max_calls: usize,
    is_exiting: AtomicBool,
}

impl TaskReceiver {
    pub fn new(
        worker_id: WorkerID,
        memory_store: Arc<MemoryStore>,
        default_concurrency: u32,
        max_calls: usize,
    ) -> Self {
        let mut pools = HashMap::new();
        pools.insert(
            String::new(),
            Arc::new(Semaphore::new(default_concurrency.max(1) as usize)),
        );
        Self {
            worker_id,
            memory_store,
            executor: Mutex::new(None),
            assignment: Mutex::new(None),
            queues: Mutex::new(HashMap::new()),
            group_pools: Mutex::new(pools),
            arg_fetch_timeout: Duration::from_secs(30),
            num_executed: AtomicUsize::new(0),
            max_calls,
            is_exiting: AtomicBool::new(false),
        }
    }

    pub fn set_executor(&self, executor: TaskExecutor) {
        *self.executor.lock() = Some(executor);
    }

    pub fn worker_id(&self) -> WorkerID {
        self.worker_id
    }

    pub fn assigned_actor_id(&self) -> Option<ActorID> {
        self.assignment.lock().as_ref().map(|a| a.actor_id)
    }

    pub fn is_exiting(&self) -> bool {
        self.is_exiting.load(Ordering::Relaxed)
    }

    /// The worker will refuse further tasks (intentional exit).
    pub fn set_exiting(&self) {
        self.is_exiting.store(true, Ordering::Relaxed);
    }

    pub fn num_executed(&self) -> usize {
        self.num_executed.load(Ordering::Relaxed)
    }

    /// Cancel a task still sitting in a queue. A task already running is
    /// not interrupted; the caller discards its reply instead.
    pub fn cancel_task(&self, task_id: &TaskID) {
        for queue in self.queues.lock().values() {
            queue.cancel_task_if_found(*task_id);
        }
    }

    /// Handle one task dispatch.
    pub async fn handle_push_task(&self, request: PushTaskRequest) -> WorkerResult<PushTaskReply> {
        if self.is_exiting() {
            return Ok(PushTaskReply {
                worker_exiting: true,
                ..Default::default()
            });
        }

        let intended = WorkerID::try_from_binary(&request.intended_worker_id);
        if !intended.is_nil() && intended != self.worker_id {
            return Err(WorkerError::InvalidArgument(format!(
                "task intended for worker {} received by {}",
                intended.hex(),
                self.worker_id.hex()
            )));
        }

        let task_spec = request
            .task_spec
            .ok_or_else(|| WorkerError::InvalidArgument("missing task spec".into()))?;
        let task_id = TaskID::try_from_binary(&task_spec.task_id);

        if task_spec.is_actor_creation_task() {
            return self.handle_actor_creation(&task_spec, task_id).await;
        }

        if let Some(actor_task) = &task_spec.actor_task_spec {
            let actor_id = ActorID::try_from_binary(&actor_task.actor_id);
            let (matches, out_of_order) = {
                let assignment = self.assignment.lock();
                match assignment.as_ref() {
                    Some(a) => (a.actor_id == actor_id, a.execute_out_of_order),
                    None => (false, false),
                }
            };
            if !matches {
                // The actor lives elsewhere (or not yet here); let the
                // caller retry against a refreshed address.
                return Ok(PushTaskReply {
                    is_retryable_error: true,
                    task_execution_error: format!(
                        "actor {} is not assigned to this worker",
                        actor_id.hex()
                    ),
                    ..Default::default()
                });
            }

            let queue = self.queue_for_caller(&task_spec, out_of_order);
            let dependencies: Vec<ObjectID> = task_spec
                .dependencies()
                .iter()
                .map(|b| ObjectID::try_from_binary(b))
                .collect();
            let store = Arc::clone(&self.memory_store);
            let timeout = self.arg_fetch_timeout;
            let pool = self.pool_for(&task_spec.concurrency_group_name);
            // The pool slot is taken while the request holds the queue head,
            // so execution starts in sequence order within each pool.
            let admit_result = queue
                .admit(
                    request.sequence_number,
                    request.client_processed_up_to,
                    task_id,
                    async move {
                        for oid in &dependencies {
                            store
                                .get_or_wait(oid, timeout)
                                .await
                                .map_err(|e| e.into_status())?;
                        }
                        pool.acquire_owned()
                            .await
                            .map_err(|_| TidalError::disconnected("concurrency pool closed"))
                    },
                )
                .await;
            return match admit_result {
                Ok(permit) => self.execute(&task_spec, task_id, Some(permit)).await,
                Err(err) => Ok(reject_reply(err)),
            };
        }

        self.execute(&task_spec, task_id, None).await
    }

    async fn handle_actor_creation(
        &self,
        task_spec: &TaskSpec,
        task_id: TaskID,
    ) -> WorkerResult<PushTaskReply> {
        let creation = task_spec.actor_creation_task_spec.as_ref().unwrap();
        let actor_id = ActorID::try_from_binary(&creation.actor_id);

        {
            let mut assignment = self.assignment.lock();
            let existing_id = assignment.as_ref().map(|a| a.actor_id);
            match existing_id {
                Some(existing) if existing == actor_id => {
                    // The caller's retry is idempotent; the actor is here.
                    let dummy = dummy_return(&task_id, task_spec.num_returns);
                    return Ok(PushTaskReply {
                        return_objects: vec![dummy],
                        ..Default::default()
                    });
                }
                Some(existing) => {
                    return Err(WorkerError::InvalidArgument(format!(
                        "worker already hosts actor {}",
                        existing.hex()
                    )));
                }
                None => {}
            }
            let mode = if creation.is_asyncio {
                ExecutionMode::Cooperative {
                    max_concurrency: creation.max_concurrency,
                }
            } else {
                ExecutionMode::Threaded {
                    max_concurrency: creation.max_concurrency,
                }
            };
            *assignment = Some(ActorAssignment {
                actor_id,
                execute_out_of_order: creation.execute_out_of_order,
                mode,
            });
        }

        // Declared concurrency groups get their own bounded pools; the
        // default pool follows the actor's max concurrency.
        {
            let mut pools = self.group_pools.lock();
            pools.insert(
                String::new(),
                Arc::new(Semaphore::new(
                    creation.max_concurrency.max(1) as usize,
                )),
            );
            for group in &creation.concurrency_groups {
                pools.insert(
                    group.name.clone(),
                    Arc::new(Semaphore::new(group.max_concurrency.max(1) as usize)),
                );
            }
        }

        tracing::debug!(actor_id = %actor_id.hex(), "actor assigned to worker");
        self.execute(task_spec, task_id, None).await
    }

    /// Run the user function and build the reply. `permit` carries a
    /// pre-acquired pool slot from queue admission.
    async fn execute(
        &self,
        task_spec: &TaskSpec,
        task_id: TaskID,
        permit: Option<tokio::sync::OwnedSemaphorePermit>,
    ) -> WorkerResult<PushTaskReply> {
        let _permit = match permit {
            Some(permit) => permit,
            None => {
                let pool = self.pool_for(&task_spec.concurrency_group_name);
                pool.acquire_owned()
                    .await
                    .map_err(|_| WorkerError::Internal("concurrency pool closed".into()))?
            }
        };

        // Build the argument vector: values adopted inline, references read
        // from the store (already resolved through the queue for actor
        // tasks; normal tasks block here).
        let mut args = Vec::with_capacity(task_spec.args.len());
        for arg in &task_spec.args {
            match &arg.arg {
                Some(tidal_proto::common::task_arg::Arg::Value(value)) => {
                    args.push(TidalObject::new(
                        Bytes::from(value.data.clone()),
                        Bytes::from(value.metadata.clone()),
                        Vec::new(),
                    ));
                }
                Some(tidal_proto::common::task_arg::Arg::Reference(reference)) => {
                    let oid = ObjectID::try_from_binary(&reference.object_id);
                    let obj = self
                        .memory_store
                        .get_or_wait(&oid, self.arg_fetch_timeout)
                        .await?;
                    args.push(obj);
                }
                None => {
                    return Err(WorkerError::InvalidArgument("empty task argument".into()))
                }
            }
        }

        let executor = self
            .executor
            .lock()
            .clone()
            .ok_or_else(|| WorkerError::Internal("no task executor registered".into()))?;

        let result = executor(task_spec, args);
        self.num_executed.fetch_add(1, Ordering::Relaxed);
        if self.max_calls > 0 && self.num_executed() >= self.max_calls {
            self.is_exiting.store(true, Ordering::Relaxed);
        }

        let mut reply = match result {
            Ok(values) => {
                let mut return_objects = Vec::new();
                for (index, value) in values.into_iter().enumerate() {
                    return_objects.push(self.build_return(&task_id, index as u32, value)?);
                }
                PushTaskReply {
                    return_objects,
                    ..Default::default()
                }
            }
            Err(err) => {
                // Application failures are data: every return becomes a
                // typed error object readable through the normal Get path.
                let message = err.into_status().to_string();
                let mut return_objects = Vec::new();
                for index in 0..task_spec.num_returns.max(1) {
                    let error_object = TidalObject::task_execution_error(&message);
                    return_objects.push(self.build_return(
                        &task_id,
                        index as u32,
                        error_object,
                    )?);
                }
                PushTaskReply {
                    return_objects,
                    is_application_error: true,
                    task_execution_error: message,
                    ..Default::default()
                }
            }
        };

        // Actor tasks (and creations) carry one extra dummy id used purely
        // as a signal.
        if task_spec.is_actor_task() || task_spec.is_actor_creation_task() {
            reply
                .return_objects
                .push(dummy_return(&task_id, task_spec.num_returns));
        }

        reply.worker_exiting = self.is_exiting();
        Ok(reply)
    }

    fn build_return(
        &self,
        task_id: &TaskID,
        index: u32,
        value: TidalObject,
    ) -> WorkerResult<ReturnObject> {
        let object_id = ObjectID::from_index(task_id, index + 1);
        let size = (value.data.len() + value.metadata.len()) as u64;

        // Returns always land in the local store so local readers find
        // them; small ones are additionally inlined into the reply.
        let _ = self.memory_store.put(object_id, value.clone());

        if size as usize <= TASK_RPC_INLINED_BYTES_LIMIT {
            Ok(ReturnObject {
                object_id: object_id.binary(),
                data: value.data.to_vec(),
                metadata: value.metadata.to_vec(),
                in_plasma: false,
                size,
            })
        } else {
            Ok(ReturnObject {
                object_id: object_id.binary(),
                data: Vec::new(),
                metadata: Vec::new(),
                in_plasma: true,
                size,
            })
        }
    }

    fn queue_for_caller(&self, task_spec: &TaskSpec, out_of_order: bool) -> Arc<SchedulingQueue> {
        let caller_key = task_spec
            .caller_address
            .as_ref()
            .map(|a| a.worker_id.clone())
            .unwrap_or_default();
        let mut queues = self.queues.lock();
        Arc::clone(queues.entry(caller_key).or_insert_with(|| {
            Arc::new(if out_of_order {
                SchedulingQueue::new_out_of_order()
            } else {
                SchedulingQueue::new_ordered()
            })
        }))
    }

    fn pool_for(&self, group: &str) -> Arc<Semaphore> {
        let pools = self.group_pools.lock();
        pools
            .get(group)
            .or_else(|| pools.get(""))
            .cloned()
            .expect("default pool always present")
    }
}

fn dummy_return(task_id: &TaskID, num_returns: u64) -> ReturnObject {
    let object_id = ObjectID::from_index(task_id, num_returns as u32 + 1);
    ReturnObject {
        object_id: object_id.binary(),
        data: Vec::new(),
        metadata: Vec::new(),
        in_plasma: false,
        size: 0,
    }
}

fn reject_reply(err: TidalError) -> PushTaskReply {
    PushTaskReply {
        is_retryable_error: err.is_transient(),
        task_execution_error: err.to_string(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_common::id::JobID;
    use tidal_proto::common::{Address, InlineValue, ObjectReference, TaskArg};
    use tidal_proto::task::{ActorCreationTaskSpec, ActorTaskSpec};

    fn make_receiver(concurrency: u32) -> (Arc<MemoryStore>, TaskReceiver) {
        let store = Arc::new(MemoryStore::new());
        let receiver = TaskReceiver::new(WorkerID::from_random(), Arc::clone(&store), concurrency, 0);
        (store, receiver)
    }

    fn echo_executor() -> TaskExecutor {
        Arc::new(|_spec, args| {
            Ok(vec![TidalObject::from_data(
                args.first()
                    .map(|a| a.data.clone())
                    .unwrap_or_else(|| Bytes::from_static(b"empty")),
            )])
        })
    }

    fn request_for(receiver: &TaskReceiver, spec: TaskSpec, seq: i64, up_to: i64) -> PushTaskRequest {
        PushTaskRequest {
            intended_worker_id: receiver.worker_id().binary(),
            task_spec: Some(spec),
            sequence_number: seq,
            client_processed_up_to: up_to,
        }
    }

    fn normal_spec(name: &str) -> TaskSpec {
        TaskSpec {
            task_id: TaskID::from_random().binary(),
            name: name.to_string(),
            num_returns: 1,
            ..Default::default()
        }
    }

    fn creation_spec(actor_id: &ActorID, out_of_order: bool) -> TaskSpec {
        TaskSpec {
            task_id: TaskID::for_actor_creation_task(actor_id).binary(),
            num_returns: 0,
            actor_creation_task_spec: Some(ActorCreationTaskSpec {
                actor_id: actor_id.binary(),
                max_concurrency: 1,
                execute_out_of_order: out_of_order,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn actor_task_spec(actor_id: &ActorID, seq: u64, caller: &Address) -> TaskSpec {
        TaskSpec {
            task_id: TaskID::from_random().binary(),
            num_returns: 1,
            caller_address: Some(caller.clone()),
            actor_task_spec: Some(ActorTaskSpec {
                actor_id: actor_id.binary(),
                sequence_number: seq,
            }),
            args: vec![TaskArg::by_value(InlineValue {
                data: format!("seq-{seq}").into_bytes(),
                metadata: vec![],
                nested_refs: vec![],
            })],
            ..Default::default()
        }
    }

    fn caller_address() -> Address {
        Address {
            worker_id: WorkerID::from_random().binary(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_normal_task_executes_and_inlines_return() {
        let (store, receiver) = make_receiver(2);
        receiver.set_executor(echo_executor());

        let spec = normal_spec("echo");
        let task_id = TaskID::try_from_binary(&spec.task_id);
        let reply = receiver
            .handle_push_task(request_for(&receiver, spec, 0, -1))
            .await
            .unwrap();

        assert!(!reply.is_application_error);
        assert_eq!(reply.return_objects.len(), 1);
        assert_eq!(reply.return_objects[0].data, b"empty");
        // The return is also readable locally.
        let oid = ObjectID::from_index(&task_id, 1);
        assert!(store.contains(&oid));
    }

    #[tokio::test]
    async fn test_large_return_stored_not_inlined() {
        let (store, receiver) = make_receiver(1);
        receiver.set_executor(Arc::new(|_spec, _args| {
            Ok(vec![TidalObject::from_data(Bytes::from(vec![
                7u8;
                TASK_RPC_INLINED_BYTES_LIMIT + 1
            ]))])
        }));

        let spec = normal_spec("big");
        let task_id = TaskID::try_from_binary(&spec.task_id);
        let reply = receiver
            .handle_push_task(request_for(&receiver, spec, 0, -1))
            .await
            .unwrap();

        let ret = &reply.return_objects[0];
        assert!(ret.in_plasma);
        assert!(ret.data.is_empty());
        assert!(store.contains(&ObjectID::from_index(&task_id, 1)));
    }

    #[tokio::test]
    async fn test_application_error_becomes_error_object() {
        let (store, receiver) = make_receiver(1);
        receiver.set_executor(Arc::new(|_spec, _args| {
            Err(WorkerError::Internal("user code raised".into()))
        }));

        let spec = normal_spec("boom");
        let task_id = TaskID::try_from_binary(&spec.task_id);
        let reply = receiver
            .handle_push_task(request_for(&receiver, spec, 0, -1))
            .await
            .unwrap();

        assert!(reply.is_application_error);
        assert!(reply.task_execution_error.contains("user code raised"));
        let stored = store.get(&ObjectID::from_index(&task_id, 1)).unwrap();
        assert!(stored.is_error());
    }

    #[tokio::test]
    async fn test_duplicate_actor_creation_is_ok() {
        let (_store, receiver) = make_receiver(1);
        receiver.set_executor(echo_executor());
        let actor_id = ActorID::of(&JobID::from_int(1), &TaskID::nil(), 0);

        let first = receiver
            .handle_push_task(request_for(&receiver, creation_spec(&actor_id, false), 0, -1))
            .await
            .unwrap();
        assert!(!first.is_application_error);
        assert_eq!(receiver.num_executed(), 1);

        // The retry does not re-run the creation.
        let second = receiver
            .handle_push_task(request_for(&receiver, creation_spec(&actor_id, false), 0, -1))
            .await
            .unwrap();
        assert!(!second.is_application_error);
        assert_eq!(receiver.num_executed(), 1);
        assert_eq!(receiver.assigned_actor_id(), Some(actor_id));
    }

    #[tokio::test]
    async fn test_foreign_actor_task_rejected_retryable() {
        let (_store, receiver) = make_receiver(1);
        receiver.set_executor(echo_executor());
        let hosted = ActorID::of(&JobID::from_int(1), &TaskID::nil(), 0);
        let foreign = ActorID::of(&JobID::from_int(1), &TaskID::nil(), 1);

        receiver
            .handle_push_task(request_for(&receiver, creation_spec(&hosted, false), 0, -1))
            .await
            .unwrap();

        let caller = caller_address();
        let reply = receiver
            .handle_push_task(request_for(
                &receiver,
                actor_task_spec(&foreign, 0, &caller),
                0,
                -1,
            ))
            .await
            .unwrap();
        assert!(reply.is_retryable_error);
    }

    #[tokio::test]
    async fn test_actor_tasks_run_in_sequence_order() {
        let (_store, receiver) = make_receiver(4);
        let executed: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&executed);
        receiver.set_executor(Arc::new(move |spec, _args| {
            if let Some(actor_task) = &spec.actor_task_spec {
                log.lock().push(actor_task.sequence_number);
            }
            Ok(vec![])
        }));

        let actor_id = ActorID::of(&JobID::from_int(1), &TaskID::nil(), 0);
        let receiver = Arc::new(receiver);
        receiver
            .handle_push_task(request_for(&receiver, creation_spec(&actor_id, false), 0, -1))
            .await
            .unwrap();

        let caller = caller_address();
        // Dispatch sequences 2, 0, 1 concurrently; execution is 0, 1, 2.
        let mut handles = Vec::new();
        for seq in [2u64, 0, 1] {
            let receiver = Arc::clone(&receiver);
            let spec = actor_task_spec(&actor_id, seq, &caller);
            handles.push(tokio::spawn(async move {
                receiver
                    .handle_push_task(PushTaskRequest {
                        intended_worker_id: receiver.worker_id().binary(),
                        task_spec: Some(spec),
                        sequence_number: seq as i64,
                        client_processed_up_to: -1,
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*executed.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_actor_task_reply_has_dummy_return() {
        let (_store, receiver) = make_receiver(1);
        receiver.set_executor(echo_executor());
        let actor_id = ActorID::of(&JobID::from_int(1), &TaskID::nil(), 0);
        receiver
            .handle_push_task(request_for(&receiver, creation_spec(&actor_id, false), 0, -1))
            .await
            .unwrap();

        let caller = caller_address();
        let reply = receiver
            .handle_push_task(request_for(
                &receiver,
                actor_task_spec(&actor_id, 0, &caller),
                0,
                -1,
            ))
            .await
            .unwrap();
        // One real return plus the dummy signal id.
        assert_eq!(reply.return_objects.len(), 2);
        let dummy = reply.return_objects.last().unwrap();
        assert!(dummy.data.is_empty());
        assert_eq!(dummy.size, 0);
    }

    #[tokio::test]
    async fn test_zero_return_actor_task_yields_only_dummy() {
        let (_store, receiver) = make_receiver(1);
        receiver.set_executor(Arc::new(|_spec, _args| Ok(vec![])));
        let actor_id = ActorID::of(&JobID::from_int(1), &TaskID::nil(), 0);
        receiver
            .handle_push_task(request_for(&receiver, creation_spec(&actor_id, false), 0, -1))
            .await
            .unwrap();

        let caller = caller_address();
        let mut spec = actor_task_spec(&actor_id, 0, &caller);
        spec.num_returns = 0;
        let reply = receiver
            .handle_push_task(request_for(&receiver, spec, 0, -1))
            .await
            .unwrap();
        assert_eq!(reply.return_objects.len(), 1);
    }

    #[tokio::test]
    async fn test_by_reference_argument_read_from_store() {
        let (store, receiver) = make_receiver(1);
        receiver.set_executor(echo_executor());

        let arg_id = tidal_test_utils::object_id_with_byte(1);
        store
            .put(arg_id, TidalObject::from_data(Bytes::from("stored arg")))
            .unwrap();

        let mut spec = normal_spec("ref");
        spec.args = vec![TaskArg::by_reference(ObjectReference {
            object_id: arg_id.binary(),
            owner_address: None,
            nested_ids: vec![],
        })];

        let reply = receiver
            .handle_push_task(request_for(&receiver, spec, 0, -1))
            .await
            .unwrap();
        assert_eq!(reply.return_objects[0].data, b"stored arg");
    }

    #[tokio::test]
    async fn test_max_calls_sets_worker_exiting() {
        let store = Arc::new(MemoryStore::new());
        let receiver = TaskReceiver::new(WorkerID::from_random(), store, 1, 2);
        receiver.set_executor(echo_executor());

        let first = receiver
            .handle_push_task(request_for(&receiver, normal_spec("a"), 0, -1))
            .await
            .unwrap();
        assert!(!first.worker_exiting);

        let second = receiver
            .handle_push_task(request_for(&receiver, normal_spec("b"), 1, -1))
            .await
            .unwrap();
        assert!(second.worker_exiting);

        // Further tasks are refused outright.
        let third = receiver
            .handle_push_task(request_for(&receiver, normal_spec("c"), 2, -1))
            .await
            .unwrap();
        assert!(third.worker_exiting);
        assert_eq!(receiver.num_executed(), 2);
    }

    #[tokio::test]
    async fn test_wrong_worker_rejected() {
        let (_store, receiver) = make_receiver(1);
        receiver.set_executor(echo_executor());
        let request = PushTaskRequest {
            intended_worker_id: WorkerID::from_random().binary(),
            task_spec: Some(normal_spec("misrouted")),
            sequence_number: 0,
            client_processed_up_to: -1,
        };
        assert!(matches!(
            receiver.handle_push_task(request).await,
            Err(WorkerError::InvalidArgument(_))
        ));
    }
}
