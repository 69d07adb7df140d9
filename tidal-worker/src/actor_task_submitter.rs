// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Actor task submission.
//!
//! Per actor the submitter keeps one ordered queue of outbound tasks and a
//! connection state fed by actor-table notifications. Sequence numbers are
//! assigned at send time, strictly monotonic and gapless per (caller,
//! actor); each request carries the highest sequence number already replied
//! to. While the actor is RESTARTING tasks buffer; on the next ALIVE the
//! numbering restarts with the fresh incarnation and everything buffered is
//! resubmitted in order. On DEAD every pending task fails with `ActorDied`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use tidal_common::id::{ActorID, TaskID};
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::common::Address;
use tidal_proto::task::{PushTaskReply, PushTaskRequest, TaskSpec};

/// Transport to a worker hosting an actor.
#[async_trait::async_trait]
pub trait WorkerClient: Send + Sync {
    async fn push_task(&self, request: PushTaskRequest) -> TidalResult<PushTaskReply>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    /// No address yet (or lost); tasks buffer.
    Pending,
    Connected,
    Restarting,
    Dead,
}

struct QueuedTask {
    spec: TaskSpec,
    /// Assigned on first send; kept across same-incarnation resends.
    sequence_number: Option<i64>,
    retries_left: u32,
    reply_tx: oneshot::Sender<TidalResult<PushTaskReply>>,
}

struct ActorEntry {
    state: ConnectionState,
    client: Option<Arc<dyn WorkerClient>>,
    next_sequence_number: i64,
    processed_up_to: i64,
    seen_restarts: u64,
    queue: VecDeque<QueuedTask>,
    draining: bool,
}

impl ActorEntry {
    fn new() -> Self {
        Self {
            state: ConnectionState::Pending,
            client: None,
            next_sequence_number: 0,
            processed_up_to: -1,
            seen_restarts: 0,
            queue: VecDeque::new(),
            draining: false,
        }
    }
}

/// Submits tasks to actors on behalf of one caller.
pub struct ActorTaskSubmitter {
    caller_address: Address,
    actors: Mutex<HashMap<ActorID, ActorEntry>>,
    /// Cancelled tasks whose replies must not reach the caller.
    cancelled: Mutex<HashSet<TaskID>>,
}

impl ActorTaskSubmitter {
    pub fn new(caller_address: Address) -> Arc<Self> {
        Arc::new(Self {
            caller_address,
            actors: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashSet::new()),
        })
    }

    /// Make an actor known; tasks buffer until it connects.
    pub fn add_actor(&self, actor_id: ActorID) {
        self.actors
            .lock()
            .entry(actor_id)
            .or_insert_with(ActorEntry::new);
    }

    /// Submit a task; the returned receiver resolves with the reply (or the
    /// failure) once delivery concludes.
    pub fn submit_task(
        self: &Arc<Self>,
        actor_id: ActorID,
        mut spec: TaskSpec,
        max_retries: u32,
    ) -> TidalResult<oneshot::Receiver<TidalResult<PushTaskReply>>> {
        spec.caller_address = Some(self.caller_address.clone());

        let (tx, rx) = oneshot::channel();
        {
            let mut actors = self.actors.lock();
            let entry = actors
                .entry(actor_id)
                .or_insert_with(ActorEntry::new);
            if entry.state == ConnectionState::Dead {
                let _ = tx.send(Err(TidalError::actor_died(format!(
                    "actor {} is dead",
                    actor_id.hex()
                ))));
                return Ok(rx);
            }
            entry.queue.push_back(QueuedTask {
                spec,
                sequence_number: None,
                retries_left: max_retries,
                reply_tx: tx,
            });
        }
        self.maybe_drain(actor_id);
        Ok(rx)
    }

    /// The actor (re)connected at `address`.
    pub fn on_actor_alive(
        self: &Arc<Self>,
        actor_id: ActorID,
        client: Arc<dyn WorkerClient>,
        num_restarts: u64,
    ) {
        {
            let mut actors = self.actors.lock();
            let entry = actors
                .entry(actor_id)
                .or_insert_with(ActorEntry::new);
            if entry.state == ConnectionState::Dead {
                return;
            }
            if num_restarts > entry.seen_restarts {
                // A fresh incarnation has fresh queues: numbering restarts
                // and buffered tasks are renumbered at send time.
                entry.seen_restarts = num_restarts;
                entry.next_sequence_number = 0;
                entry.processed_up_to = -1;
                for task in entry.queue.iter_mut() {
                    task.sequence_number = None;
                }
            }
            entry.state = ConnectionState::Connected;
            entry.client = Some(client);
        }
        self.maybe_drain(actor_id);
    }

    /// The actor is restarting; buffer until the next ALIVE.
    pub fn on_actor_restarting(&self, actor_id: ActorID) {
        let mut actors = self.actors.lock();
        if let Some(entry) = actors.get_mut(&actor_id) {
            if entry.state != ConnectionState::Dead {
                entry.state = ConnectionState::Restarting;
                entry.client = None;
            }
        }
    }

    /// The actor is gone for good; everything pending fails.
    pub fn on_actor_dead(&self, actor_id: ActorID) {
        let failed: Vec<QueuedTask> = {
            let mut actors = self.actors.lock();
            match actors.get_mut(&actor_id) {
                Some(entry) => {
                    entry.state = ConnectionState::Dead;
                    entry.client = None;
                    entry.queue.drain(..).collect()
                }
                None => Vec::new(),
            }
        };
        for task in failed {
            let _ = task.reply_tx.send(Err(TidalError::actor_died(format!(
                "actor {} died with the task pending",
                actor_id.hex()
            ))));
        }
    }

    /// Cancel a task. A task still buffered is dropped; for a task already
    /// sent, the eventual reply is discarded and the caller sees
    /// `SchedulingCancelled` instead.
    pub fn cancel_task(&self, actor_id: &ActorID, task_id: &TaskID) {
        let buffered = {
            let mut actors = self.actors.lock();
            match actors.get_mut(actor_id) {
                Some(entry) => {
                    let position = entry.queue.iter().position(|t| {
                        TaskID::try_from_binary(&t.spec.task_id) == *task_id
                            && t.sequence_number.is_none()
                    });
                    position.and_then(|i| entry.queue.remove(i))
                }
                None => None,
            }
        };
        match buffered {
            Some(task) => {
                let _ = task
                    .reply_tx
                    .send(Err(TidalError::scheduling_cancelled("task cancelled")));
            }
            None => {
                self.cancelled.lock().insert(*task_id);
            }
        }
    }

    pub fn num_pending_tasks(&self, actor_id: &ActorID) -> usize {
        self.actors
            .lock()
            .get(actor_id)
            .map_or(0, |entry| entry.queue.len())
    }

    /// Start the per-actor drain loop unless one is already running.
    fn maybe_drain(self: &Arc<Self>, actor_id: ActorID) {
        {
            let mut actors = self.actors.lock();
            let Some(entry) = actors.get_mut(&actor_id) else {
                return;
            };
            if entry.draining
                || entry.state != ConnectionState::Connected
                || entry.queue.is_empty()
            {
                return;
            }
            entry.draining = true;
        }
        let submitter = Arc::clone(self);
        tokio::spawn(async move {
            submitter.drain(actor_id).await;
        });
    }

    /// Send queued tasks in order, one at a time, until the queue empties or
    /// the connection drops.
    async fn drain(self: Arc<Self>, actor_id: ActorID) {
        loop {
            let (mut task, client, processed_up_to) = {
                let mut actors = self.actors.lock();
                let Some(entry) = actors.get_mut(&actor_id) else {
                    return;
                };
                if entry.state != ConnectionState::Connected || entry.queue.is_empty() {
                    entry.draining = false;
                    return;
                }
                let mut task = entry.queue.pop_front().unwrap();
                if task.sequence_number.is_none() {
                    task.sequence_number = Some(entry.next_sequence_number);
                    entry.next_sequence_number += 1;
                }
                (
                    task,
                    entry.client.clone().unwrap(),
                    entry.processed_up_to,
                )
            };

            let sequence_number = task.sequence_number.unwrap();
            if let Some(actor_task) = task.spec.actor_task_spec.as_mut() {
                actor_task.sequence_number = sequence_number as u64;
            }
            let task_id = TaskID::try_from_binary(&task.spec.task_id);

            let request = PushTaskRequest {
                intended_worker_id: Vec::new(),
                task_spec: Some(task.spec.clone()),
                sequence_number,
                client_processed_up_to: processed_up_to,
            };

            match client.push_task(request).await {
                Ok(reply) if reply.is_retryable_error => {
                    // The actor is not (or no longer) on that worker; wait
                    // for a refreshed address.
                    tracing::debug!(
                        actor_id = %actor_id.hex(),
                        error = %reply.task_execution_error,
                        "actor task bounced; buffering until the actor reconnects"
                    );
                    let mut actors = self.actors.lock();
                    if let Some(entry) = actors.get_mut(&actor_id) {
                        entry.queue.push_front(task);
                        entry.state = ConnectionState::Pending;
                        entry.client = None;
                        entry.draining = false;
                    }
                    return;
                }
                Ok(reply) => {
                    {
                        let mut actors = self.actors.lock();
                        if let Some(entry) = actors.get_mut(&actor_id) {
                            entry.processed_up_to = entry.processed_up_to.max(sequence_number);
                        }
                    }
                    let result = if self.cancelled.lock().remove(&task_id) {
                        // The reply of a cancelled task is discarded.
                        Err(TidalError::scheduling_cancelled("task cancelled"))
                    } else {
                        Ok(reply)
                    };
                    let _ = task.reply_tx.send(result);
                }
                Err(err) if err.is_transient() => {
                    let retry = task.retries_left > 0 && task.spec.is_idempotent;
                    if retry {
                        task.retries_left -= 1;
                        let mut actors = self.actors.lock();
                        if let Some(entry) = actors.get_mut(&actor_id) {
                            entry.queue.push_front(task);
                            // The connection is suspect; buffer until the
                            // actor table confirms the address.
                            entry.state = ConnectionState::Pending;
                            entry.client = None;
                            entry.draining = false;
                        }
                        return;
                    }
                    let _ = task.reply_tx.send(Err(err));
                }
                Err(err) => {
                    let _ = task.reply_tx.send(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::task_receiver::{TaskExecutor, TaskReceiver};
    use std::time::Duration;
    use tidal_common::id::{JobID, WorkerID};
    use tidal_proto::task::ActorCreationTaskSpec;

    /// Loopback client delivering into an in-process task receiver.
    struct LoopbackWorker {
        receiver: Arc<TaskReceiver>,
    }

    #[async_trait::async_trait]
    impl WorkerClient for LoopbackWorker {
        async fn push_task(&self, request: PushTaskRequest) -> TidalResult<PushTaskReply> {
            self.receiver
                .handle_push_task(request)
                .await
                .map_err(|e| e.into_status())
        }
    }

    /// Client that always fails with a transient error.
    struct DownWorker;

    #[async_trait::async_trait]
    impl WorkerClient for DownWorker {
        async fn push_task(&self, _request: PushTaskRequest) -> TidalResult<PushTaskReply> {
            Err(TidalError::rpc_error("connection refused"))
        }
    }

    fn caller() -> Address {
        Address {
            worker_id: WorkerID::from_random().binary(),
            ..Default::default()
        }
    }

    fn logging_executor(log: Arc<Mutex<Vec<u64>>>) -> TaskExecutor {
        Arc::new(move |spec, _args| {
            if let Some(actor_task) = &spec.actor_task_spec {
                log.lock().push(actor_task.sequence_number);
            }
            Ok(vec![])
        })
    }

    async fn spawn_incarnation(
        actor_id: &ActorID,
        log: Arc<Mutex<Vec<u64>>>,
    ) -> Arc<TaskReceiver> {
        let receiver = Arc::new(TaskReceiver::new(
            WorkerID::from_random(),
            Arc::new(MemoryStore::new()),
            1,
            0,
        ));
        receiver.set_executor(logging_executor(log));
        let creation = TaskSpec {
            task_id: TaskID::for_actor_creation_task(actor_id).binary(),
            actor_creation_task_spec: Some(ActorCreationTaskSpec {
                actor_id: actor_id.binary(),
                max_concurrency: 1,
                ..Default::default()
            }),
            ..Default::default()
        };
        receiver
            .handle_push_task(PushTaskRequest {
                intended_worker_id: receiver.worker_id().binary(),
                task_spec: Some(creation),
                sequence_number: 0,
                client_processed_up_to: -1,
            })
            .await
            .unwrap();
        receiver
    }

    fn actor_task(actor_id: &ActorID) -> TaskSpec {
        TaskSpec {
            task_id: TaskID::from_random().binary(),
            num_returns: 0,
            is_idempotent: true,
            actor_task_spec: Some(tidal_proto::task::ActorTaskSpec {
                actor_id: actor_id.binary(),
                sequence_number: 0,
            }),
            ..Default::default()
        }
    }

    fn new_actor_id(counter: usize) -> ActorID {
        ActorID::of(&JobID::from_int(1), &TaskID::nil(), counter)
    }

    #[tokio::test]
    async fn test_submit_and_reply() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let actor_id = new_actor_id(0);
        let receiver = spawn_incarnation(&actor_id, Arc::clone(&log)).await;

        let submitter = ActorTaskSubmitter::new(caller());
        submitter.add_actor(actor_id);
        submitter.on_actor_alive(actor_id, Arc::new(LoopbackWorker { receiver }), 0);

        let rx = submitter
            .submit_task(actor_id, actor_task(&actor_id), 0)
            .unwrap();
        let reply = rx.await.unwrap().unwrap();
        assert!(!reply.is_application_error);
        assert_eq!(*log.lock(), vec![0]);
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_gapless() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let actor_id = new_actor_id(1);
        let receiver = spawn_incarnation(&actor_id, Arc::clone(&log)).await;

        let submitter = ActorTaskSubmitter::new(caller());
        submitter.add_actor(actor_id);
        submitter.on_actor_alive(actor_id, Arc::new(LoopbackWorker { receiver }), 0);

        let mut receivers = Vec::new();
        for _ in 0..5 {
            receivers.push(
                submitter
                    .submit_task(actor_id, actor_task(&actor_id), 0)
                    .unwrap(),
            );
        }
        for rx in receivers {
            rx.await.unwrap().unwrap();
        }
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_tasks_buffer_until_alive() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let actor_id = new_actor_id(2);

        let submitter = ActorTaskSubmitter::new(caller());
        submitter.add_actor(actor_id);

        let rx = submitter
            .submit_task(actor_id, actor_task(&actor_id), 0)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(submitter.num_pending_tasks(&actor_id), 1);

        let receiver = spawn_incarnation(&actor_id, Arc::clone(&log)).await;
        submitter.on_actor_alive(actor_id, Arc::new(LoopbackWorker { receiver }), 0);

        rx.await.unwrap().unwrap();
        assert_eq!(*log.lock(), vec![0]);
    }

    #[tokio::test]
    async fn test_restart_resubmits_buffered_tasks_in_order() {
        // Three tasks; the worker dies after the first completes; the
        // remaining two land on the new incarnation in order.
        let log1 = Arc::new(Mutex::new(Vec::new()));
        let actor_id = new_actor_id(3);
        let incarnation1 = spawn_incarnation(&actor_id, Arc::clone(&log1)).await;

        let submitter = ActorTaskSubmitter::new(caller());
        submitter.add_actor(actor_id);
        submitter.on_actor_alive(
            actor_id,
            Arc::new(LoopbackWorker {
                receiver: incarnation1,
            }),
            0,
        );

        let rx1 = submitter
            .submit_task(actor_id, actor_task(&actor_id), 0)
            .unwrap();
        rx1.await.unwrap().unwrap();
        assert_eq!(*log1.lock(), vec![0]);

        // The worker dies; the actor restarts.
        submitter.on_actor_restarting(actor_id);
        let rx2 = submitter
            .submit_task(actor_id, actor_task(&actor_id), 0)
            .unwrap();
        let rx3 = submitter
            .submit_task(actor_id, actor_task(&actor_id), 0)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(submitter.num_pending_tasks(&actor_id), 2);

        let log2 = Arc::new(Mutex::new(Vec::new()));
        let incarnation2 = spawn_incarnation(&actor_id, Arc::clone(&log2)).await;
        submitter.on_actor_alive(
            actor_id,
            Arc::new(LoopbackWorker {
                receiver: incarnation2,
            }),
            1,
        );

        rx2.await.unwrap().unwrap();
        rx3.await.unwrap().unwrap();
        // Fresh incarnation, fresh numbering, original order.
        assert_eq!(*log2.lock(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_dead_actor_fails_pending_and_future_tasks() {
        let actor_id = new_actor_id(4);
        let submitter = ActorTaskSubmitter::new(caller());
        submitter.add_actor(actor_id);

        let rx = submitter
            .submit_task(actor_id, actor_task(&actor_id), 0)
            .unwrap();
        submitter.on_actor_dead(actor_id);

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_actor_died());

        let rx = submitter
            .submit_task(actor_id, actor_task(&actor_id), 0)
            .unwrap();
        assert!(rx.await.unwrap().unwrap_err().is_actor_died());
    }

    #[tokio::test]
    async fn test_transient_failure_buffers_idempotent_task() {
        let actor_id = new_actor_id(5);
        let submitter = ActorTaskSubmitter::new(caller());
        submitter.add_actor(actor_id);
        submitter.on_actor_alive(actor_id, Arc::new(DownWorker), 0);

        let rx = submitter
            .submit_task(actor_id, actor_task(&actor_id), 3)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // The task is buffered, waiting for a fresh address.
        assert_eq!(submitter.num_pending_tasks(&actor_id), 1);

        // The actor comes back healthy; the task goes through.
        let log = Arc::new(Mutex::new(Vec::new()));
        let receiver = spawn_incarnation(&actor_id, Arc::clone(&log)).await;
        submitter.on_actor_alive(actor_id, Arc::new(LoopbackWorker { receiver }), 1);
        rx.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_non_idempotent_task_not_retried() {
        let actor_id = new_actor_id(6);
        let submitter = ActorTaskSubmitter::new(caller());
        submitter.add_actor(actor_id);
        submitter.on_actor_alive(actor_id, Arc::new(DownWorker), 0);

        let mut spec = actor_task(&actor_id);
        spec.is_idempotent = false;
        let rx = submitter.submit_task(actor_id, spec, 3).unwrap();
        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_cancel_buffered_task() {
        let actor_id = new_actor_id(7);
        let submitter = ActorTaskSubmitter::new(caller());
        submitter.add_actor(actor_id);

        let spec = actor_task(&actor_id);
        let task_id = TaskID::try_from_binary(&spec.task_id);
        let rx = submitter.submit_task(actor_id, spec, 0).unwrap();

        submitter.cancel_task(&actor_id, &task_id);
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.code, tidal_common::status::StatusCode::SchedulingCancelled);
        assert_eq!(submitter.num_pending_tasks(&actor_id), 0);
    }
}
