// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Actor lifecycle management.
//!
//! The state machine:
//!
//! ```text
//! DEPENDENCIES_UNREADY → PENDING_CREATION → ALIVE ⇄ RESTARTING
//!                                             │
//!                                             └──→ DEAD
//! ```
//!
//! Every transition is write-then-publish on the actor channel, so callers
//! can refresh their `actor id → address` caches. An actor whose worker or
//! node dies restarts while `max_restarts` allows (-1 = unlimited),
//! otherwise a tombstone is published and pending callers get `ActorDied`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::oneshot;

use tidal_common::id::{ActorID, JobID, NodeID};
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::gcs::{ActorState, ActorTableData, CreateActorReply, PubMessage};
use tidal_proto::task::TaskSpec;

use crate::actor_scheduler::ActorScheduler;
use crate::pubsub_handler::{ChannelType, PubSubHandler};
use crate::table_storage::GcsTableStorage;

type CreateCallback = oneshot::Sender<TidalResult<CreateActorReply>>;

/// The control service's actor table and lifecycle driver.
pub struct GcsActorManager {
    registered_actors: RwLock<HashMap<ActorID, ActorTableData>>,
    dead_actors: RwLock<HashMap<ActorID, ActorTableData>>,
    named_actors: RwLock<HashMap<(String, String), ActorID>>,
    actors_by_node: RwLock<HashMap<NodeID, Vec<ActorID>>>,
    /// Creation task specs kept for (re)scheduling.
    actor_task_specs: RwLock<HashMap<ActorID, TaskSpec>>,
    create_callbacks: RwLock<HashMap<ActorID, Vec<CreateCallback>>>,
    table_storage: Arc<GcsTableStorage>,
    pubsub: Arc<PubSubHandler>,
    scheduler: Arc<dyn ActorScheduler>,
}

impl GcsActorManager {
    pub fn new(
        table_storage: Arc<GcsTableStorage>,
        pubsub: Arc<PubSubHandler>,
        scheduler: Arc<dyn ActorScheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registered_actors: RwLock::new(HashMap::new()),
            dead_actors: RwLock::new(HashMap::new()),
            named_actors: RwLock::new(HashMap::new()),
            actors_by_node: RwLock::new(HashMap::new()),
            actor_task_specs: RwLock::new(HashMap::new()),
            create_callbacks: RwLock::new(HashMap::new()),
            table_storage,
            pubsub,
            scheduler,
        })
    }

    /// Load persisted actors after a control-service restart.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        let rows = self
            .table_storage
            .actor_table()
            .get_all()
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let mut registered = self.registered_actors.write();
        let mut dead = self.dead_actors.write();
        let mut named = self.named_actors.write();
        for (key, actor) in rows {
            let actor_id = ActorID::from_hex(&key);
            if actor.state == ActorState::Dead as i32 {
                dead.insert(actor_id, actor);
            } else {
                if !actor.name.is_empty() {
                    named.insert((actor.namespace.clone(), actor.name.clone()), actor_id);
                }
                registered.insert(actor_id, actor);
            }
        }
        Ok(())
    }

    /// Register an actor from its creation task spec.
    pub async fn register_actor(&self, task_spec: &TaskSpec) -> TidalResult<ActorID> {
        let creation = task_spec
            .actor_creation_task_spec
            .as_ref()
            .ok_or_else(|| TidalError::invalid_argument("missing actor creation spec"))?;
        let actor_id = ActorID::try_from_binary(&creation.actor_id);
        if actor_id.is_nil() {
            return Err(TidalError::invalid_argument("bad actor id"));
        }

        if !creation.name.is_empty() {
            let key = (creation.namespace.clone(), creation.name.clone());
            if self.named_actors.read().contains_key(&key) {
                return Err(TidalError::already_exists(format!(
                    "actor named '{}' already exists in namespace '{}'",
                    creation.name, creation.namespace
                )));
            }
        }

        let row = ActorTableData {
            actor_id: creation.actor_id.clone(),
            state: ActorState::DependenciesUnready as i32,
            name: creation.name.clone(),
            namespace: creation.namespace.clone(),
            max_restarts: creation.max_restarts,
            is_detached: creation.is_detached,
            ..Default::default()
        };
        self.write_and_publish(actor_id, row.clone()).await;

        if !creation.name.is_empty() {
            self.named_actors
                .write()
                .insert((creation.namespace.clone(), creation.name.clone()), actor_id);
        }
        self.registered_actors.write().insert(actor_id, row);
        self.actor_task_specs
            .write()
            .insert(actor_id, task_spec.clone());

        tracing::info!(actor_id = %actor_id.hex(), "actor registered");
        Ok(actor_id)
    }

    /// Start creating an actor: transition to PENDING_CREATION, schedule it,
    /// and return a receiver resolving once it is ALIVE (or dead).
    pub async fn create_actor(
        self: &Arc<Self>,
        task_spec: &TaskSpec,
    ) -> TidalResult<oneshot::Receiver<TidalResult<CreateActorReply>>> {
        let creation = task_spec
            .actor_creation_task_spec
            .as_ref()
            .ok_or_else(|| TidalError::invalid_argument("missing actor creation spec"))?;
        let actor_id = ActorID::try_from_binary(&creation.actor_id);

        if !self.registered_actors.read().contains_key(&actor_id) {
            self.register_actor(task_spec).await?;
        }

        let row = self
            .transition(&actor_id, ActorState::PendingCreation, |_| {})
            .await
            .ok_or_else(|| {
                TidalError::not_found(format!("actor {} not registered", actor_id.hex()))
            })?;
        debug_assert_eq!(row.state, ActorState::PendingCreation as i32);

        let (tx, rx) = oneshot::channel();
        self.create_callbacks
            .write()
            .entry(actor_id)
            .or_default()
            .push(tx);

        let manager = Arc::clone(self);
        let spec = task_spec.clone();
        tokio::spawn(async move {
            manager.schedule_actor(actor_id, spec).await;
        });

        Ok(rx)
    }

    async fn schedule_actor(self: Arc<Self>, actor_id: ActorID, task_spec: TaskSpec) {
        match self.scheduler.schedule(&task_spec).await {
            Ok(placement) => {
                let node_id = placement.node_id;
                let address = placement.worker_address.clone();
                let row = self
                    .transition(&actor_id, ActorState::Alive, |row| {
                        row.address = Some(placement.worker_address.clone());
                        row.node_id = placement.node_id.binary();
                        row.pid = placement.worker_pid;
                    })
                    .await;

                if row.is_some() {
                    self.actors_by_node
                        .write()
                        .entry(node_id)
                        .or_default()
                        .push(actor_id);
                    self.resolve_callbacks(
                        &actor_id,
                        Ok(CreateActorReply {
                            actor_id: actor_id.binary(),
                            actor_address: Some(address),
                        }),
                    );
                    tracing::info!(actor_id = %actor_id.hex(), node_id = %node_id.hex(), "actor is ALIVE");
                }
            }
            Err(err) if err.is_transient() => {
                // Leave the actor pending; the caller retries creation.
                tracing::warn!(actor_id = %actor_id.hex(), error = %err, "actor scheduling deferred");
                self.resolve_callbacks(&actor_id, Err(err));
            }
            Err(err) => {
                tracing::warn!(actor_id = %actor_id.hex(), error = %err, "actor scheduling failed");
                self.mark_dead(&actor_id, format!("scheduling failed: {err}"))
                    .await;
            }
        }
    }

    /// The worker hosting an actor died. Restart while the budget lasts,
    /// otherwise the actor dies.
    pub async fn on_worker_dead(self: &Arc<Self>, actor_id: &ActorID) {
        let (can_restart, num_restarts, node_id) = {
            let registered = self.registered_actors.read();
            match registered.get(actor_id) {
                Some(row) if row.state == ActorState::Alive as i32 => {
                    let can = row.max_restarts == -1 || (row.num_restarts as i64) < row.max_restarts;
                    (can, row.num_restarts, NodeID::try_from_binary(&row.node_id))
                }
                _ => return,
            }
        };

        // Either way the actor leaves its node; its placement's resources
        // go back before anything new is booked.
        self.detach_from_node(actor_id);
        self.return_placement(actor_id, &node_id);

        if !can_restart {
            self.mark_dead(actor_id, "restarts exhausted".to_string())
                .await;
            return;
        }

        let row = self
            .transition(actor_id, ActorState::Restarting, |row| {
                row.num_restarts = num_restarts + 1;
                row.address = None;
                row.node_id = Vec::new();
            })
            .await;
        if row.is_none() {
            return;
        }
        tracing::info!(
            actor_id = %actor_id.hex(),
            restart = num_restarts + 1,
            "actor restarting"
        );

        let spec = self.actor_task_specs.read().get(actor_id).cloned();
        if let Some(spec) = spec {
            let manager = Arc::clone(self);
            let actor_id = *actor_id;
            tokio::spawn(async move {
                manager.schedule_actor(actor_id, spec).await;
            });
        }
    }

    /// A node died: every actor on it is restarted or killed.
    pub async fn on_node_dead(self: &Arc<Self>, node_id: &NodeID) {
        let actor_ids = self
            .actors_by_node
            .read()
            .get(node_id)
            .cloned()
            .unwrap_or_default();
        for actor_id in actor_ids {
            self.on_worker_dead(&actor_id).await;
        }
        self.actors_by_node.write().remove(node_id);
    }

    /// A job finished: its non-detached actors die with it.
    pub async fn on_job_dead(self: &Arc<Self>, job_id: &JobID) {
        let victims: Vec<ActorID> = {
            let registered = self.registered_actors.read();
            registered
                .iter()
                .filter(|(actor_id, row)| {
                    actor_id.job_id() == *job_id && !row.is_detached
                })
                .map(|(actor_id, _)| *actor_id)
                .collect()
        };
        for actor_id in victims {
            self.detach_from_node(&actor_id);
            self.mark_dead(&actor_id, "creating job finished".to_string())
                .await;
        }
    }

    /// Kill an actor. `no_restart` forces a tombstone regardless of the
    /// restart budget; otherwise the kill behaves like a worker failure.
    pub async fn kill_actor(self: &Arc<Self>, actor_id: &ActorID, no_restart: bool) -> bool {
        if !self.registered_actors.read().contains_key(actor_id) {
            return false;
        }
        if no_restart {
            self.detach_from_node(actor_id);
            self.mark_dead(actor_id, "killed".to_string()).await;
        } else {
            self.on_worker_dead(actor_id).await;
        }
        true
    }

    async fn mark_dead(&self, actor_id: &ActorID, cause: String) {
        let row = {
            let mut registered = self.registered_actors.write();
            match registered.remove(actor_id) {
                Some(mut row) => {
                    row.state = ActorState::Dead as i32;
                    row.death_cause = cause;
                    row.address = None;
                    Some(row)
                }
                None => None,
            }
        };
        let Some(mut row) = row else { return };

        // An actor dying in place returns its node's resources; paths that
        // already returned them cleared the assignment first.
        let node_id = NodeID::try_from_binary(&row.node_id);
        self.return_placement(actor_id, &node_id);
        row.node_id = Vec::new();

        if !row.name.is_empty() {
            self.named_actors
                .write()
                .remove(&(row.namespace.clone(), row.name.clone()));
        }
        self.actor_task_specs.write().remove(actor_id);
        self.write_and_publish(*actor_id, row.clone()).await;
        self.dead_actors.write().insert(*actor_id, row);

        self.resolve_callbacks(
            actor_id,
            Err(TidalError::actor_died(format!(
                "actor {} is dead",
                actor_id.hex()
            ))),
        );
        tracing::info!(actor_id = %actor_id.hex(), "actor is DEAD");
    }

    fn detach_from_node(&self, actor_id: &ActorID) {
        let mut by_node = self.actors_by_node.write();
        for actors in by_node.values_mut() {
            actors.retain(|a| a != actor_id);
        }
    }

    /// Return the resources booked for an actor's placement on `node_id`
    /// and clear the assignment so nothing returns them twice.
    fn return_placement(&self, actor_id: &ActorID, node_id: &NodeID) {
        if node_id.is_nil() {
            return;
        }
        let spec = self.actor_task_specs.read().get(actor_id).cloned();
        if let Some(spec) = spec {
            self.scheduler.on_actor_stopped(node_id, &spec);
        }
        let mut registered = self.registered_actors.write();
        if let Some(row) = registered.get_mut(actor_id) {
            row.node_id = Vec::new();
        }
    }

    /// Apply a state transition, persist, publish, and return the new row.
    async fn transition(
        &self,
        actor_id: &ActorID,
        state: ActorState,
        mutate: impl FnOnce(&mut ActorTableData),
    ) -> Option<ActorTableData> {
        let row = {
            let mut registered = self.registered_actors.write();
            let row = registered.get_mut(actor_id)?;
            row.state = state as i32;
            mutate(row);
            row.clone()
        };
        self.write_and_publish(*actor_id, row.clone()).await;
        Some(row)
    }

    async fn write_and_publish(&self, actor_id: ActorID, row: ActorTableData) {
        if let Err(e) = self
            .table_storage
            .actor_table()
            .put(&actor_id.hex(), &row)
            .await
        {
            tracing::warn!(actor_id = %actor_id.hex(), error = %e, "actor table write failed");
        }
        self.pubsub.publish(PubMessage {
            channel_type: ChannelType::Actor as i32,
            key_id: actor_id.binary(),
            sequence_id: 0,
            inner_message: Some(tidal_proto::gcs::pub_message::InnerMessage::ActorMessage(
                row,
            )),
        });
    }

    fn resolve_callbacks(&self, actor_id: &ActorID, result: TidalResult<CreateActorReply>) {
        if let Some(callbacks) = self.create_callbacks.write().remove(actor_id) {
            for tx in callbacks {
                let _ = tx.send(result.clone());
            }
        }
    }

    // ── queries ─────────────────────────────────────────────────────────

    pub fn get_actor(&self, actor_id: &ActorID) -> Option<ActorTableData> {
        self.registered_actors
            .read()
            .get(actor_id)
            .cloned()
            .or_else(|| self.dead_actors.read().get(actor_id).cloned())
    }

    pub fn get_named_actor(&self, namespace: &str, name: &str) -> Option<ActorTableData> {
        let actor_id = *self
            .named_actors
            .read()
            .get(&(namespace.to_string(), name.to_string()))?;
        self.registered_actors.read().get(&actor_id).cloned()
    }

    pub fn list_actors(&self, state_filter: Option<ActorState>) -> Vec<ActorTableData> {
        let registered = self.registered_actors.read();
        let dead = self.dead_actors.read();
        registered
            .values()
            .chain(dead.values())
            .filter(|row| {
                state_filter.is_none_or(|state| row.state == state as i32)
            })
            .cloned()
            .collect()
    }

    pub fn num_registered_actors(&self) -> usize {
        self.registered_actors.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor_scheduler::ActorPlacement;
    use crate::store_client::InMemoryStoreClient;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tidal_common::id::{TaskID, WorkerID};
    use tidal_proto::common::Address;
    use tidal_proto::task::ActorCreationTaskSpec;

    /// Scheduler stub: succeeds on a fixed node, optionally failing first.
    struct StubScheduler {
        node_id: NodeID,
        schedule_calls: AtomicUsize,
        fail_permanently: AtomicBool,
    }

    impl StubScheduler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                node_id: NodeID::from_random(),
                schedule_calls: AtomicUsize::new(0),
                fail_permanently: AtomicBool::new(false),
            })
        }
    }

    #[async_trait::async_trait]
    impl ActorScheduler for StubScheduler {
        async fn schedule(&self, _task_spec: &TaskSpec) -> TidalResult<ActorPlacement> {
            self.schedule_calls.fetch_add(1, Ordering::Relaxed);
            if self.fail_permanently.load(Ordering::Relaxed) {
                return Err(TidalError::infeasible("nothing fits"));
            }
            Ok(ActorPlacement {
                node_id: self.node_id,
                worker_address: Address {
                    node_id: self.node_id.binary(),
                    ip_address: "127.0.0.1".to_string(),
                    port: 7001,
                    worker_id: WorkerID::from_random().binary(),
                },
                worker_pid: 99,
            })
        }
    }

    fn make_manager(scheduler: Arc<StubScheduler>) -> Arc<GcsActorManager> {
        GcsActorManager::new(
            Arc::new(GcsTableStorage::new(Arc::new(InMemoryStoreClient::new()))),
            Arc::new(PubSubHandler::new()),
            scheduler,
        )
    }

    fn actor_spec(actor_id: &ActorID, max_restarts: i64, name: &str, detached: bool) -> TaskSpec {
        TaskSpec {
            task_id: TaskID::for_actor_creation_task(actor_id).binary(),
            actor_creation_task_spec: Some(ActorCreationTaskSpec {
                actor_id: actor_id.binary(),
                max_restarts,
                name: name.to_string(),
                namespace: "default".to_string(),
                is_detached: detached,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn new_actor_id(job: u32, counter: usize) -> ActorID {
        ActorID::of(&JobID::from_int(job), &TaskID::nil(), counter)
    }

    #[tokio::test]
    async fn test_create_actor_reaches_alive() {
        let scheduler = StubScheduler::new();
        let manager = make_manager(Arc::clone(&scheduler));
        let actor_id = new_actor_id(1, 0);

        let rx = manager
            .create_actor(&actor_spec(&actor_id, 0, "", false))
            .await
            .unwrap();
        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.actor_id, actor_id.binary());
        assert!(reply.actor_address.is_some());

        let row = manager.get_actor(&actor_id).unwrap();
        assert_eq!(row.state, ActorState::Alive as i32);
    }

    #[tokio::test]
    async fn test_transitions_are_published() {
        let scheduler = StubScheduler::new();
        let manager = make_manager(Arc::clone(&scheduler));
        let mut rx = manager.pubsub.subscribe(ChannelType::Actor);
        let actor_id = new_actor_id(1, 1);

        let done = manager
            .create_actor(&actor_spec(&actor_id, 0, "", false))
            .await
            .unwrap();
        done.await.unwrap().unwrap();

        let mut states = Vec::new();
        while let Ok(msg) =
            tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await
        {
            if let Some(tidal_proto::gcs::pub_message::InnerMessage::ActorMessage(row)) =
                msg.unwrap().inner_message
            {
                states.push(row.state);
            }
            if states.last() == Some(&(ActorState::Alive as i32)) {
                break;
            }
        }
        assert_eq!(
            states,
            vec![
                ActorState::DependenciesUnready as i32,
                ActorState::PendingCreation as i32,
                ActorState::Alive as i32,
            ]
        );
    }

    #[tokio::test]
    async fn test_restart_within_budget() {
        let scheduler = StubScheduler::new();
        let manager = make_manager(Arc::clone(&scheduler));
        let actor_id = new_actor_id(1, 2);

        let rx = manager
            .create_actor(&actor_spec(&actor_id, 1, "", false))
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        manager.on_worker_dead(&actor_id).await;
        // The restart is scheduled asynchronously.
        tidal_test_utils::wait_for_condition(
            || manager.get_actor(&actor_id).unwrap().state == ActorState::Alive as i32,
            std::time::Duration::from_secs(2),
        )
        .await;

        let row = manager.get_actor(&actor_id).unwrap();
        assert_eq!(row.num_restarts, 1);
        assert_eq!(scheduler.schedule_calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_restarts_exhausted_means_dead() {
        let scheduler = StubScheduler::new();
        let manager = make_manager(Arc::clone(&scheduler));
        let actor_id = new_actor_id(1, 3);

        let rx = manager
            .create_actor(&actor_spec(&actor_id, 1, "", false))
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        manager.on_worker_dead(&actor_id).await;
        tidal_test_utils::wait_for_condition(
            || manager.get_actor(&actor_id).unwrap().state == ActorState::Alive as i32,
            std::time::Duration::from_secs(2),
        )
        .await;

        // Second failure exceeds max_restarts = 1.
        manager.on_worker_dead(&actor_id).await;
        let row = manager.get_actor(&actor_id).unwrap();
        assert_eq!(row.state, ActorState::Dead as i32);
        assert_eq!(row.death_cause, "restarts exhausted");
    }

    #[tokio::test]
    async fn test_unlimited_restarts() {
        let scheduler = StubScheduler::new();
        let manager = make_manager(Arc::clone(&scheduler));
        let actor_id = new_actor_id(1, 4);

        let rx = manager
            .create_actor(&actor_spec(&actor_id, -1, "", false))
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        for restart in 1..=3u64 {
            manager.on_worker_dead(&actor_id).await;
            tidal_test_utils::wait_for_condition(
                || {
                    let row = manager.get_actor(&actor_id).unwrap();
                    row.state == ActorState::Alive as i32 && row.num_restarts == restart
                },
                std::time::Duration::from_secs(2),
            )
            .await;
        }
    }

    #[tokio::test]
    async fn test_kill_no_restart_tombstones() {
        let scheduler = StubScheduler::new();
        let manager = make_manager(Arc::clone(&scheduler));
        let actor_id = new_actor_id(1, 5);

        let rx = manager
            .create_actor(&actor_spec(&actor_id, -1, "", false))
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        assert!(manager.kill_actor(&actor_id, true).await);
        let row = manager.get_actor(&actor_id).unwrap();
        assert_eq!(row.state, ActorState::Dead as i32);
    }

    #[tokio::test]
    async fn test_named_actor_registry() {
        let scheduler = StubScheduler::new();
        let manager = make_manager(Arc::clone(&scheduler));
        let actor_id = new_actor_id(1, 6);

        let rx = manager
            .create_actor(&actor_spec(&actor_id, 0, "singleton", false))
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        assert!(manager.get_named_actor("default", "singleton").is_some());
        assert!(manager.get_named_actor("other", "singleton").is_none());

        // Second actor with the same name is rejected.
        let dup = new_actor_id(1, 7);
        let err = manager
            .register_actor(&actor_spec(&dup, 0, "singleton", false))
            .await
            .unwrap_err();
        assert_eq!(err.code, tidal_common::status::StatusCode::AlreadyExists);

        // The name frees up once the actor dies.
        manager.kill_actor(&actor_id, true).await;
        assert!(manager.get_named_actor("default", "singleton").is_none());
    }

    #[tokio::test]
    async fn test_detached_actor_survives_job_death() {
        let scheduler = StubScheduler::new();
        let manager = make_manager(Arc::clone(&scheduler));
        let job = JobID::from_int(7);
        let detached_id = ActorID::of(&job, &TaskID::nil(), 0);
        let plain_id = ActorID::of(&job, &TaskID::nil(), 1);

        for (id, detached) in [(&detached_id, true), (&plain_id, false)] {
            let rx = manager
                .create_actor(&actor_spec(id, 0, "", detached))
                .await
                .unwrap();
            rx.await.unwrap().unwrap();
        }

        manager.on_job_dead(&job).await;
        assert_eq!(
            manager.get_actor(&plain_id).unwrap().state,
            ActorState::Dead as i32
        );
        assert_eq!(
            manager.get_actor(&detached_id).unwrap().state,
            ActorState::Alive as i32
        );
    }

    #[tokio::test]
    async fn test_infeasible_creation_dies() {
        let scheduler = StubScheduler::new();
        scheduler.fail_permanently.store(true, Ordering::Relaxed);
        let manager = make_manager(Arc::clone(&scheduler));
        let actor_id = new_actor_id(1, 8);

        let rx = manager
            .create_actor(&actor_spec(&actor_id, 0, "", false))
            .await
            .unwrap();
        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_actor_died());
        assert_eq!(
            manager.get_actor(&actor_id).unwrap().state,
            ActorState::Dead as i32
        );
    }

    #[tokio::test]
    async fn test_node_death_fans_out() {
        let scheduler = StubScheduler::new();
        let manager = make_manager(Arc::clone(&scheduler));
        let a1 = new_actor_id(2, 0);
        let a2 = new_actor_id(2, 1);

        for id in [&a1, &a2] {
            let rx = manager
                .create_actor(&actor_spec(id, 0, "", false))
                .await
                .unwrap();
            rx.await.unwrap().unwrap();
        }

        manager.on_node_dead(&scheduler.node_id).await;
        for id in [&a1, &a2] {
            assert_eq!(
                manager.get_actor(id).unwrap().state,
                ActorState::Dead as i32
            );
        }
    }
}
