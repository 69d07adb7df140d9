// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The caller-side actor handle registry.
//!
//! Keeps the `actor id → handle` cache refreshed from actor-table
//! notifications and drives the actor task submitter's connection state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use tidal_common::id::ActorID;
use tidal_proto::gcs::{ActorState, ActorTableData};

use crate::actor_handle::ActorHandle;
use crate::actor_task_submitter::{ActorTaskSubmitter, WorkerClient};

/// Builds worker transports from addresses (the RPC seam).
pub trait WorkerClientFactory: Send + Sync {
    fn client_for(&self, address: &tidal_proto::common::Address) -> Arc<dyn WorkerClient>;
}

/// Registry of actor handles held by this worker.
pub struct ActorHandleManager {
    handles: RwLock<HashMap<ActorID, ActorHandle>>,
    named: RwLock<HashMap<(String, String), ActorID>>,
    submitter: Arc<ActorTaskSubmitter>,
    client_factory: Arc<dyn WorkerClientFactory>,
}

impl ActorHandleManager {
    pub fn new(
        submitter: Arc<ActorTaskSubmitter>,
        client_factory: Arc<dyn WorkerClientFactory>,
    ) -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            named: RwLock::new(HashMap::new()),
            submitter,
            client_factory,
        }
    }

    pub fn register_handle(&self, handle: ActorHandle) {
        let actor_id = handle.actor_id();
        self.handles.write().insert(actor_id, handle);
        self.submitter.add_actor(actor_id);
    }

    pub fn register_named(&self, namespace: &str, name: &str, actor_id: ActorID) {
        self.named
            .write()
            .insert((namespace.to_string(), name.to_string()), actor_id);
    }

    pub fn get_handle(&self, actor_id: &ActorID) -> Option<ActorHandle> {
        self.handles.read().get(actor_id).cloned()
    }

    pub fn get_named(&self, namespace: &str, name: &str) -> Option<ActorID> {
        self.named
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .copied()
    }

    pub fn num_handles(&self) -> usize {
        self.handles.read().len()
    }

    /// Apply an actor-table notification: refresh the handle cache and move
    /// the submitter's connection state.
    pub fn on_actor_notification(&self, data: &ActorTableData) {
        let actor_id = ActorID::try_from_binary(&data.actor_id);
        if actor_id.is_nil() || !self.handles.read().contains_key(&actor_id) {
            return;
        }

        {
            let mut handles = self.handles.write();
            if let Some(handle) = handles.get_mut(&actor_id) {
                handle.update_address(data.address.clone(), data.num_restarts);
            }
        }

        match ActorState::try_from(data.state) {
            Ok(ActorState::Alive) => {
                if let Some(address) = &data.address {
                    let client = self.client_factory.client_for(address);
                    self.submitter
                        .on_actor_alive(actor_id, client, data.num_restarts);
                }
            }
            Ok(ActorState::Restarting) => self.submitter.on_actor_restarting(actor_id),
            Ok(ActorState::Dead) => {
                self.submitter.on_actor_dead(actor_id);
                if !data.name.is_empty() {
                    self.named
                        .write()
                        .remove(&(data.namespace.clone(), data.name.clone()));
                }
            }
            _ => {}
        }
    }
}
