// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The object manager: wires the local store, directory, pull and push
//! managers to the wire protocol (Push / Pull / FreeObjects).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use tidal_common::id::{NodeID, ObjectID};
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::object_manager::{FreeObjectsRequest, PullRequest, PushRequest};

use crate::common::{ObjectInfo, ObjectManagerConfig, ObjectSource};
use crate::object_buffer_pool::ObjectBufferPool;
use crate::object_directory::ObjectDirectory;
use crate::plasma::store::LocalObjectStore;
use crate::pull_manager::{PullCommand, PullManager, RequestId, RequestKind};
use crate::push_manager::PushManager;
use crate::spill::SpillManager;

/// Outbound transport to peer object managers. The production implementation
/// sends framed RPCs; tests wire peers together in process.
#[async_trait::async_trait]
pub trait ObjectManagerClient: Send + Sync {
    async fn push(&self, node_id: &NodeID, request: PushRequest) -> TidalResult<()>;
    async fn pull(&self, node_id: &NodeID, request: PullRequest) -> TidalResult<()>;
    async fn free_objects(&self, node_id: &NodeID, request: FreeObjectsRequest)
        -> TidalResult<()>;
}

/// Coordinates object transfers for one node.
pub struct ObjectManager {
    config: ObjectManagerConfig,
    node_id: NodeID,
    store: Arc<LocalObjectStore>,
    buffer_pool: ObjectBufferPool,
    directory: Mutex<ObjectDirectory>,
    pull_manager: Mutex<PullManager>,
    push_manager: Mutex<PushManager>,
    local_objects: Mutex<HashMap<ObjectID, ObjectInfo>>,
    /// Resolved or failed when a pull request completes.
    pull_watchers: Mutex<HashMap<RequestId, Vec<oneshot::Sender<TidalResult<()>>>>>,
    spill: Option<SpillManager>,
    client: Arc<dyn ObjectManagerClient>,
}

impl ObjectManager {
    pub fn new(
        config: ObjectManagerConfig,
        node_id: NodeID,
        store: Arc<LocalObjectStore>,
        client: Arc<dyn ObjectManagerClient>,
    ) -> Arc<Self> {
        let spill = if config.spill_directory.is_empty() {
            None
        } else {
            SpillManager::new(&config.spill_directory).ok()
        };

        let manager = Arc::new(Self {
            buffer_pool: ObjectBufferPool::new(Arc::clone(&store), config.object_chunk_size),
            pull_manager: Mutex::new(PullManager::new(
                config.object_store_memory.max(0) as u64,
                config.pull_timeout_ms,
            )),
            push_manager: Mutex::new(PushManager::new(
                config.max_bytes_in_flight,
                config.object_chunk_size,
            )),
            directory: Mutex::new(ObjectDirectory::new()),
            local_objects: Mutex::new(HashMap::new()),
            pull_watchers: Mutex::new(HashMap::new()),
            config,
            node_id,
            store,
            spill,
            client,
        });
        manager.attach_store_callbacks();
        manager
    }

    /// Hook store seal/delete events into the manager's bookkeeping.
    fn attach_store_callbacks(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.store.set_add_object_callback(Box::new(move |info| {
            if let Some(manager) = weak.upgrade() {
                manager.on_object_added(info.clone());
            }
        }));
        let weak: Weak<Self> = Arc::downgrade(self);
        self.store.set_delete_object_callback(Box::new(move |oid| {
            if let Some(manager) = weak.upgrade() {
                manager.on_object_deleted(oid);
            }
        }));
        if self.spill.is_some() {
            let weak: Weak<Self> = Arc::downgrade(self);
            self.store
                .set_spill_objects_callback(Arc::new(move |needed_bytes| {
                    match weak.upgrade() {
                        Some(manager) => manager.spill_objects(needed_bytes),
                        None => (0, Vec::new()),
                    }
                }));
        }
    }

    pub fn node_id(&self) -> &NodeID {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<LocalObjectStore> {
        &self.store
    }

    pub fn config(&self) -> &ObjectManagerConfig {
        &self.config
    }

    // ── local object lifecycle ──────────────────────────────────────────

    fn on_object_added(&self, info: ObjectInfo) {
        let object_id = info.object_id;
        let size = info.total_size();
        self.local_objects.lock().insert(object_id, info);
        self.directory
            .lock()
            .report_object_added(object_id, self.node_id, size);

        let completed = self.pull_manager.lock().on_object_local(&object_id);
        self.resolve_watchers(&completed, Ok(()));
    }

    fn on_object_deleted(&self, object_id: &ObjectID) {
        self.local_objects.lock().remove(object_id);
        self.directory
            .lock()
            .report_object_removed(object_id, &self.node_id);
    }

    pub fn is_object_local(&self, object_id: &ObjectID) -> bool {
        self.local_objects.lock().contains_key(object_id)
    }

    pub fn num_local_objects(&self) -> usize {
        self.local_objects.lock().len()
    }

    // ── pulls ───────────────────────────────────────────────────────────

    /// Request objects to be made local. Already-local ids are skipped; when
    /// everything is local the returned receiver resolves immediately.
    pub fn pull_objects(
        &self,
        object_ids: Vec<ObjectID>,
        kind: RequestKind,
    ) -> (RequestId, oneshot::Receiver<TidalResult<()>>) {
        let missing: Vec<ObjectID> = {
            let local = self.local_objects.lock();
            object_ids
                .into_iter()
                .filter(|oid| !local.contains_key(oid))
                .collect()
        };

        let (tx, rx) = oneshot::channel();
        if missing.is_empty() {
            let _ = tx.send(Ok(()));
            return (0, rx);
        }

        let request_id = self.pull_manager.lock().pull(missing, kind);
        self.pull_watchers
            .lock()
            .entry(request_id)
            .or_default()
            .push(tx);
        (request_id, rx)
    }

    /// Cancel a pull request.
    pub fn cancel_pull(&self, request_id: RequestId) {
        self.pull_manager.lock().cancel(request_id);
        self.pull_watchers.lock().remove(&request_id);
    }

    /// Feed a location update (from the directory subscription or the
    /// control service) into the pull manager.
    pub fn on_location_update(
        &self,
        object_id: &ObjectID,
        locations: Vec<NodeID>,
        spilled_url: String,
        object_size: u64,
        pending_creation: bool,
    ) {
        self.directory.lock().apply_location_update(
            *object_id,
            locations.iter().copied(),
            spilled_url.clone(),
            object_size,
        );
        let failed = self.pull_manager.lock().on_location_update(
            object_id,
            locations,
            spilled_url,
            object_size,
            pending_creation,
        );
        if !failed.is_empty() {
            for request_id in &failed {
                self.pull_manager.lock().cancel(*request_id);
            }
            self.resolve_watchers(
                &failed,
                Err(TidalError::object_lost(format!(
                    "object {} has no remaining copies and no spill URL",
                    object_id.hex()
                ))),
            );
        }
    }

    fn resolve_watchers(&self, request_ids: &[RequestId], result: TidalResult<()>) {
        let mut watchers = self.pull_watchers.lock();
        for request_id in request_ids {
            if let Some(senders) = watchers.remove(request_id) {
                for tx in senders {
                    let _ = tx.send(result.clone());
                }
            }
        }
    }

    /// Housekeeping: send due pulls, restore spilled objects, retry pushes.
    pub async fn tick(&self) {
        // Keep the pull budget in sync with store occupancy.
        let capacity = self.config.object_store_memory.max(0) as u64;
        let in_use = self.store.bytes_in_use().max(0) as u64;
        let commands = {
            let mut pull = self.pull_manager.lock();
            pull.set_available_memory(capacity.saturating_sub(in_use));
            pull.tick(tidal_util::time::current_time_ms())
        };

        for command in commands {
            match command {
                PullCommand::SendPull { object_id, node_id } => {
                    let request = PullRequest {
                        object_id: object_id.binary(),
                        requester_node_id: self.node_id.binary(),
                    };
                    if let Err(err) = self.client.pull(&node_id, request).await {
                        tracing::debug!(
                            object_id = %object_id.hex(),
                            node_id = %node_id.hex(),
                            error = %err,
                            "pull send failed; will retry"
                        );
                    }
                }
                PullCommand::Restore { object_id, url } => {
                    self.restore_spilled(&object_id, &url);
                }
            }
        }
    }

    fn restore_spilled(&self, object_id: &ObjectID, url: &str) {
        let Some(spill) = &self.spill else {
            tracing::warn!(object_id = %object_id.hex(), "no spill manager configured");
            return;
        };
        match spill.restore_object(url) {
            Ok((metadata, data)) => {
                let info = ObjectInfo {
                    object_id: *object_id,
                    data_size: data.len() as u64,
                    metadata_size: metadata.len() as u64,
                    ..Default::default()
                };
                let restore = || -> Result<(), crate::common::PlasmaError> {
                    self.store.create(info, ObjectSource::RestoredFromStorage)?;
                    self.store.write_metadata(object_id, &metadata)?;
                    self.store.write_data_at(object_id, 0, &data)?;
                    self.store.seal(object_id)?;
                    Ok(())
                };
                if let Err(err) = restore() {
                    tracing::warn!(object_id = %object_id.hex(), error = %err, "restore failed");
                    let _ = self.store.abort_create(object_id);
                }
            }
            Err(err) => {
                tracing::warn!(object_id = %object_id.hex(), error = %err, "spill restore failed");
            }
        }
    }

    // ── pushes ──────────────────────────────────────────────────────────

    /// Queue a push of a local object and drain its chunks.
    pub async fn push_object(&self, object_id: ObjectID, node_id: NodeID) -> TidalResult<()> {
        let info = self
            .local_objects
            .lock()
            .get(&object_id)
            .cloned()
            .ok_or_else(|| {
                TidalError::object_not_found(format!("{} is not local", object_id.hex()))
            })?;

        self.push_manager.lock().queue_push(
            node_id,
            object_id,
            info.total_size(),
            tidal_util::time::current_time_ms(),
        );
        self.drain_pushes().await;
        Ok(())
    }

    /// Send every chunk the push manager hands out until the in-flight cap
    /// stops it or all pushes complete.
    pub async fn drain_pushes(&self) {
        loop {
            let chunks = self.push_manager.lock().next_chunks();
            if chunks.is_empty() {
                break;
            }
            for chunk in chunks {
                let info = self.local_objects.lock().get(&chunk.object_id).cloned();
                let Some(info) = info else {
                    // Object evicted mid-push; abandon.
                    self.push_manager
                        .lock()
                        .cancel_push(&chunk.node_id, &chunk.object_id);
                    continue;
                };

                let offset = (chunk.chunk_index * self.config.object_chunk_size) as usize;
                let data = match self.store.read_chunk(
                    &chunk.object_id,
                    offset,
                    chunk.chunk_len as usize,
                ) {
                    Ok(data) => data,
                    Err(_) => {
                        self.push_manager
                            .lock()
                            .cancel_push(&chunk.node_id, &chunk.object_id);
                        continue;
                    }
                };

                let request = PushRequest {
                    push_id: tidal_util::random::random_bytes(16),
                    object_id: chunk.object_id.binary(),
                    owner_address: None,
                    sender_node_id: self.node_id.binary(),
                    data_size: info.data_size,
                    metadata_size: info.metadata_size,
                    chunk_index: chunk.chunk_index,
                    data,
                };

                match self.client.push(&chunk.node_id, request).await {
                    Ok(()) => {
                        self.push_manager.lock().on_chunk_complete(
                            chunk.node_id,
                            chunk.object_id,
                            chunk.chunk_len,
                        );
                    }
                    Err(err) => {
                        tracing::debug!(
                            object_id = %chunk.object_id.hex(),
                            error = %err,
                            "chunk send failed"
                        );
                        let escalated = self.push_manager.lock().on_chunk_failed(
                            chunk.node_id,
                            chunk.object_id,
                            chunk.chunk_len,
                        );
                        if escalated {
                            tracing::warn!(
                                object_id = %chunk.object_id.hex(),
                                node_id = %chunk.node_id.hex(),
                                "push failed after repeated chunk errors"
                            );
                        }
                    }
                }
            }
        }
    }

    // ── wire handlers ───────────────────────────────────────────────────

    /// A chunk arrived from a peer.
    pub fn handle_push(&self, request: PushRequest) -> TidalResult<()> {
        let object_id = ObjectID::try_from_binary(&request.object_id);
        if object_id.is_nil() {
            return Err(TidalError::invalid_argument("bad object id in push"));
        }
        if self.is_object_local(&object_id) {
            // Receiver no longer wants it; silently drop the chunk.
            return Ok(());
        }
        let info = ObjectInfo {
            object_id,
            data_size: request.data_size,
            metadata_size: request.metadata_size,
            ..Default::default()
        };
        match self
            .buffer_pool
            .write_chunk(&info, request.chunk_index, &request.data)
        {
            Ok(_complete) => Ok(()),
            Err(err) => {
                self.buffer_pool.abort_create(&object_id);
                Err(TidalError::io_error(format!(
                    "chunk write for {} failed: {err}",
                    object_id.hex()
                )))
            }
        }
    }

    /// A peer asked for an object; start pushing if we have it.
    pub async fn handle_pull(&self, request: PullRequest) -> TidalResult<()> {
        let object_id = ObjectID::try_from_binary(&request.object_id);
        let requester = NodeID::try_from_binary(&request.requester_node_id);
        if object_id.is_nil() || requester.is_nil() {
            return Err(TidalError::invalid_argument("bad ids in pull request"));
        }
        if !self.is_object_local(&object_id) {
            return Err(TidalError::object_not_found(format!(
                "{} is not local to {}",
                object_id.hex(),
                self.node_id.hex()
            )));
        }
        self.push_object(object_id, requester).await
    }

    /// Free objects locally; optionally fan out to every node known to hold
    /// a copy. The fan-out is fire-and-forget.
    pub async fn free_objects(&self, object_ids: &[ObjectID], local_only: bool) {
        self.store.delete(object_ids);

        if !local_only {
            let mut by_node: HashMap<NodeID, Vec<Vec<u8>>> = HashMap::new();
            {
                let directory = self.directory.lock();
                for oid in object_ids {
                    for node in directory.get_node_ids(oid) {
                        if node != self.node_id {
                            by_node.entry(node).or_default().push(oid.binary());
                        }
                    }
                }
            }
            for (node, ids) in by_node {
                let request = FreeObjectsRequest { object_ids: ids };
                if let Err(err) = self.client.free_objects(&node, request).await {
                    tracing::debug!(node_id = %node.hex(), error = %err, "free fan-out failed");
                }
            }
        }
        if let Some(spill) = &self.spill {
            for oid in object_ids {
                spill.delete_spilled(oid);
            }
        }
    }

    /// A peer told us to free objects.
    pub fn handle_free_objects(&self, request: FreeObjectsRequest) {
        let ids: Vec<ObjectID> = request
            .object_ids
            .iter()
            .map(|b| ObjectID::try_from_binary(b))
            .filter(|oid| !oid.is_nil())
            .collect();
        self.store.delete(&ids);
    }

    /// Spill the coldest local objects until `needed_bytes` are freed.
    /// Returns (bytes spilled, spilled ids with URLs). Used as the store's
    /// spill callback.
    pub fn spill_objects(&self, needed_bytes: u64) -> (u64, Vec<(ObjectID, String)>) {
        let Some(spill) = &self.spill else {
            return (0, Vec::new());
        };

        let candidates: Vec<ObjectInfo> = {
            let local = self.local_objects.lock();
            local.values().cloned().collect()
        };

        let mut spilled = Vec::new();
        let mut bytes_spilled = 0u64;
        for info in candidates {
            if bytes_spilled >= needed_bytes {
                break;
            }
            let oid = info.object_id;
            let buffers = match self.store.read_chunk(&oid, 0, info.total_size() as usize) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let metadata_len = info.metadata_size as usize;
            let (metadata, data) = buffers.split_at(metadata_len);
            match spill.spill_object(&oid, metadata, data) {
                Ok(url) => {
                    bytes_spilled += info.total_size();
                    self.directory
                        .lock()
                        .report_object_spilled(oid, url.clone(), self.node_id);
                    spilled.push((oid, url));
                }
                Err(err) => {
                    tracing::warn!(object_id = %oid.hex(), error = %err, "spill failed");
                }
            }
        }
        (bytes_spilled, spilled)
    }

    pub fn num_active_pulls(&self) -> usize {
        self.pull_manager.lock().num_active_requests()
    }

    pub fn num_active_pushes(&self) -> usize {
        self.push_manager.lock().num_active_pushes()
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.push_manager.lock().bytes_in_flight()
    }

    /// Directory lookup, mainly for tests and debugging.
    pub fn object_locations(&self, object_id: &ObjectID) -> Vec<NodeID> {
        self.directory.lock().get_node_ids(object_id)
    }
}
