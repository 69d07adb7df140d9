// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Durable per-barrier snapshots.
//!
//! For each barrier the producer persists `(barrier_id, first_msg_id,
//! last_msg_id)` keyed `<channel_hex>_<checkpoint_id>` under the checkpoint
//! root. Recovery reads the highest checkpoint back to resume numbering.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use prost::Message;

use tidal_common::id::ChannelID;
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::streaming::BarrierSnapshot;

/// Persistence for barrier snapshots.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, channel_id: &ChannelID, snapshot: &BarrierSnapshot) -> TidalResult<()>;
    fn load(&self, channel_id: &ChannelID, barrier_id: u64) -> TidalResult<Option<BarrierSnapshot>>;
    /// The snapshot with the highest barrier id, if any.
    fn load_latest(&self, channel_id: &ChannelID) -> TidalResult<Option<BarrierSnapshot>>;
    fn delete_up_to(&self, channel_id: &ChannelID, barrier_id: u64) -> TidalResult<()>;
}

// ── file-backed store ───────────────────────────────────────────────────

/// Snapshot blobs under a directory root.
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> TidalResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| TidalError::io_error(format!("create checkpoint root: {e}")))?;
        Ok(Self { root })
    }

    fn path_for(&self, channel_id: &ChannelID, barrier_id: u64) -> PathBuf {
        self.root.join(format!("{}_{}", channel_id.hex(), barrier_id))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, channel_id: &ChannelID, snapshot: &BarrierSnapshot) -> TidalResult<()> {
        let path = self.path_for(channel_id, snapshot.barrier_id);
        fs::write(&path, snapshot.encode_to_vec())
            .map_err(|e| TidalError::io_error(format!("write checkpoint: {e}")))
    }

    fn load(&self, channel_id: &ChannelID, barrier_id: u64) -> TidalResult<Option<BarrierSnapshot>> {
        let path = self.path_for(channel_id, barrier_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(BarrierSnapshot::decode(bytes.as_slice()).map_err(
                |e| TidalError::io_error(format!("decode checkpoint: {e}")),
            )?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TidalError::io_error(format!("read checkpoint: {e}"))),
        }
    }

    fn load_latest(&self, channel_id: &ChannelID) -> TidalResult<Option<BarrierSnapshot>> {
        let prefix = format!("{}_", channel_id.hex());
        let mut latest: Option<BarrierSnapshot> = None;
        let entries = fs::read_dir(&self.root)
            .map_err(|e| TidalError::io_error(format!("read checkpoint root: {e}")))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id_str) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Ok(barrier_id) = id_str.parse::<u64>() else {
                continue;
            };
            if latest.as_ref().is_none_or(|s| barrier_id > s.barrier_id) {
                if let Some(snapshot) = self.load(channel_id, barrier_id)? {
                    latest = Some(snapshot);
                }
            }
        }
        Ok(latest)
    }

    fn delete_up_to(&self, channel_id: &ChannelID, barrier_id: u64) -> TidalResult<()> {
        for id in 0..=barrier_id {
            let _ = fs::remove_file(self.path_for(channel_id, id));
        }
        Ok(())
    }
}

// ── in-memory store ─────────────────────────────────────────────────────

/// Volatile store for tests and single-process runs.
pub struct InMemoryCheckpointStore {
    snapshots: Mutex<HashMap<(ChannelID, u64), BarrierSnapshot>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, channel_id: &ChannelID, snapshot: &BarrierSnapshot) -> TidalResult<()> {
        self.snapshots
            .lock()
            .insert((*channel_id, snapshot.barrier_id), snapshot.clone());
        Ok(())
    }

    fn load(&self, channel_id: &ChannelID, barrier_id: u64) -> TidalResult<Option<BarrierSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .get(&(*channel_id, barrier_id))
            .cloned())
    }

    fn load_latest(&self, channel_id: &ChannelID) -> TidalResult<Option<BarrierSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .iter()
            .filter(|((cid, _), _)| cid == channel_id)
            .max_by_key(|((_, barrier_id), _)| *barrier_id)
            .map(|(_, snapshot)| snapshot.clone()))
    }

    fn delete_up_to(&self, channel_id: &ChannelID, barrier_id: u64) -> TidalResult<()> {
        self.snapshots
            .lock()
            .retain(|(cid, id), _| cid != channel_id || *id > barrier_id);
        Ok(())
    }
}
