// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Common types for the object subsystem.

use tidal_common::id::{NodeID, ObjectID, WorkerID};

/// Descriptor of an object held in the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub object_id: ObjectID,
    pub data_size: u64,
    pub metadata_size: u64,
    pub owner_node_id: NodeID,
    pub owner_ip_address: String,
    pub owner_port: i32,
    pub owner_worker_id: WorkerID,
}

impl ObjectInfo {
    /// Total footprint of the object: metadata bytes then data bytes.
    pub fn total_size(&self) -> u64 {
        self.data_size + self.metadata_size
    }
}

impl Default for ObjectInfo {
    fn default() -> Self {
        Self {
            object_id: ObjectID::nil(),
            data_size: 0,
            metadata_size: 0,
            owner_node_id: NodeID::nil(),
            owner_ip_address: String::new(),
            owner_port: 0,
            owner_worker_id: WorkerID::nil(),
        }
    }
}

/// How an object entered the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectSource {
    CreatedByWorker,
    RestoredFromStorage,
    ReceivedFromRemoteNode,
    ErrorStoredByNode,
}

/// Store-level error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlasmaError {
    #[error("object already exists")]
    ObjectExists,
    #[error("object does not exist")]
    ObjectNonexistent,
    #[error("out of memory")]
    OutOfMemory,
    #[error("object not sealed")]
    ObjectNotSealed,
    #[error("object in use")]
    ObjectInUse,
    #[error("object already sealed")]
    ObjectSealed,
    #[error("out of disk")]
    OutOfDisk,
}

/// Configuration of the object subsystem on one node.
#[derive(Debug, Clone)]
pub struct ObjectManagerConfig {
    pub object_manager_address: String,
    pub object_manager_port: u16,
    /// Period of the housekeeping timer driving retries.
    pub timer_freq_ms: u64,
    /// How long a single pull waits on its chosen location.
    pub pull_timeout_ms: u64,
    /// How long a push may stay unacknowledged.
    pub push_timeout_ms: u64,
    pub object_chunk_size: u64,
    pub max_bytes_in_flight: u64,
    pub object_store_memory: i64,
    pub plasma_directory: String,
    pub fallback_directory: String,
    pub spill_directory: String,
}

impl Default for ObjectManagerConfig {
    fn default() -> Self {
        Self {
            object_manager_address: String::new(),
            object_manager_port: 0,
            timer_freq_ms: 100,
            pull_timeout_ms: 10_000,
            push_timeout_ms: 10_000,
            object_chunk_size: tidal_common::constants::DEFAULT_OBJECT_CHUNK_SIZE,
            max_bytes_in_flight: tidal_common::constants::DEFAULT_MAX_BYTES_IN_FLIGHT,
            object_store_memory: 256 * 1024 * 1024,
            plasma_directory: String::new(),
            fallback_directory: String::new(),
            spill_directory: String::new(),
        }
    }
}

/// Invoked after a new object is sealed locally.
pub type AddObjectCallback = Box<dyn Fn(&ObjectInfo) + Send + Sync>;
/// Invoked after an object leaves the local store.
pub type DeleteObjectCallback = Box<dyn Fn(&ObjectID) + Send + Sync>;
/// Invoked when the store needs space; returns the bytes freed and, per
/// spilled object, its id with the URL it is now restorable from. Shared so
/// the store can invoke it without holding its own lock (the callback reads
/// objects back out of the store).
pub type SpillObjectsCallback =
    std::sync::Arc<dyn Fn(u64) -> (u64, Vec<(ObjectID, String)>) + Send + Sync>;
/// Restores a previously spilled object; returns (data, metadata).
pub type RestoreSpilledObjectCallback =
    Box<dyn Fn(&ObjectID, &str) -> Result<(Vec<u8>, Vec<u8>), PlasmaError> + Send + Sync>;
