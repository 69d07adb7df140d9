// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! In-process object store.
//!
//! Holds small objects (inlined returns, `Put` values) entirely in the
//! worker's memory; large payloads live in the node's shared-memory store
//! and appear here as `in_plasma` markers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use tidal_common::constants::{IN_PLASMA_META, TASK_EXECUTION_EXCEPTION_META};
use tidal_common::id::ObjectID;

use crate::error::{WorkerError, WorkerResult};

/// One object value: opaque payload plus its typed metadata envelope.
#[derive(Debug, Clone)]
pub struct TidalObject {
    pub data: Bytes,
    pub metadata: Bytes,
    pub nested_refs: Vec<ObjectID>,
}

impl TidalObject {
    pub fn new(data: Bytes, metadata: Bytes, nested_refs: Vec<ObjectID>) -> Self {
        Self {
            data,
            metadata,
            nested_refs,
        }
    }

    pub fn from_data(data: Bytes) -> Self {
        Self::new(data, Bytes::new(), Vec::new())
    }

    /// A metadata-only error object carrying a task execution failure.
    pub fn task_execution_error(message: &str) -> Self {
        let mut metadata = Vec::with_capacity(TASK_EXECUTION_EXCEPTION_META.len() + 1 + message.len());
        metadata.extend_from_slice(TASK_EXECUTION_EXCEPTION_META);
        metadata.push(b':');
        metadata.extend_from_slice(message.as_bytes());
        Self::new(Bytes::new(), Bytes::from(metadata), Vec::new())
    }

    /// A marker object whose payload lives in the shared-memory store.
    pub fn in_plasma_marker() -> Self {
        Self::new(Bytes::new(), Bytes::from_static(IN_PLASMA_META), Vec::new())
    }

    pub fn is_error(&self) -> bool {
        self.metadata.starts_with(TASK_EXECUTION_EXCEPTION_META)
    }

    pub fn is_in_plasma(&self) -> bool {
        self.metadata.starts_with(IN_PLASMA_META)
    }

    /// The error message of an error object, if any.
    pub fn error_message(&self) -> Option<String> {
        if !self.is_error() {
            return None;
        }
        let rest = &self.metadata[TASK_EXECUTION_EXCEPTION_META.len()..];
        let rest = rest.strip_prefix(b":").unwrap_or(rest);
        Some(String::from_utf8_lossy(rest).into_owned())
    }
}

/// The per-worker object map with async waiting.
pub struct MemoryStore {
    objects: Mutex<HashMap<ObjectID, TidalObject>>,
    notify: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Insert an object; duplicate ids fail (each id has one creator).
    pub fn put(&self, object_id: ObjectID, object: TidalObject) -> WorkerResult<()> {
        let mut objects = self.objects.lock();
        if objects.contains_key(&object_id) {
            return Err(WorkerError::ObjectAlreadyExists(object_id.hex()));
        }
        objects.insert(object_id, object);
        drop(objects);
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn get(&self, object_id: &ObjectID) -> Option<TidalObject> {
        self.objects.lock().get(object_id).cloned()
    }

    pub fn delete(&self, object_id: &ObjectID) -> bool {
        self.objects.lock().remove(object_id).is_some()
    }

    pub fn contains(&self, object_id: &ObjectID) -> bool {
        self.objects.lock().contains_key(object_id)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// The notifier fired on every arrival. Waiters watching several
    /// objects at once (`Wait`) listen here instead of polling.
    pub fn arrival_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Get the object, waiting up to `timeout` for it to arrive.
    pub async fn get_or_wait(
        &self,
        object_id: &ObjectID,
        timeout: Duration,
    ) -> WorkerResult<TidalObject> {
        if let Some(obj) = self.get(object_id) {
            return Ok(obj);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(WorkerError::TimedOut(format!(
                    "waiting for object {}",
                    object_id.hex()
                )));
            }
            match tokio::time::timeout(remaining, self.notify.notified()).await {
                Ok(()) => {
                    if let Some(obj) = self.get(object_id) {
                        return Ok(obj);
                    }
                }
                Err(_) => {
                    return match self.get(object_id) {
                        Some(obj) => Ok(obj),
                        None => Err(WorkerError::TimedOut(format!(
                            "waiting for object {}",
                            object_id.hex()
                        ))),
                    };
                }
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
