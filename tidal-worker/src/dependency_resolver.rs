// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Dependency resolution for task arguments.
//!
//! Tracks object ids a task is waiting on and wakes the waiters when they
//! become available. Lost objects cancel their waiters with an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use tidal_common::id::ObjectID;

use crate::error::{WorkerError, WorkerResult};
use crate::memory_store::MemoryStore;

/// Registry of pending object waiters.
pub struct DependencyResolver {
    pending: Mutex<HashMap<ObjectID, Vec<oneshot::Sender<WorkerResult<()>>>>>,
    memory_store: Arc<MemoryStore>,
}

impl DependencyResolver {
    pub fn new(memory_store: Arc<MemoryStore>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            memory_store,
        }
    }

    /// Wait for every dependency. Locally available ids resolve immediately.
    pub async fn resolve_dependencies(&self, dependencies: &[ObjectID]) -> WorkerResult<()> {
        if dependencies.is_empty() {
            return Ok(());
        }

        let mut receivers = Vec::new();
        {
            let mut pending = self.pending.lock();
            for oid in dependencies {
                if self.memory_store.contains(oid) {
                    continue;
                }
                let (tx, rx) = oneshot::channel();
                pending.entry(*oid).or_default().push(tx);
                receivers.push(rx);
            }
        }

        for rx in receivers {
            rx.await
                .map_err(|_| WorkerError::Internal("dependency waiter dropped".into()))??;
        }
        Ok(())
    }

    /// Like [`resolve_dependencies`](Self::resolve_dependencies) with a cap.
    pub async fn resolve_dependencies_with_timeout(
        &self,
        dependencies: &[ObjectID],
        timeout: Duration,
    ) -> WorkerResult<()> {
        match tokio::time::timeout(timeout, self.resolve_dependencies(dependencies)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::TimedOut(format!(
                "dependency resolution timed out for {} objects",
                dependencies.len()
            ))),
        }
    }

    /// An object arrived; wake its waiters.
    pub fn on_object_available(&self, object_id: &ObjectID) {
        if let Some(waiters) = self.pending.lock().remove(object_id) {
            for tx in waiters {
                let _ = tx.send(Ok(()));
            }
        }
    }

    /// An object will never arrive; fail its waiters.
    pub fn on_object_failed(&self, object_id: &ObjectID, error: WorkerError) -> usize {
        match self.pending.lock().remove(object_id) {
            Some(waiters) => {
                let count = waiters.len();
                for tx in waiters {
                    let _ = tx.send(Err(error.clone()));
                }
                count
            }
            None => 0,
        }
    }

    pub fn num_pending_objects(&self) -> usize {
        self.pending.lock().len()
    }
}
