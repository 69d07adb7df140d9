// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Per-worker context: current ids and index counters.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use tidal_common::id::{ActorID, JobID, TaskID, WorkerID};

use crate::options::WorkerType;

/// Identity and counters of one worker process.
pub struct WorkerContext {
    worker_type: WorkerType,
    worker_id: WorkerID,
    job_id: RwLock<JobID>,
    current_task_id: RwLock<TaskID>,
    current_actor_id: RwLock<ActorID>,
    task_index: AtomicU64,
    put_index: AtomicU64,
}

impl WorkerContext {
    pub fn new(worker_type: WorkerType, worker_id: WorkerID, job_id: JobID) -> Self {
        let driver_task = TaskID::for_driver_task(&job_id);
        Self {
            worker_type,
            worker_id,
            job_id: RwLock::new(job_id),
            current_task_id: RwLock::new(driver_task),
            current_actor_id: RwLock::new(ActorID::nil()),
            task_index: AtomicU64::new(0),
            put_index: AtomicU64::new(0),
        }
    }

    pub fn worker_type(&self) -> WorkerType {
        self.worker_type
    }

    pub fn worker_id(&self) -> WorkerID {
        self.worker_id
    }

    pub fn current_job_id(&self) -> JobID {
        *self.job_id.read()
    }

    pub fn current_task_id(&self) -> TaskID {
        *self.current_task_id.read()
    }

    pub fn set_current_task_id(&self, task_id: TaskID) {
        *self.current_task_id.write() = task_id;
    }

    pub fn current_actor_id(&self) -> ActorID {
        *self.current_actor_id.read()
    }

    pub fn set_current_actor_id(&self, actor_id: ActorID) {
        *self.current_actor_id.write() = actor_id;
    }

    /// Counter for submitted tasks; feeds deterministic task ids.
    pub fn next_task_index(&self) -> u64 {
        self.task_index.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Counter for `Put` objects; feeds object indices.
    pub fn next_put_index(&self) -> u64 {
        self.put_index.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_monotonic() {
        let ctx = WorkerContext::new(WorkerType::Driver, WorkerID::from_random(), JobID::from_int(1));
        assert_eq!(ctx.next_task_index(), 1);
        assert_eq!(ctx.next_task_index(), 2);
        assert_eq!(ctx.next_put_index(), 1);
    }

    #[test]
    fn test_driver_task_id_derived_from_job() {
        let job = JobID::from_int(5);
        let ctx = WorkerContext::new(WorkerType::Driver, WorkerID::from_random(), job);
        assert_eq!(ctx.current_task_id().job_id(), job);
    }
}
