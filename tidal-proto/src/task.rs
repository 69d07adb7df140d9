// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Task specification and task-execution RPC messages.

use std::collections::HashMap;

use crate::common::{Address, ObjectReference};
pub use crate::common::TaskArg;

/// What user function a task runs. The core treats this as opaque routing
/// data for the language binding.
#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct FunctionDescriptor {
    #[prost(string, tag = "1")]
    pub module_name: String,
    #[prost(string, tag = "2")]
    pub function_name: String,
    #[prost(string, tag = "3")]
    pub signature_hash: String,
}

/// A named concurrency group declared by an actor.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ConcurrencyGroup {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub max_concurrency: u32,
}

/// Extra fields carried only by actor creation tasks.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActorCreationTaskSpec {
    #[prost(bytes = "vec", tag = "1")]
    pub actor_id: Vec<u8>,
    /// -1 means unlimited restarts.
    #[prost(int64, tag = "2")]
    pub max_restarts: i64,
    #[prost(uint32, tag = "3")]
    pub max_concurrency: u32,
    #[prost(bool, tag = "4")]
    pub is_detached: bool,
    /// Cooperative (fiber) execution instead of a bounded thread pool.
    #[prost(bool, tag = "5")]
    pub is_asyncio: bool,
    #[prost(string, tag = "6")]
    pub name: String,
    #[prost(string, tag = "7")]
    pub namespace: String,
    #[prost(message, repeated, tag = "8")]
    pub concurrency_groups: Vec<ConcurrencyGroup>,
    #[prost(bool, tag = "9")]
    pub execute_out_of_order: bool,
}

/// Extra fields carried only by actor tasks.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActorTaskSpec {
    #[prost(bytes = "vec", tag = "1")]
    pub actor_id: Vec<u8>,
    /// Strictly increasing, gapless per (caller, actor) pair.
    #[prost(uint64, tag = "2")]
    pub sequence_number: u64,
}

/// The full specification of a task.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TaskSpec {
    #[prost(bytes = "vec", tag = "1")]
    pub task_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(enumeration = "crate::common::Language", tag = "3")]
    pub language: i32,
    #[prost(enumeration = "crate::common::TaskType", tag = "4")]
    pub task_type: i32,
    #[prost(bytes = "vec", tag = "5")]
    pub job_id: Vec<u8>,
    #[prost(message, optional, tag = "6")]
    pub caller_address: Option<Address>,
    #[prost(message, optional, tag = "7")]
    pub function: Option<FunctionDescriptor>,
    #[prost(message, repeated, tag = "8")]
    pub args: Vec<TaskArg>,
    #[prost(uint64, tag = "9")]
    pub num_returns: u64,
    #[prost(map = "string, double", tag = "10")]
    pub required_resources: HashMap<String, f64>,
    /// Placement constraint; empty when unconstrained.
    #[prost(bytes = "vec", tag = "11")]
    pub placement_group_id: Vec<u8>,
    #[prost(int64, tag = "12")]
    pub placement_group_bundle_index: i64,
    #[prost(string, tag = "13")]
    pub concurrency_group_name: String,
    #[prost(int32, tag = "14")]
    pub max_retries: i32,
    /// A task the user marked non-idempotent is never retried.
    #[prost(bool, tag = "15")]
    pub is_idempotent: bool,
    #[prost(message, optional, tag = "16")]
    pub actor_creation_task_spec: Option<ActorCreationTaskSpec>,
    #[prost(message, optional, tag = "17")]
    pub actor_task_spec: Option<ActorTaskSpec>,
}

impl TaskSpec {
    /// Object ids this task depends on (its by-reference arguments).
    pub fn dependencies(&self) -> Vec<Vec<u8>> {
        self.args
            .iter()
            .filter_map(|a| a.reference_id().map(|id| id.to_vec()))
            .collect()
    }

    pub fn is_actor_creation_task(&self) -> bool {
        self.actor_creation_task_spec.is_some()
    }

    pub fn is_actor_task(&self) -> bool {
        self.actor_task_spec.is_some()
    }
}

/// A return value of a task: inlined when small, a store reference otherwise.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ReturnObject {
    #[prost(bytes = "vec", tag = "1")]
    pub object_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub metadata: Vec<u8>,
    /// Payload lives in the local plasma store instead of the reply.
    #[prost(bool, tag = "4")]
    pub in_plasma: bool,
    #[prost(uint64, tag = "5")]
    pub size: u64,
}

/// Dispatch a task to a worker.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PushTaskRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub intended_worker_id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub task_spec: Option<TaskSpec>,
    #[prost(int64, tag = "3")]
    pub sequence_number: i64,
    /// Highest sequence number for which the caller has a reply; older
    /// requests still in the queue are stale and dropped.
    #[prost(int64, tag = "4")]
    pub client_processed_up_to: i64,
}

/// Reply to a task dispatch.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PushTaskReply {
    #[prost(message, repeated, tag = "1")]
    pub return_objects: Vec<ReturnObject>,
    #[prost(bool, tag = "2")]
    pub worker_exiting: bool,
    #[prost(bool, tag = "3")]
    pub is_retryable_error: bool,
    #[prost(bool, tag = "4")]
    pub is_application_error: bool,
    #[prost(string, tag = "5")]
    pub task_execution_error: String,
    /// References the executed task borrowed from nested arguments, reported
    /// back to their owner with the reply.
    #[prost(message, repeated, tag = "6")]
    pub borrowed_refs: Vec<ObjectReference>,
}

/// Submit a task from a driver into the cluster.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SubmitTaskRequest {
    #[prost(message, optional, tag = "1")]
    pub task_spec: Option<TaskSpec>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubmitTaskReply {
    #[prost(bytes = "vec", tag = "1")]
    pub task_id: Vec<u8>,
}

/// Cancel a queued or running task.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CancelTaskRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub task_id: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub force_kill: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CancelTaskReply {
    #[prost(bool, tag = "1")]
    pub attempted: bool,
}

/// Sent by a borrower to an owner: resolves when the borrower has dropped
/// its last reference to the object.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WaitForRefRemovedRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub object_id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub borrower_address: Option<Address>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WaitForRefRemovedReply {}
