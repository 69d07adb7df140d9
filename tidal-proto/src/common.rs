// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Shared message types: addresses, object references, argument envelopes.

/// The network identity of a worker: which node it runs on and where its RPC
/// endpoint listens.
#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct Address {
    #[prost(bytes = "vec", tag = "1")]
    pub node_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub ip_address: String,
    #[prost(int32, tag = "3")]
    pub port: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub worker_id: Vec<u8>,
}

/// A reference to an object: its id, the address of the owning worker, and
/// any references nested inside the referenced value.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ObjectReference {
    #[prost(bytes = "vec", tag = "1")]
    pub object_id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub owner_address: Option<Address>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub nested_ids: Vec<Vec<u8>>,
}

/// An inline argument value: opaque payload plus its metadata envelope.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InlineValue {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub metadata: Vec<u8>,
    #[prost(message, repeated, tag = "3")]
    pub nested_refs: Vec<ObjectReference>,
}

/// A task argument: by reference or by value.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TaskArg {
    #[prost(oneof = "task_arg::Arg", tags = "1, 2")]
    pub arg: Option<task_arg::Arg>,
}

pub mod task_arg {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Arg {
        #[prost(message, tag = "1")]
        Reference(super::ObjectReference),
        #[prost(message, tag = "2")]
        Value(super::InlineValue),
    }
}

impl TaskArg {
    pub fn by_reference(reference: ObjectReference) -> Self {
        Self {
            arg: Some(task_arg::Arg::Reference(reference)),
        }
    }

    pub fn by_value(value: InlineValue) -> Self {
        Self {
            arg: Some(task_arg::Arg::Value(value)),
        }
    }

    /// The referenced object id, when this argument is by reference.
    pub fn reference_id(&self) -> Option<&[u8]> {
        match &self.arg {
            Some(task_arg::Arg::Reference(r)) => Some(&r.object_id),
            _ => None,
        }
    }
}

/// Source language of a task's function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum Language {
    Rust = 0,
    Python = 1,
    Java = 2,
    Cpp = 3,
}

/// The kind of task a spec describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum TaskType {
    NormalTask = 0,
    ActorCreationTask = 1,
    ActorTask = 2,
    DriverTask = 3,
}
