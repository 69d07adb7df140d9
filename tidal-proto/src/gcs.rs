// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Control-service table rows, pub/sub messages, and service payloads.

use std::collections::HashMap;

use crate::common::Address;
use crate::task::TaskSpec;

/// Actor lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum ActorState {
    DependenciesUnready = 0,
    PendingCreation = 1,
    Alive = 2,
    Restarting = 3,
    Dead = 4,
}

/// A row of the actor table.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ActorTableData {
    #[prost(bytes = "vec", tag = "1")]
    pub actor_id: Vec<u8>,
    #[prost(enumeration = "ActorState", tag = "2")]
    pub state: i32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub namespace: String,
    /// Meaningful only while the actor is ALIVE.
    #[prost(message, optional, tag = "5")]
    pub address: Option<Address>,
    #[prost(bytes = "vec", tag = "6")]
    pub node_id: Vec<u8>,
    /// -1 means unlimited restarts.
    #[prost(int64, tag = "7")]
    pub max_restarts: i64,
    #[prost(uint64, tag = "8")]
    pub num_restarts: u64,
    #[prost(bool, tag = "9")]
    pub is_detached: bool,
    #[prost(string, tag = "10")]
    pub death_cause: String,
    #[prost(uint32, tag = "11")]
    pub pid: u32,
}

/// Node liveness states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum NodeState {
    Alive = 0,
    Dead = 1,
}

/// A row of the node table.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NodeTableData {
    #[prost(bytes = "vec", tag = "1")]
    pub node_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub node_manager_address: String,
    #[prost(uint32, tag = "3")]
    pub node_manager_port: u32,
    #[prost(uint32, tag = "4")]
    pub object_manager_port: u32,
    #[prost(enumeration = "NodeState", tag = "5")]
    pub state: i32,
    #[prost(map = "string, double", tag = "6")]
    pub resources_total: HashMap<String, f64>,
    #[prost(map = "string, string", tag = "7")]
    pub labels: HashMap<String, String>,
    #[prost(bool, tag = "8")]
    pub is_draining: bool,
    #[prost(uint64, tag = "9")]
    pub draining_deadline_ms: u64,
}

/// A row of the job table.
#[derive(Clone, PartialEq, prost::Message)]
pub struct JobTableData {
    #[prost(bytes = "vec", tag = "1")]
    pub job_id: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub is_dead: bool,
    #[prost(message, optional, tag = "3")]
    pub driver_address: Option<Address>,
    #[prost(uint64, tag = "4")]
    pub start_time_ms: u64,
    #[prost(uint64, tag = "5")]
    pub end_time_ms: u64,
}

/// A row of the worker table.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WorkerTableData {
    #[prost(message, optional, tag = "1")]
    pub worker_address: Option<Address>,
    #[prost(bool, tag = "2")]
    pub is_alive: bool,
    #[prost(string, tag = "3")]
    pub exit_type: String,
    #[prost(uint64, tag = "4")]
    pub timestamp_ms: u64,
}

/// Placement group scheduling strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum PlacementStrategy {
    Pack = 0,
    Spread = 1,
    StrictPack = 2,
    StrictSpread = 3,
    AffinityWithBundle = 4,
}

/// Placement group lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum PlacementGroupState {
    Pending = 0,
    Prepared = 1,
    Committed = 2,
    Rescheduling = 3,
    Removed = 4,
}

/// One bundle of a placement group.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Bundle {
    #[prost(bytes = "vec", tag = "1")]
    pub placement_group_id: Vec<u8>,
    #[prost(int64, tag = "2")]
    pub bundle_index: i64,
    #[prost(map = "string, double", tag = "3")]
    pub unit_resources: HashMap<String, f64>,
    /// The node the bundle is placed on; empty until prepared.
    #[prost(bytes = "vec", tag = "4")]
    pub node_id: Vec<u8>,
}

/// A row of the placement group table.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PlacementGroupTableData {
    #[prost(bytes = "vec", tag = "1")]
    pub placement_group_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub namespace: String,
    #[prost(enumeration = "PlacementStrategy", tag = "4")]
    pub strategy: i32,
    #[prost(enumeration = "PlacementGroupState", tag = "5")]
    pub state: i32,
    #[prost(message, repeated, tag = "6")]
    pub bundles: Vec<Bundle>,
    #[prost(bytes = "vec", tag = "7")]
    pub creator_job_id: Vec<u8>,
}

/// Object location update published on the location channel.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ObjectLocationUpdate {
    #[prost(bytes = "vec", tag = "1")]
    pub object_id: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub node_ids: Vec<Vec<u8>>,
    #[prost(string, tag = "3")]
    pub spilled_url: String,
    #[prost(uint64, tag = "4")]
    pub object_size: u64,
}

/// A message published on a control-service channel.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PubMessage {
    #[prost(int32, tag = "1")]
    pub channel_type: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub key_id: Vec<u8>,
    #[prost(int64, tag = "3")]
    pub sequence_id: i64,
    #[prost(oneof = "pub_message::InnerMessage", tags = "4, 5, 6, 7, 8, 9")]
    pub inner_message: Option<pub_message::InnerMessage>,
}

pub mod pub_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum InnerMessage {
        #[prost(message, tag = "4")]
        ActorMessage(super::ActorTableData),
        #[prost(message, tag = "5")]
        NodeMessage(super::NodeTableData),
        #[prost(message, tag = "6")]
        JobMessage(super::JobTableData),
        #[prost(message, tag = "7")]
        WorkerMessage(super::WorkerTableData),
        #[prost(message, tag = "8")]
        PlacementGroupMessage(super::PlacementGroupTableData),
        #[prost(message, tag = "9")]
        ObjectLocationMessage(super::ObjectLocationUpdate),
    }
}

// ── Service payloads ────────────────────────────────────────────────────

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateActorRequest {
    #[prost(message, optional, tag = "1")]
    pub task_spec: Option<TaskSpec>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateActorReply {
    #[prost(bytes = "vec", tag = "1")]
    pub actor_id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub actor_address: Option<Address>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct KillActorRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub actor_id: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub no_restart: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct KillActorReply {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreatePlacementGroupRequest {
    #[prost(message, optional, tag = "1")]
    pub placement_group: Option<PlacementGroupTableData>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreatePlacementGroupReply {
    #[prost(bytes = "vec", tag = "1")]
    pub placement_group_id: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RemovePlacementGroupRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub placement_group_id: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RemovePlacementGroupReply {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WaitPlacementGroupReadyRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub placement_group_id: Vec<u8>,
    /// 0 polls the current state without blocking.
    #[prost(uint64, tag = "2")]
    pub timeout_s: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WaitPlacementGroupReadyReply {
    #[prost(bool, tag = "1")]
    pub ready: bool,
}

/// A node announces itself to the control service.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterNodeRequest {
    #[prost(message, optional, tag = "1")]
    pub node: Option<NodeTableData>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterNodeReply {
    #[prost(bytes = "vec", tag = "1")]
    pub node_id: Vec<u8>,
    /// Snapshot of the alive nodes (including the registrant), so the node
    /// can seed its cluster resource view and peer addresses.
    #[prost(message, repeated, tag = "2")]
    pub peers: Vec<NodeTableData>,
}

/// Node-side bundle resource 2PC payloads.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PrepareBundleResourcesRequest {
    #[prost(message, repeated, tag = "1")]
    pub bundles: Vec<Bundle>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PrepareBundleResourcesReply {
    #[prost(bool, tag = "1")]
    pub success: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CommitBundleResourcesRequest {
    #[prost(message, repeated, tag = "1")]
    pub bundles: Vec<Bundle>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CommitBundleResourcesReply {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReturnBundleResourcesRequest {
    #[prost(message, repeated, tag = "1")]
    pub bundles: Vec<Bundle>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReturnBundleResourcesReply {}
