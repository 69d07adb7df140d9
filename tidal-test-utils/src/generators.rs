// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Random and deterministic id generators.

use tidal_common::id::{
    ActorID, ChannelID, JobID, NodeID, ObjectID, PlacementGroupID, TaskID, WorkerID,
};

pub fn random_job_id() -> JobID {
    JobID::from_random()
}

pub fn random_actor_id() -> ActorID {
    ActorID::of(&JobID::from_random(), &TaskID::from_random(), 0)
}

pub fn random_task_id() -> TaskID {
    TaskID::from_random()
}

pub fn random_node_id() -> NodeID {
    NodeID::from_random()
}

pub fn random_worker_id() -> WorkerID {
    WorkerID::from_random()
}

pub fn random_object_id() -> ObjectID {
    ObjectID::from_index(&TaskID::from_random(), 0)
}

pub fn random_placement_group_id() -> PlacementGroupID {
    PlacementGroupID::of(&JobID::from_random())
}

pub fn random_channel_id() -> ChannelID {
    ChannelID::from_random()
}

/// A deterministic id whose first byte is `val`; handy for readable tests.
pub fn object_id_with_byte(val: u8) -> ObjectID {
    let mut data = [0u8; 28];
    data[0] = val;
    ObjectID::from_binary(&data)
}

pub fn node_id_with_byte(val: u8) -> NodeID {
    let mut data = [0u8; 28];
    data[0] = val;
    NodeID::from_binary(&data)
}
