// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Builders for realistic wire messages.

use tidal_common::id::{ActorID, NodeID, TaskID, WorkerID};
use tidal_proto::common::Address;
use tidal_proto::gcs::{Bundle, NodeTableData, PlacementGroupTableData, PlacementStrategy};
use tidal_proto::task::{ActorCreationTaskSpec, ActorTaskSpec, TaskSpec};

pub fn gen_address(node_id: &NodeID, port: i32) -> Address {
    Address {
        node_id: node_id.binary(),
        ip_address: "127.0.0.1".to_string(),
        port,
        worker_id: WorkerID::from_random().binary(),
    }
}

pub fn gen_node_info(node_id: &NodeID, cpus: f64, port: u32) -> NodeTableData {
    let mut node = NodeTableData {
        node_id: node_id.binary(),
        node_manager_address: "127.0.0.1".to_string(),
        node_manager_port: port,
        ..Default::default()
    };
    if cpus > 0.0 {
        node.resources_total.insert("CPU".to_string(), cpus);
    }
    node
}

pub fn gen_normal_task_spec(task_id: &TaskID, name: &str, cpus: f64) -> TaskSpec {
    let mut spec = TaskSpec {
        task_id: task_id.binary(),
        name: name.to_string(),
        num_returns: 1,
        ..Default::default()
    };
    if cpus > 0.0 {
        spec.required_resources.insert("CPU".to_string(), cpus);
    }
    spec
}

pub fn gen_actor_creation_spec(actor_id: &ActorID, max_restarts: i64) -> TaskSpec {
    TaskSpec {
        task_id: TaskID::for_actor_creation_task(actor_id).binary(),
        actor_creation_task_spec: Some(ActorCreationTaskSpec {
            actor_id: actor_id.binary(),
            max_restarts,
            namespace: "default".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn gen_actor_task_spec(actor_id: &ActorID, task_id: &TaskID, sequence_number: u64) -> TaskSpec {
    TaskSpec {
        task_id: task_id.binary(),
        actor_task_spec: Some(ActorTaskSpec {
            actor_id: actor_id.binary(),
            sequence_number,
        }),
        ..Default::default()
    }
}

pub fn gen_bundle(pg_id: &[u8], index: i64, cpus: f64) -> Bundle {
    let mut bundle = Bundle {
        placement_group_id: pg_id.to_vec(),
        bundle_index: index,
        node_id: vec![],
        ..Default::default()
    };
    bundle.unit_resources.insert("CPU".to_string(), cpus);
    bundle
}

pub fn gen_placement_group(
    pg_id: &[u8],
    name: &str,
    strategy: PlacementStrategy,
    bundle_cpus: &[f64],
) -> PlacementGroupTableData {
    PlacementGroupTableData {
        placement_group_id: pg_id.to_vec(),
        name: name.to_string(),
        namespace: "default".to_string(),
        strategy: strategy as i32,
        bundles: bundle_cpus
            .iter()
            .enumerate()
            .map(|(i, cpus)| gen_bundle(pg_id, i as i64, *cpus))
            .collect(),
        ..Default::default()
    }
}
