// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Cluster-wide resource view: every node's total and available resources.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use tidal_common::id::NodeID;
use tidal_common::scheduling::ResourceSet;

use crate::scheduling_resources::NodeResources;

struct NodeEntry {
    resources: NodeResources,
    last_update_ms: u64,
}

/// The resource view of all nodes, updated from the control service.
pub struct ClusterResourceManager {
    nodes: RwLock<BTreeMap<NodeID, NodeEntry>>,
}

impl ClusterResourceManager {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn add_or_update_node(&self, node_id: NodeID, resources: NodeResources) {
        self.nodes.write().insert(
            node_id,
            NodeEntry {
                resources,
                last_update_ms: tidal_util::time::current_time_ms(),
            },
        );
    }

    pub fn remove_node(&self, node_id: &NodeID) -> bool {
        self.nodes.write().remove(node_id).is_some()
    }

    /// Refresh a node's available resources from a sync message.
    pub fn update_node_available(&self, node_id: &NodeID, available: ResourceSet) {
        if let Some(entry) = self.nodes.write().get_mut(node_id) {
            entry.resources.available = available;
            entry.last_update_ms = tidal_util::time::current_time_ms();
        }
    }

    /// Deduct resources locally after deciding to place work on a node, so
    /// back-to-back decisions do not double-book the capacity.
    pub fn subtract_node_available(&self, node_id: &NodeID, request: &ResourceSet) -> bool {
        if let Some(entry) = self.nodes.write().get_mut(node_id) {
            if entry.resources.available.is_superset_of(request) {
                entry.resources.available.subtract(request);
                return true;
            }
        }
        false
    }

    pub fn add_node_available(&self, node_id: &NodeID, resources: &ResourceSet) {
        if let Some(entry) = self.nodes.write().get_mut(node_id) {
            entry.resources.available.add(resources);
        }
    }

    pub fn has_available(&self, node_id: &NodeID, request: &ResourceSet) -> bool {
        self.nodes
            .read()
            .get(node_id)
            .is_some_and(|e| e.resources.is_available(request))
    }

    pub fn has_feasible(&self, node_id: &NodeID, request: &ResourceSet) -> bool {
        self.nodes
            .read()
            .get(node_id)
            .is_some_and(|e| e.resources.is_feasible(request))
    }

    pub fn get_node_resources(&self, node_id: &NodeID) -> Option<NodeResources> {
        self.nodes.read().get(node_id).map(|e| e.resources.clone())
    }

    pub fn get_all_node_ids(&self) -> Vec<NodeID> {
        self.nodes.read().keys().copied().collect()
    }

    /// A snapshot of the whole view, in deterministic node order.
    pub fn get_resource_view(&self) -> BTreeMap<NodeID, NodeResources> {
        self.nodes
            .read()
            .iter()
            .map(|(id, e)| (*id, e.resources.clone()))
            .collect()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn set_node_draining(&self, node_id: &NodeID, deadline_ms: u64) {
        if let Some(entry) = self.nodes.write().get_mut(node_id) {
            entry.resources.is_draining = true;
            entry.resources.draining_deadline_ms = deadline_ms;
        }
    }

    pub fn is_node_alive(&self, node_id: &NodeID) -> bool {
        self.nodes.read().contains_key(node_id)
    }
}

impl Default for ClusterResourceManager {
    fn default() -> Self {
        Self::new()
    }
}
