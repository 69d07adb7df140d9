// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Node-level scheduling state: per-instance resource slots, per-node
//! resource views, and the option/result types consumed by the policies.

use std::collections::HashMap;

use tidal_common::constants::{CPU_RESOURCE, GPU_RESOURCE};
use tidal_common::id::NodeID;
use tidal_common::scheduling::{FixedPoint, ResourceSet};

/// Per-instance resource tracking (e.g. individual GPU slots).
///
/// Unit resources (CPU, GPU) expand to one slot of capacity 1.0 per unit so
/// gang placement can carve out specific slices; everything else is a single
/// slot of the full quantity.
#[derive(Debug, Clone, Default)]
pub struct NodeResourceInstanceSet {
    resources: HashMap<String, Vec<FixedPoint>>,
}

impl NodeResourceInstanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_resource_set(resources: &ResourceSet) -> Self {
        let mut inst = Self::new();
        for (name, amount) in resources.iter() {
            if is_unit_instance_resource(name) {
                let count = amount.to_f64().ceil() as usize;
                let mut slots = vec![FixedPoint::ONE; count];
                let remainder = amount - FixedPoint::from_f64(count.saturating_sub(1) as f64);
                if count > 0 && remainder < FixedPoint::ONE {
                    slots[count - 1] = remainder;
                }
                inst.resources.insert(name.to_string(), slots);
            } else {
                inst.resources.insert(name.to_string(), vec![amount]);
            }
        }
        inst
    }

    /// All-or-nothing allocation across every requested resource.
    pub fn try_allocate(&mut self, request: &ResourceSet) -> Option<TaskResourceInstances> {
        for (name, amount) in request.iter() {
            if self.total_available(name) < amount {
                return None;
            }
        }

        let mut allocation = TaskResourceInstances::new();
        for (name, amount) in request.iter() {
            if let Some(slots) = self.resources.get_mut(name) {
                let alloc = allocate_from_instances(slots, amount);
                allocation.resources.insert(name.to_string(), alloc);
            }
        }
        Some(allocation)
    }

    /// Return a previous allocation.
    pub fn free(&mut self, allocation: &TaskResourceInstances) {
        for (name, alloc_slots) in &allocation.resources {
            if let Some(slots) = self.resources.get_mut(name) {
                for (i, amount) in alloc_slots.iter().enumerate() {
                    if i < slots.len() {
                        slots[i] += *amount;
                    }
                }
            }
        }
    }

    pub fn total_available(&self, resource: &str) -> FixedPoint {
        self.resources
            .get(resource)
            .map(|slots| slots.iter().copied().fold(FixedPoint::ZERO, |a, b| a + b))
            .unwrap_or(FixedPoint::ZERO)
    }

    /// Flatten to a plain resource set.
    pub fn to_resource_set(&self) -> ResourceSet {
        let mut result = ResourceSet::new();
        for (name, slots) in &self.resources {
            let total = slots.iter().copied().fold(FixedPoint::ZERO, |a, b| a + b);
            if total.is_positive() {
                result.set(name.clone(), total);
            }
        }
        result
    }

    pub fn get_instances(&self, resource: &str) -> Option<&[FixedPoint]> {
        self.resources.get(resource).map(|v| v.as_slice())
    }

    pub fn set_instances(&mut self, resource: String, instances: Vec<FixedPoint>) {
        if instances.is_empty() {
            self.resources.remove(&resource);
        } else {
            self.resources.insert(resource, instances);
        }
    }
}

/// The per-instance allocation handed to one task or bundle.
#[derive(Debug, Clone, Default)]
pub struct TaskResourceInstances {
    pub resources: HashMap<String, Vec<FixedPoint>>,
}

impl TaskResourceInstances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_resource_set(&self) -> ResourceSet {
        let mut result = ResourceSet::new();
        for (name, slots) in &self.resources {
            let total = slots.iter().copied().fold(FixedPoint::ZERO, |a, b| a + b);
            if total.is_positive() {
                result.set(name.clone(), total);
            }
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.resources
            .values()
            .all(|slots| slots.iter().all(|s| s.is_zero()))
    }
}

/// One node's resources as seen by the scheduler.
#[derive(Debug, Clone)]
pub struct NodeResources {
    pub total: ResourceSet,
    pub available: ResourceSet,
    pub labels: HashMap<String, String>,
    pub is_draining: bool,
    pub draining_deadline_ms: u64,
}

impl NodeResources {
    pub fn new(total: ResourceSet) -> Self {
        Self {
            available: total.clone(),
            total,
            labels: HashMap::new(),
            is_draining: false,
            draining_deadline_ms: 0,
        }
    }

    /// Enough free capacity right now, and not being drained.
    pub fn is_available(&self, request: &ResourceSet) -> bool {
        !self.is_draining && self.available.is_superset_of(request)
    }

    /// Could ever fit the request.
    pub fn is_feasible(&self, request: &ResourceSet) -> bool {
        self.total.is_superset_of(request)
    }

    /// Highest utilization across all resources, in [0, 1].
    pub fn critical_resource_utilization(&self) -> f64 {
        let mut max_util = 0.0_f64;
        for (name, total_amount) in self.total.iter() {
            if total_amount.is_zero() {
                continue;
            }
            let avail = self.available.get(name);
            let used = (total_amount - avail).to_f64();
            max_util = max_util.max(used / total_amount.to_f64());
        }
        max_util
    }

    pub fn has_gpu(&self) -> bool {
        self.total.get(GPU_RESOURCE).is_positive()
    }
}

impl Default for NodeResources {
    fn default() -> Self {
        Self::new(ResourceSet::new())
    }
}

/// Instance-level resources of the local node.
#[derive(Debug, Clone)]
pub struct NodeResourceInstances {
    pub total: NodeResourceInstanceSet,
    pub available: NodeResourceInstanceSet,
    pub labels: HashMap<String, String>,
}

impl NodeResourceInstances {
    pub fn new(total: ResourceSet, labels: HashMap<String, String>) -> Self {
        Self {
            total: NodeResourceInstanceSet::from_resource_set(&total),
            available: NodeResourceInstanceSet::from_resource_set(&total),
            labels,
        }
    }

    pub fn to_node_resources(&self) -> NodeResources {
        NodeResources {
            total: self.total.to_resource_set(),
            available: self.available.to_resource_set(),
            labels: self.labels.clone(),
            is_draining: false,
            draining_deadline_ms: 0,
        }
    }
}

/// Scheduling modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulingType {
    Hybrid,
    Spread,
    Random,
    NodeAffinity,
    BundlePack,
    BundleSpread,
    BundleStrictPack,
    BundleStrictSpread,
    AffinityWithBundle,
}

/// Options handed to the policies.
#[derive(Debug, Clone)]
pub struct SchedulingOptions {
    pub scheduling_type: SchedulingType,
    /// Utilization below this is treated as zero by the default scorer, so
    /// lightly loaded nodes tie and packing wins.
    pub spread_threshold: f64,
    pub avoid_local_node: bool,
    pub require_node_available: bool,
    /// For non-GPU work, prefer keeping GPU nodes free.
    pub avoid_gpu_nodes: bool,
    pub node_affinity_node_id: Option<NodeID>,
    pub node_affinity_soft: bool,
    /// For AffinityWithBundle: the nodes hosting the referenced bundle.
    pub bundle_affinity_nodes: Vec<NodeID>,
}

impl Default for SchedulingOptions {
    fn default() -> Self {
        Self {
            scheduling_type: SchedulingType::Hybrid,
            spread_threshold: 0.5,
            avoid_local_node: false,
            require_node_available: true,
            avoid_gpu_nodes: false,
            node_affinity_node_id: None,
            node_affinity_soft: false,
            bundle_affinity_nodes: Vec::new(),
        }
    }
}

impl SchedulingOptions {
    pub fn hybrid() -> Self {
        Self::default()
    }

    pub fn spread() -> Self {
        Self {
            scheduling_type: SchedulingType::Spread,
            ..Self::default()
        }
    }

    pub fn random() -> Self {
        Self {
            scheduling_type: SchedulingType::Random,
            ..Self::default()
        }
    }

    pub fn node_affinity(node_id: NodeID, soft: bool) -> Self {
        Self {
            scheduling_type: SchedulingType::NodeAffinity,
            node_affinity_node_id: Some(node_id),
            node_affinity_soft: soft,
            ..Self::default()
        }
    }

    pub fn bundle(strategy: tidal_proto::gcs::PlacementStrategy) -> Self {
        use tidal_proto::gcs::PlacementStrategy;
        let scheduling_type = match strategy {
            PlacementStrategy::Pack => SchedulingType::BundlePack,
            PlacementStrategy::Spread => SchedulingType::BundleSpread,
            PlacementStrategy::StrictPack => SchedulingType::BundleStrictPack,
            PlacementStrategy::StrictSpread => SchedulingType::BundleStrictSpread,
            PlacementStrategy::AffinityWithBundle => SchedulingType::AffinityWithBundle,
        };
        Self {
            scheduling_type,
            ..Self::default()
        }
    }
}

/// Gang scheduling outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleSchedulingResult {
    /// One node per bundle, in bundle order.
    Success(Vec<NodeID>),
    /// Not possible right now; retry after cluster state changes.
    Failed,
    /// Never possible with the current cluster shape.
    Infeasible,
}

fn is_unit_instance_resource(name: &str) -> bool {
    name == CPU_RESOURCE || name == GPU_RESOURCE
}

/// Allocate `amount` greedily across instance slots.
fn allocate_from_instances(slots: &mut [FixedPoint], amount: FixedPoint) -> Vec<FixedPoint> {
    let mut alloc = vec![FixedPoint::ZERO; slots.len()];
    let mut remaining = amount;

    for (i, slot) in slots.iter_mut().enumerate() {
        if remaining.is_zero() {
            break;
        }
        if *slot >= remaining {
            alloc[i] = remaining;
            *slot -= remaining;
            remaining = FixedPoint::ZERO;
        } else if slot.is_positive() {
            alloc[i] = *slot;
            remaining -= *slot;
            *slot = FixedPoint::ZERO;
        }
    }
    alloc
}
