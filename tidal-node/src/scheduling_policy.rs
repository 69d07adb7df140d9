// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Scheduling policies.
//!
//! Single-task policies pick one node per request; bundle policies place a
//! whole placement group. Scoring is pluggable through [`NodeScorer`]; the
//! highest-scored feasible node wins and ties break by node id so placement
//! is deterministic across schedulers.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;

use tidal_common::id::NodeID;
use tidal_common::scheduling::ResourceSet;

use crate::scheduling_resources::{
    BundleSchedulingResult, NodeResources, SchedulingOptions, SchedulingType,
};

/// Scores a candidate node for a request; higher is better, never negative.
pub trait NodeScorer: Send + Sync {
    fn score(&self, node_id: &NodeID, resources: &NodeResources, request: &ResourceSet) -> f64;
}

/// Default scorer: prefer the least critically utilized node. Utilization
/// below the spread threshold is truncated to zero so lightly loaded nodes
/// tie and the deterministic id tie-break packs onto one of them.
pub struct LeastUtilizationScorer {
    pub spread_threshold: f64,
}

impl NodeScorer for LeastUtilizationScorer {
    fn score(&self, _node_id: &NodeID, resources: &NodeResources, _request: &ResourceSet) -> f64 {
        let util = resources.critical_resource_utilization();
        let util = if util < self.spread_threshold {
            0.0
        } else {
            util
        };
        1.0 - util.min(1.0)
    }
}

/// Trait for single-task policies.
pub trait SchedulingPolicy: Send + Sync {
    fn schedule(
        &self,
        request: &ResourceSet,
        options: &SchedulingOptions,
        nodes: &BTreeMap<NodeID, NodeResources>,
        local_node_id: &NodeID,
    ) -> Option<NodeID>;
}

/// Pick the best-scored node from `candidates`, ties broken by id order.
fn best_scored(
    candidates: impl Iterator<Item = (NodeID, f64)>,
) -> Option<NodeID> {
    let mut best: Option<(NodeID, f64)> = None;
    for (id, score) in candidates {
        best = match best {
            None => Some((id, score)),
            Some((best_id, best_score)) => {
                if score > best_score || (score == best_score && id < best_id) {
                    Some((id, score))
                } else {
                    Some((best_id, best_score))
                }
            }
        };
    }
    best.map(|(id, _)| id)
}

// ── Hybrid ──────────────────────────────────────────────────────────────

/// Default policy: prefer the local node while it scores as well as anyone,
/// otherwise the best-scored available node; feasible-but-busy nodes are a
/// last resort when the caller tolerates queueing.
pub struct HybridSchedulingPolicy {
    scorer: Box<dyn NodeScorer>,
}

impl HybridSchedulingPolicy {
    pub fn new(scorer: Box<dyn NodeScorer>) -> Self {
        Self { scorer }
    }
}

impl SchedulingPolicy for HybridSchedulingPolicy {
    fn schedule(
        &self,
        request: &ResourceSet,
        options: &SchedulingOptions,
        nodes: &BTreeMap<NodeID, NodeResources>,
        local_node_id: &NodeID,
    ) -> Option<NodeID> {
        let requests_gpu = request
            .get(tidal_common::constants::GPU_RESOURCE)
            .is_positive();
        let avoid_gpu = options.avoid_gpu_nodes && !requests_gpu;

        let mut available: Vec<(NodeID, f64)> = Vec::new();
        let mut feasible_unavailable: Vec<NodeID> = Vec::new();

        for (id, nr) in nodes {
            if options.avoid_local_node && id == local_node_id {
                continue;
            }
            if avoid_gpu && nr.has_gpu() {
                continue;
            }
            if !nr.is_feasible(request) {
                continue;
            }
            if nr.is_available(request) {
                available.push((*id, self.scorer.score(id, nr, request)));
            } else if !nr.is_draining {
                feasible_unavailable.push(*id);
            }
        }

        if available.is_empty() && feasible_unavailable.is_empty() && avoid_gpu {
            let mut relaxed = options.clone();
            relaxed.avoid_gpu_nodes = false;
            return self.schedule(request, &relaxed, nodes, local_node_id);
        }

        if available.is_empty() {
            if options.require_node_available {
                return None;
            }
            return feasible_unavailable.into_iter().min();
        }

        // Local bias: keep work where it is when the local node ties with
        // the best remote candidate.
        let best_score = available
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::MIN, f64::max);
        if let Some((_, local_score)) = available.iter().find(|(id, _)| id == local_node_id) {
            if *local_score >= best_score {
                return Some(*local_node_id);
            }
        }

        best_scored(available.into_iter())
    }
}

// ── Spread ──────────────────────────────────────────────────────────────

/// Round-robin over the id-ordered node list.
pub struct SpreadSchedulingPolicy {
    next_index: std::sync::atomic::AtomicUsize,
}

impl SpreadSchedulingPolicy {
    pub fn new() -> Self {
        Self {
            next_index: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl Default for SpreadSchedulingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingPolicy for SpreadSchedulingPolicy {
    fn schedule(
        &self,
        request: &ResourceSet,
        options: &SchedulingOptions,
        nodes: &BTreeMap<NodeID, NodeResources>,
        local_node_id: &NodeID,
    ) -> Option<NodeID> {
        let ids: Vec<&NodeID> = nodes.keys().collect();
        let n = ids.len();
        if n == 0 {
            return None;
        }
        let start = self
            .next_index
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            % n;

        for pass_available in [true, false] {
            if !pass_available && options.require_node_available {
                break;
            }
            for i in 0..n {
                let id = ids[(start + i) % n];
                if options.avoid_local_node && id == local_node_id {
                    continue;
                }
                let nr = &nodes[id];
                if nr.is_draining || !nr.is_feasible(request) {
                    continue;
                }
                if pass_available && !nr.is_available(request) {
                    continue;
                }
                return Some(*id);
            }
        }
        None
    }
}

// ── Random ──────────────────────────────────────────────────────────────

/// Uniform random choice among available nodes.
pub struct RandomSchedulingPolicy;

impl SchedulingPolicy for RandomSchedulingPolicy {
    fn schedule(
        &self,
        request: &ResourceSet,
        options: &SchedulingOptions,
        nodes: &BTreeMap<NodeID, NodeResources>,
        local_node_id: &NodeID,
    ) -> Option<NodeID> {
        let candidates: Vec<NodeID> = nodes
            .iter()
            .filter(|(id, nr)| {
                nr.is_feasible(request)
                    && nr.is_available(request)
                    && !(options.avoid_local_node && *id == local_node_id)
            })
            .map(|(id, _)| *id)
            .collect();
        candidates.choose(&mut rand::thread_rng()).copied()
    }
}

// ── Node affinity ───────────────────────────────────────────────────────

/// Pin to one node; soft affinity falls back to hybrid placement.
pub struct NodeAffinitySchedulingPolicy {
    fallback: HybridSchedulingPolicy,
}

impl NodeAffinitySchedulingPolicy {
    pub fn new(scorer: Box<dyn NodeScorer>) -> Self {
        Self {
            fallback: HybridSchedulingPolicy::new(scorer),
        }
    }
}

impl SchedulingPolicy for NodeAffinitySchedulingPolicy {
    fn schedule(
        &self,
        request: &ResourceSet,
        options: &SchedulingOptions,
        nodes: &BTreeMap<NodeID, NodeResources>,
        local_node_id: &NodeID,
    ) -> Option<NodeID> {
        if let Some(target) = &options.node_affinity_node_id {
            if let Some(nr) = nodes.get(target) {
                if nr.is_feasible(request) {
                    // Hard affinity queues on the target even when busy.
                    if !options.node_affinity_soft || nr.is_available(request) {
                        return Some(*target);
                    }
                }
            }
        }
        if options.node_affinity_soft {
            return self.fallback.schedule(request, options, nodes, local_node_id);
        }
        None
    }
}

// ── Composite single-task policy ────────────────────────────────────────

/// Routes to the policy selected by the options.
pub struct CompositeSchedulingPolicy {
    hybrid: HybridSchedulingPolicy,
    spread: SpreadSchedulingPolicy,
    random: RandomSchedulingPolicy,
    node_affinity: NodeAffinitySchedulingPolicy,
}

impl CompositeSchedulingPolicy {
    pub fn new(spread_threshold: f64) -> Self {
        Self {
            hybrid: HybridSchedulingPolicy::new(Box::new(LeastUtilizationScorer {
                spread_threshold,
            })),
            spread: SpreadSchedulingPolicy::new(),
            random: RandomSchedulingPolicy,
            node_affinity: NodeAffinitySchedulingPolicy::new(Box::new(LeastUtilizationScorer {
                spread_threshold,
            })),
        }
    }
}

impl SchedulingPolicy for CompositeSchedulingPolicy {
    fn schedule(
        &self,
        request: &ResourceSet,
        options: &SchedulingOptions,
        nodes: &BTreeMap<NodeID, NodeResources>,
        local_node_id: &NodeID,
    ) -> Option<NodeID> {
        match options.scheduling_type {
            SchedulingType::Spread => self.spread.schedule(request, options, nodes, local_node_id),
            SchedulingType::Random => self.random.schedule(request, options, nodes, local_node_id),
            SchedulingType::NodeAffinity => {
                self.node_affinity
                    .schedule(request, options, nodes, local_node_id)
            }
            _ => self.hybrid.schedule(request, options, nodes, local_node_id),
        }
    }
}

// ── Bundle policies ─────────────────────────────────────────────────────

/// How much headroom a node keeps after hosting `request`; bundle policies
/// prefer the node that stays least constrained.
fn remaining_score(available: &ResourceSet, request: &ResourceSet) -> f64 {
    let mut min_remaining = f64::MAX;
    for (name, req_amount) in request.iter() {
        let remaining = (available.get(name) - req_amount).to_f64();
        min_remaining = min_remaining.min(remaining);
    }
    if min_remaining == f64::MAX {
        0.0
    } else {
        min_remaining
    }
}

fn best_fit(
    available: &BTreeMap<NodeID, ResourceSet>,
    request: &ResourceSet,
    exclude: &[NodeID],
) -> Option<NodeID> {
    best_scored(
        available
            .iter()
            .filter(|(id, avail)| !exclude.contains(id) && avail.is_superset_of(request))
            .map(|(id, avail)| (*id, remaining_score(avail, request))),
    )
}

fn any_feasible(nodes: &BTreeMap<NodeID, NodeResources>, request: &ResourceSet) -> bool {
    nodes.values().any(|nr| nr.is_feasible(request))
}

/// Gang placement over a set of bundle resource requests. Results are in
/// the original bundle order.
pub struct BundleSchedulingPolicy;

impl BundleSchedulingPolicy {
    pub fn schedule(
        &self,
        requests: &[&ResourceSet],
        options: &SchedulingOptions,
        nodes: &BTreeMap<NodeID, NodeResources>,
    ) -> BundleSchedulingResult {
        if requests.is_empty() {
            return BundleSchedulingResult::Success(vec![]);
        }
        match options.scheduling_type {
            SchedulingType::BundleStrictPack => self.strict_pack(requests, nodes),
            SchedulingType::BundleStrictSpread => self.strict_spread(requests, nodes),
            SchedulingType::BundleSpread => self.spread(requests, nodes),
            SchedulingType::AffinityWithBundle => self.affinity_with_bundle(requests, options, nodes),
            _ => self.pack(requests, nodes),
        }
    }

    /// Aggregate every bundle and host the sum on a single node.
    fn strict_pack(
        &self,
        requests: &[&ResourceSet],
        nodes: &BTreeMap<NodeID, NodeResources>,
    ) -> BundleSchedulingResult {
        let mut total = ResourceSet::new();
        for req in requests {
            total.add(req);
        }

        let chosen = best_scored(
            nodes
                .iter()
                .filter(|(_, nr)| nr.is_available(&total))
                .map(|(id, nr)| (*id, remaining_score(&nr.available, &total))),
        );
        match chosen {
            Some(node) => BundleSchedulingResult::Success(vec![node; requests.len()]),
            None if any_feasible(nodes, &total) => BundleSchedulingResult::Failed,
            None => BundleSchedulingResult::Infeasible,
        }
    }

    /// Largest bundles first; greedily keep packing the current node while
    /// further bundles still fit, then move to the next best node.
    fn pack(
        &self,
        requests: &[&ResourceSet],
        nodes: &BTreeMap<NodeID, NodeResources>,
    ) -> BundleSchedulingResult {
        for req in requests {
            if !any_feasible(nodes, req) {
                return BundleSchedulingResult::Infeasible;
            }
        }

        // Largest-first order over the original indices.
        let mut order: Vec<usize> = (0..requests.len()).collect();
        order.sort_by(|&a, &b| {
            magnitude(requests[b])
                .partial_cmp(&magnitude(requests[a]))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut available: BTreeMap<NodeID, ResourceSet> = nodes
            .iter()
            .map(|(id, nr)| (*id, nr.available.clone()))
            .collect();
        let mut assignments: Vec<Option<NodeID>> = vec![None; requests.len()];
        let mut current: Option<NodeID> = None;

        for index in order {
            let req = requests[index];
            let target = current
                .filter(|node| available[node].is_superset_of(req))
                .or_else(|| best_fit(&available, req, &[]));
            match target {
                Some(node) => {
                    available.get_mut(&node).unwrap().subtract(req);
                    assignments[index] = Some(node);
                    current = Some(node);
                }
                None => return BundleSchedulingResult::Failed,
            }
        }

        BundleSchedulingResult::Success(assignments.into_iter().map(|a| a.unwrap()).collect())
    }

    /// Prefer an unused node for each bundle; reuse selected nodes only when
    /// no fresh candidate fits.
    fn spread(
        &self,
        requests: &[&ResourceSet],
        nodes: &BTreeMap<NodeID, NodeResources>,
    ) -> BundleSchedulingResult {
        for req in requests {
            if !any_feasible(nodes, req) {
                return BundleSchedulingResult::Infeasible;
            }
        }

        let mut available: BTreeMap<NodeID, ResourceSet> = nodes
            .iter()
            .map(|(id, nr)| (*id, nr.available.clone()))
            .collect();
        let mut used: Vec<NodeID> = Vec::new();
        let mut assignments = Vec::with_capacity(requests.len());

        for req in requests {
            let chosen =
                best_fit(&available, req, &used).or_else(|| best_fit(&available, req, &[]));
            match chosen {
                Some(node) => {
                    available.get_mut(&node).unwrap().subtract(req);
                    if !used.contains(&node) {
                        used.push(node);
                    }
                    assignments.push(node);
                }
                None => return BundleSchedulingResult::Failed,
            }
        }
        BundleSchedulingResult::Success(assignments)
    }

    /// Every bundle on a distinct node.
    fn strict_spread(
        &self,
        requests: &[&ResourceSet],
        nodes: &BTreeMap<NodeID, NodeResources>,
    ) -> BundleSchedulingResult {
        if requests.len() > nodes.len() {
            return BundleSchedulingResult::Infeasible;
        }

        let mut available: BTreeMap<NodeID, ResourceSet> = nodes
            .iter()
            .map(|(id, nr)| (*id, nr.available.clone()))
            .collect();
        let mut used: Vec<NodeID> = Vec::new();
        let mut assignments = Vec::with_capacity(requests.len());

        for req in requests {
            match best_fit(&available, req, &used) {
                Some(node) => {
                    available.get_mut(&node).unwrap().subtract(req);
                    used.push(node);
                    assignments.push(node);
                }
                None => {
                    let unused_feasible = nodes
                        .iter()
                        .any(|(id, nr)| !used.contains(id) && nr.is_feasible(req));
                    return if unused_feasible {
                        BundleSchedulingResult::Failed
                    } else {
                        BundleSchedulingResult::Infeasible
                    };
                }
            }
        }
        BundleSchedulingResult::Success(assignments)
    }

    /// Constrain candidates to the nodes hosting the referenced bundle;
    /// non-GPU bundles additionally stay off GPU nodes when asked.
    fn affinity_with_bundle(
        &self,
        requests: &[&ResourceSet],
        options: &SchedulingOptions,
        nodes: &BTreeMap<NodeID, NodeResources>,
    ) -> BundleSchedulingResult {
        if options.bundle_affinity_nodes.is_empty() {
            return BundleSchedulingResult::Failed;
        }

        let candidates: BTreeMap<NodeID, NodeResources> = nodes
            .iter()
            .filter(|(id, _)| options.bundle_affinity_nodes.contains(id))
            .map(|(id, nr)| (*id, nr.clone()))
            .collect();

        let mut available: BTreeMap<NodeID, ResourceSet> = candidates
            .iter()
            .map(|(id, nr)| (*id, nr.available.clone()))
            .collect();
        let mut assignments = Vec::with_capacity(requests.len());

        for req in requests {
            let requests_gpu = req
                .get(tidal_common::constants::GPU_RESOURCE)
                .is_positive();
            let chosen = best_scored(
                available
                    .iter()
                    .filter(|(id, avail)| {
                        if options.avoid_gpu_nodes && !requests_gpu && candidates[*id].has_gpu() {
                            return false;
                        }
                        avail.is_superset_of(req)
                    })
                    .map(|(id, avail)| (*id, remaining_score(avail, req))),
            )
            // GPU avoidance is a preference, not a constraint.
            .or_else(|| best_fit(&available, req, &[]));

            match chosen {
                Some(node) => {
                    available.get_mut(&node).unwrap().subtract(req);
                    assignments.push(node);
                }
                None => {
                    let feasible = candidates.values().any(|nr| nr.is_feasible(req));
                    return if feasible {
                        BundleSchedulingResult::Failed
                    } else {
                        BundleSchedulingResult::Infeasible
                    };
                }
            }
        }
        BundleSchedulingResult::Success(assignments)
    }
}

fn magnitude(request: &ResourceSet) -> f64 {
    request.iter().map(|(_, v)| v.to_f64()).sum()
}
