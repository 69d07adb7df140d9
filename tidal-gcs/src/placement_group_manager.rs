// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Placement group lifecycle and the two-phase commit over nodes.
//!
//! Creation computes a gang assignment, prepares every bundle on its node,
//! and commits only on unanimous prepare success; any failure returns all
//! prepared bundles and re-queues the group with exponential backoff. A node
//! death moves affected groups to RESCHEDULING and re-runs prepare/commit
//! for the lost bundles only. Users never observe a partially committed
//! group.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;

use tidal_common::id::{NodeID, PlacementGroupID};
use tidal_common::scheduling::ResourceSet;
use tidal_common::status::{TidalError, TidalResult};
use tidal_node::scheduling_policy::BundleSchedulingPolicy;
use tidal_node::scheduling_resources::{
    BundleSchedulingResult, NodeResources, SchedulingOptions,
};
use tidal_proto::gcs::{
    Bundle, PlacementGroupState, PlacementGroupTableData, PlacementStrategy, PubMessage,
};
use tidal_util::backoff::ExponentialBackoff;

use crate::node_manager::GcsNodeManager;
use crate::pubsub_handler::{ChannelType, PubSubHandler};
use crate::table_storage::GcsTableStorage;

/// Transport to the node daemons' bundle resource managers.
#[async_trait::async_trait]
pub trait BundleResourceClient: Send + Sync {
    /// Returns true when the node prepared every bundle.
    async fn prepare_bundles(&self, node_id: &NodeID, bundles: Vec<Bundle>) -> TidalResult<bool>;
    async fn commit_bundles(&self, node_id: &NodeID, bundles: Vec<Bundle>) -> TidalResult<()>;
    async fn return_bundles(&self, node_id: &NodeID, bundles: Vec<Bundle>) -> TidalResult<()>;
}

/// The control service's placement group manager.
pub struct GcsPlacementGroupManager {
    groups: RwLock<HashMap<PlacementGroupID, PlacementGroupTableData>>,
    named_groups: RwLock<HashMap<(String, String), PlacementGroupID>>,
    /// Resources committed per node, deducted from the scheduling view.
    reserved: RwLock<HashMap<NodeID, ResourceSet>>,
    table_storage: Arc<GcsTableStorage>,
    pubsub: Arc<PubSubHandler>,
    node_manager: Arc<GcsNodeManager>,
    node_client: Arc<dyn BundleResourceClient>,
    policy: BundleSchedulingPolicy,
    /// Wakes `wait_placement_group_ready` on any state change.
    state_changed: Notify,
}

impl GcsPlacementGroupManager {
    pub fn new(
        table_storage: Arc<GcsTableStorage>,
        pubsub: Arc<PubSubHandler>,
        node_manager: Arc<GcsNodeManager>,
        node_client: Arc<dyn BundleResourceClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            groups: RwLock::new(HashMap::new()),
            named_groups: RwLock::new(HashMap::new()),
            reserved: RwLock::new(HashMap::new()),
            table_storage,
            pubsub,
            node_manager,
            node_client,
            policy: BundleSchedulingPolicy,
            state_changed: Notify::new(),
        })
    }

    /// Register a group and kick off scheduling. Resolves once the group is
    /// registered, not once it is committed; use
    /// [`wait_placement_group_ready`](Self::wait_placement_group_ready) for
    /// the latter.
    pub async fn create_placement_group(
        self: &Arc<Self>,
        mut pg: PlacementGroupTableData,
    ) -> TidalResult<PlacementGroupID> {
        let pg_id = PlacementGroupID::try_from_binary(&pg.placement_group_id);
        if pg_id.is_nil() {
            return Err(TidalError::invalid_argument("bad placement group id"));
        }
        if pg.bundles.is_empty() {
            return Err(TidalError::invalid_argument("a group needs bundles"));
        }
        if !pg.name.is_empty() {
            let key = (pg.namespace.clone(), pg.name.clone());
            if self.named_groups.read().contains_key(&key) {
                return Err(TidalError::already_exists(format!(
                    "placement group named '{}' already exists in namespace '{}'",
                    pg.name, pg.namespace
                )));
            }
        }

        pg.state = PlacementGroupState::Pending as i32;
        for (index, bundle) in pg.bundles.iter_mut().enumerate() {
            bundle.placement_group_id = pg.placement_group_id.clone();
            bundle.bundle_index = index as i64;
            bundle.node_id = Vec::new();
        }

        self.write_and_publish(pg_id, pg.clone()).await;
        if !pg.name.is_empty() {
            self.named_groups
                .write()
                .insert((pg.namespace.clone(), pg.name.clone()), pg_id);
        }
        self.groups.write().insert(pg_id, pg);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.schedule_with_backoff(pg_id).await;
        });

        tracing::info!(pg_id = %pg_id.hex(), "placement group registered");
        Ok(pg_id)
    }

    /// Retry scheduling with exponential backoff until the group commits,
    /// is removed, or turns out infeasible.
    pub async fn schedule_with_backoff(self: &Arc<Self>, pg_id: PlacementGroupID) {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), 2.0, Duration::from_secs(10));
        loop {
            match self.try_schedule_once(&pg_id).await {
                Ok(true) => return,
                Ok(false) => return, // removed or infeasible; nothing to retry
                Err(err) => {
                    tracing::debug!(pg_id = %pg_id.hex(), error = %err, "placement retry");
                    tokio::time::sleep(backoff.next_delay_with_jitter()).await;
                }
            }
        }
    }

    /// One prepare/commit attempt over the group's unplaced bundles.
    ///
    /// `Ok(true)` means the group committed, `Ok(false)` that scheduling is
    /// over for another reason (removed / infeasible), and `Err` that the
    /// attempt should be retried.
    pub async fn try_schedule_once(&self, pg_id: &PlacementGroupID) -> TidalResult<bool> {
        let pg = match self.groups.read().get(pg_id) {
            Some(pg) => pg.clone(),
            None => return Ok(false),
        };
        if pg.state == PlacementGroupState::Removed as i32 {
            return Ok(false);
        }
        if pg.state == PlacementGroupState::Committed as i32 {
            return Ok(true);
        }

        let strategy = PlacementStrategy::try_from(pg.strategy)
            .unwrap_or(PlacementStrategy::Pack);

        // Only unplaced bundles get scheduled; a reschedule keeps the
        // surviving assignments.
        let lost: Vec<usize> = pg
            .bundles
            .iter()
            .enumerate()
            .filter(|(_, b)| b.node_id.is_empty())
            .map(|(i, _)| i)
            .collect();
        if lost.is_empty() {
            return Ok(true);
        }

        let requests: Vec<ResourceSet> = lost
            .iter()
            .map(|&i| {
                ResourceSet::from_map(
                    pg.bundles[i]
                        .unit_resources
                        .iter()
                        .map(|(k, v)| (k.clone(), *v)),
                )
            })
            .collect();
        let request_refs: Vec<&ResourceSet> = requests.iter().collect();

        let mut view = self.scheduling_view();
        if strategy == PlacementStrategy::StrictSpread {
            // Nodes already hosting a surviving bundle are excluded.
            for bundle in &pg.bundles {
                if !bundle.node_id.is_empty() {
                    view.remove(&NodeID::try_from_binary(&bundle.node_id));
                }
            }
        }

        let assignment = match self.policy.schedule(
            &request_refs,
            &SchedulingOptions::bundle(strategy),
            &view,
        ) {
            BundleSchedulingResult::Success(nodes) => nodes,
            BundleSchedulingResult::Failed => {
                return Err(TidalError::out_of_resource(format!(
                    "group {} does not fit the cluster right now",
                    pg_id.hex()
                )));
            }
            BundleSchedulingResult::Infeasible => {
                tracing::warn!(
                    pg_id = %pg_id.hex(),
                    "placement group can never be satisfied by the current cluster"
                );
                return Ok(false);
            }
        };

        // Phase 1: prepare on every chosen node.
        let mut by_node: BTreeMap<NodeID, Vec<Bundle>> = BTreeMap::new();
        for (slot, node_id) in assignment.iter().enumerate() {
            let mut bundle = pg.bundles[lost[slot]].clone();
            bundle.node_id = node_id.binary();
            by_node.entry(*node_id).or_default().push(bundle);
        }

        let mut prepared: Vec<(NodeID, Vec<Bundle>)> = Vec::new();
        for (node_id, bundles) in &by_node {
            let ok = self
                .node_client
                .prepare_bundles(node_id, bundles.clone())
                .await
                .unwrap_or(false);
            if ok {
                prepared.push((*node_id, bundles.clone()));
            } else {
                // Roll back everything prepared so far; the group stays
                // PENDING and is retried with backoff.
                for (prepared_node, prepared_bundles) in prepared {
                    let _ = self
                        .node_client
                        .return_bundles(&prepared_node, prepared_bundles)
                        .await;
                }
                self.set_state(pg_id, PlacementGroupState::Pending, |_| {}).await;
                return Err(TidalError::out_of_resource(format!(
                    "prepare failed on node {}",
                    node_id.hex()
                )));
            }
        }

        self.set_state(pg_id, PlacementGroupState::Prepared, |pg| {
            for (slot, node_id) in assignment.iter().enumerate() {
                pg.bundles[lost[slot]].node_id = node_id.binary();
            }
        })
        .await;

        // Phase 2: commit everywhere. Commit is idempotent on the node side.
        for (node_id, bundles) in &by_node {
            if let Err(err) = self.node_client.commit_bundles(node_id, bundles.clone()).await {
                tracing::warn!(node_id = %node_id.hex(), error = %err, "bundle commit failed");
            }
        }

        // Book the committed resources in the scheduling view.
        {
            let mut reserved = self.reserved.write();
            for (node_id, bundles) in &by_node {
                let entry = reserved.entry(*node_id).or_default();
                for bundle in bundles {
                    entry.add(&ResourceSet::from_map(
                        bundle.unit_resources.iter().map(|(k, v)| (k.clone(), *v)),
                    ));
                }
            }
        }

        self.set_state(pg_id, PlacementGroupState::Committed, |_| {}).await;
        tracing::info!(pg_id = %pg_id.hex(), "placement group committed");
        Ok(true)
    }

    /// Remove a group: cancel pending scheduling, return every bundle, and
    /// publish the REMOVED state. Named lookups miss afterwards.
    pub async fn remove_placement_group(&self, pg_id: &PlacementGroupID) -> TidalResult<()> {
        let pg = self
            .set_state(pg_id, PlacementGroupState::Removed, |_| {})
            .await
            .ok_or_else(|| {
                TidalError::not_found(format!("placement group {} unknown", pg_id.hex()))
            })?;

        if !pg.name.is_empty() {
            self.named_groups
                .write()
                .remove(&(pg.namespace.clone(), pg.name.clone()));
        }

        let mut by_node: BTreeMap<NodeID, Vec<Bundle>> = BTreeMap::new();
        for bundle in &pg.bundles {
            if !bundle.node_id.is_empty() {
                by_node
                    .entry(NodeID::try_from_binary(&bundle.node_id))
                    .or_default()
                    .push(bundle.clone());
            }
        }
        for (node_id, bundles) in by_node {
            self.release_reservation(&node_id, &bundles);
            if let Err(err) = self.node_client.return_bundles(&node_id, bundles).await {
                tracing::debug!(node_id = %node_id.hex(), error = %err, "bundle return failed");
            }
        }

        tracing::info!(pg_id = %pg_id.hex(), "placement group removed");
        Ok(())
    }

    /// A node died: groups with committed bundles there go RESCHEDULING and
    /// only the lost bundles are re-placed.
    pub async fn on_node_dead(self: &Arc<Self>, node_id: &NodeID) {
        self.reserved.write().remove(node_id);

        let affected: Vec<PlacementGroupID> = self
            .groups
            .read()
            .iter()
            .filter(|(_, pg)| {
                pg.state == PlacementGroupState::Committed as i32
                    && pg
                        .bundles
                        .iter()
                        .any(|b| b.node_id == node_id.binary())
            })
            .map(|(id, _)| *id)
            .collect();

        for pg_id in affected {
            self.set_state(&pg_id, PlacementGroupState::Rescheduling, |pg| {
                for bundle in pg.bundles.iter_mut() {
                    if bundle.node_id == node_id.binary() {
                        bundle.node_id = Vec::new();
                    }
                }
            })
            .await;
            tracing::warn!(pg_id = %pg_id.hex(), node_id = %node_id.hex(), "rescheduling lost bundles");

            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.schedule_with_backoff(pg_id).await;
            });
        }
    }

    /// Wait until the group is COMMITTED (true) or REMOVED / timed out
    /// (false). A zero timeout polls the current state without blocking.
    pub async fn wait_placement_group_ready(
        &self,
        pg_id: &PlacementGroupID,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.groups.read().get(pg_id).map(|pg| pg.state) {
                Some(state) if state == PlacementGroupState::Committed as i32 => return true,
                Some(state) if state == PlacementGroupState::Removed as i32 => return false,
                None => return false,
                _ => {}
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let _ = tokio::time::timeout(remaining, self.state_changed.notified()).await;
        }
    }

    // ── internals ───────────────────────────────────────────────────────

    /// The gang-scheduling view: each alive node's declared total minus the
    /// resources already committed to groups.
    fn scheduling_view(&self) -> BTreeMap<NodeID, NodeResources> {
        let reserved = self.reserved.read();
        let mut view = BTreeMap::new();
        for node in self.node_manager.get_alive_nodes() {
            let node_id = NodeID::try_from_binary(&node.node_id);
            if node_id.is_nil() || node.is_draining {
                continue;
            }
            let total = ResourceSet::from_map(
                node.resources_total.iter().map(|(k, v)| (k.clone(), *v)),
            );
            let mut resources = NodeResources::new(total);
            if let Some(taken) = reserved.get(&node_id) {
                resources.available.subtract(taken);
            }
            view.insert(node_id, resources);
        }
        view
    }

    fn release_reservation(&self, node_id: &NodeID, bundles: &[Bundle]) {
        let mut reserved = self.reserved.write();
        if let Some(entry) = reserved.get_mut(node_id) {
            for bundle in bundles {
                entry.subtract(&ResourceSet::from_map(
                    bundle.unit_resources.iter().map(|(k, v)| (k.clone(), *v)),
                ));
            }
            if entry.is_empty() {
                reserved.remove(node_id);
            }
        }
    }

    async fn set_state(
        &self,
        pg_id: &PlacementGroupID,
        state: PlacementGroupState,
        mutate: impl FnOnce(&mut PlacementGroupTableData),
    ) -> Option<PlacementGroupTableData> {
        let row = {
            let mut groups = self.groups.write();
            let pg = groups.get_mut(pg_id)?;
            pg.state = state as i32;
            mutate(pg);
            pg.clone()
        };
        self.write_and_publish(*pg_id, row.clone()).await;
        self.state_changed.notify_waiters();
        Some(row)
    }

    async fn write_and_publish(&self, pg_id: PlacementGroupID, row: PlacementGroupTableData) {
        if let Err(e) = self
            .table_storage
            .placement_group_table()
            .put(&pg_id.hex(), &row)
            .await
        {
            tracing::warn!(pg_id = %pg_id.hex(), error = %e, "placement group write failed");
        }
        self.pubsub.publish(PubMessage {
            channel_type: ChannelType::PlacementGroup as i32,
            key_id: pg_id.binary(),
            sequence_id: 0,
            inner_message: Some(
                tidal_proto::gcs::pub_message::InnerMessage::PlacementGroupMessage(row),
            ),
        });
    }

    // ── queries ─────────────────────────────────────────────────────────

    pub fn get_placement_group(&self, pg_id: &PlacementGroupID) -> Option<PlacementGroupTableData> {
        self.groups.read().get(pg_id).cloned()
    }

    pub fn get_named_placement_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<PlacementGroupTableData> {
        let pg_id = *self
            .named_groups
            .read()
            .get(&(namespace.to_string(), name.to_string()))?;
        self.groups.read().get(&pg_id).cloned()
    }

    pub fn num_placement_groups(&self) -> usize {
        self.groups.read().len()
    }
}
