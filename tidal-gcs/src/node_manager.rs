// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Node table management: registration, death, draining.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use tidal_common::id::NodeID;
use tidal_common::scheduling::ResourceSet;
use tidal_node::cluster_resource_manager::ClusterResourceManager;
use tidal_node::scheduling_resources::NodeResources;
use tidal_proto::gcs::{NodeState, NodeTableData, PubMessage};

use crate::pubsub_handler::{ChannelType, PubSubHandler};
use crate::table_storage::GcsTableStorage;

/// The scheduler-facing resource view of a node row.
pub fn node_resources_from_table(node: &NodeTableData) -> NodeResources {
    let total = ResourceSet::from_map(
        node.resources_total.iter().map(|(k, v)| (k.clone(), *v)),
    );
    let mut resources = NodeResources::new(total);
    resources.is_draining = node.is_draining;
    resources.draining_deadline_ms = node.draining_deadline_ms;
    resources
}

/// Tracks every node known to the cluster. Writes go to the node table
/// first, then a notification is published on the node channel. When a
/// resource mirror is attached, registration, death and draining keep the
/// scheduler's cluster view in sync.
pub struct GcsNodeManager {
    alive_nodes: RwLock<HashMap<NodeID, NodeTableData>>,
    dead_nodes: RwLock<HashMap<NodeID, NodeTableData>>,
    table_storage: Arc<GcsTableStorage>,
    pubsub: Arc<PubSubHandler>,
    resource_mirror: RwLock<Option<Arc<ClusterResourceManager>>>,
}

impl GcsNodeManager {
    pub fn new(table_storage: Arc<GcsTableStorage>, pubsub: Arc<PubSubHandler>) -> Self {
        Self {
            alive_nodes: RwLock::new(HashMap::new()),
            dead_nodes: RwLock::new(HashMap::new()),
            table_storage,
            pubsub,
            resource_mirror: RwLock::new(None),
        }
    }

    /// Attach the cluster resource view the scheduler books against. Nodes
    /// already known are mirrored immediately.
    pub fn set_resource_mirror(&self, mirror: Arc<ClusterResourceManager>) {
        for (node_id, node) in self.alive_nodes.read().iter() {
            mirror.add_or_update_node(*node_id, node_resources_from_table(node));
        }
        *self.resource_mirror.write() = Some(mirror);
    }

    fn with_mirror(&self, apply: impl FnOnce(&ClusterResourceManager)) {
        if let Some(mirror) = self.resource_mirror.read().as_ref() {
            apply(mirror);
        }
    }

    /// Load persisted nodes after a control-service restart.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        let rows = self
            .table_storage
            .node_table()
            .get_all()
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        let mut alive = self.alive_nodes.write();
        let mut dead = self.dead_nodes.write();
        for (key, node) in rows {
            let node_id = NodeID::from_hex(&key);
            if node.state == NodeState::Alive as i32 {
                self.with_mirror(|mirror| {
                    mirror.add_or_update_node(node_id, node_resources_from_table(&node));
                });
                alive.insert(node_id, node);
            } else {
                dead.insert(node_id, node);
            }
        }
        Ok(())
    }

    /// Register a node (or refresh its registration).
    pub async fn register_node(&self, mut node: NodeTableData) -> anyhow::Result<NodeID> {
        let node_id = NodeID::try_from_binary(&node.node_id);
        if node_id.is_nil() {
            anyhow::bail!("bad node id in registration");
        }
        node.state = NodeState::Alive as i32;

        self.table_storage
            .node_table()
            .put(&node_id.hex(), &node)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        self.alive_nodes.write().insert(node_id, node.clone());
        self.with_mirror(|mirror| {
            mirror.add_or_update_node(node_id, node_resources_from_table(&node));
        });
        self.publish(node_id, node);
        tracing::info!(node_id = %node_id.hex(), "node registered");
        Ok(node_id)
    }

    /// Mark a node dead and publish the tombstone. Returns the node's final
    /// row when it was alive.
    pub async fn on_node_dead(&self, node_id: &NodeID) -> Option<NodeTableData> {
        let mut node = self.alive_nodes.write().remove(node_id)?;
        node.state = NodeState::Dead as i32;

        if let Err(e) = self
            .table_storage
            .node_table()
            .put(&node_id.hex(), &node)
            .await
        {
            tracing::warn!(node_id = %node_id.hex(), error = %e, "node tombstone write failed");
        }

        self.dead_nodes.write().insert(*node_id, node.clone());
        self.with_mirror(|mirror| {
            mirror.remove_node(node_id);
        });
        self.publish(*node_id, node.clone());
        tracing::warn!(node_id = %node_id.hex(), "node is dead");
        Some(node)
    }

    /// Record that a node is draining; the scheduler stops placing new work
    /// on it.
    pub async fn set_node_draining(&self, node_id: &NodeID, deadline_ms: u64) -> bool {
        let updated = {
            let mut alive = self.alive_nodes.write();
            match alive.get_mut(node_id) {
                Some(node) => {
                    node.is_draining = true;
                    node.draining_deadline_ms = deadline_ms;
                    Some(node.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(node) => {
                if let Err(e) = self
                    .table_storage
                    .node_table()
                    .put(&node_id.hex(), &node)
                    .await
                {
                    tracing::warn!(node_id = %node_id.hex(), error = %e, "drain write failed");
                }
                self.with_mirror(|mirror| {
                    mirror.set_node_draining(node_id, deadline_ms);
                });
                self.publish(*node_id, node);
                true
            }
            None => false,
        }
    }

    fn publish(&self, node_id: NodeID, node: NodeTableData) {
        self.pubsub.publish(PubMessage {
            channel_type: ChannelType::Node as i32,
            key_id: node_id.binary(),
            sequence_id: 0,
            inner_message: Some(tidal_proto::gcs::pub_message::InnerMessage::NodeMessage(
                node,
            )),
        });
    }

    pub fn get_node(&self, node_id: &NodeID) -> Option<NodeTableData> {
        self.alive_nodes
            .read()
            .get(node_id)
            .cloned()
            .or_else(|| self.dead_nodes.read().get(node_id).cloned())
    }

    pub fn get_alive_nodes(&self) -> Vec<NodeTableData> {
        self.alive_nodes.read().values().cloned().collect()
    }

    pub fn alive_node_ids(&self) -> Vec<NodeID> {
        self.alive_nodes.read().keys().copied().collect()
    }

    pub fn is_alive(&self, node_id: &NodeID) -> bool {
        self.alive_nodes.read().contains_key(node_id)
    }

    pub fn num_alive_nodes(&self) -> usize {
        self.alive_nodes.read().len()
    }
}
