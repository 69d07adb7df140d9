// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Node registration with the control service.
//!
//! On startup a node announces its identity, endpoint, and declared
//! resources. The reply carries a snapshot of the alive nodes, which seeds
//! the node's cluster resource view and peer endpoint table.

use std::collections::BTreeMap;

use tidal_common::id::NodeID;
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::gcs::{NodeTableData, RegisterNodeReply, RegisterNodeRequest};
use tidal_rpc::client::RpcClient;
use tidal_rpc::method;

/// Build this node's registration row.
pub fn node_table_data(
    node_id: &NodeID,
    node_manager_address: &str,
    node_manager_port: u16,
    resources_total: &BTreeMap<String, f64>,
) -> NodeTableData {
    let mut node = NodeTableData {
        node_id: node_id.binary(),
        node_manager_address: node_manager_address.to_string(),
        node_manager_port: node_manager_port as u32,
        ..Default::default()
    };
    for (name, amount) in resources_total {
        node.resources_total.insert(name.clone(), *amount);
    }
    node
}

/// Register with the control service. Returns the confirmed node id and the
/// alive-node snapshot (including the registrant).
pub async fn register_with_control_service(
    client: &RpcClient,
    node: NodeTableData,
) -> TidalResult<(NodeID, Vec<NodeTableData>)> {
    let reply: RegisterNodeReply = client
        .call(method::REGISTER_NODE, &RegisterNodeRequest { node: Some(node) })
        .await?;
    let node_id = NodeID::try_from_binary(&reply.node_id);
    if node_id.is_nil() {
        return Err(TidalError::invalid("control service returned a bad node id"));
    }
    Ok((node_id, reply.peers))
}

/// Endpoint string of a peer's node manager.
pub fn peer_endpoint(peer: &NodeTableData) -> String {
    format!("{}:{}", peer.node_manager_address, peer.node_manager_port)
}
