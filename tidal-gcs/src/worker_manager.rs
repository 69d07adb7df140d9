// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Worker failure tracking.
//!
//! A worker's death drives owner-death propagation: borrowers of objects the
//! dead worker owned learn about it through the worker channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use tidal_common::id::WorkerID;
use tidal_proto::common::Address;
use tidal_proto::gcs::{PubMessage, WorkerTableData};

use crate::pubsub_handler::{ChannelType, PubSubHandler};
use crate::table_storage::GcsTableStorage;

pub struct GcsWorkerManager {
    workers: RwLock<HashMap<WorkerID, WorkerTableData>>,
    table_storage: Arc<GcsTableStorage>,
    pubsub: Arc<PubSubHandler>,
}

impl GcsWorkerManager {
    pub fn new(table_storage: Arc<GcsTableStorage>, pubsub: Arc<PubSubHandler>) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            table_storage,
            pubsub,
        }
    }

    /// Record a worker failure and publish the delta.
    pub async fn report_worker_failure(&self, address: Address, exit_type: &str) {
        let worker_id = WorkerID::try_from_binary(&address.worker_id);
        let row = WorkerTableData {
            worker_address: Some(address),
            is_alive: false,
            exit_type: exit_type.to_string(),
            timestamp_ms: tidal_util::time::current_time_ms(),
        };

        if let Err(e) = self
            .table_storage
            .worker_table()
            .put(&worker_id.hex(), &row)
            .await
        {
            tracing::warn!(worker_id = %worker_id.hex(), error = %e, "worker failure write failed");
        }
        self.workers.write().insert(worker_id, row.clone());

        self.pubsub.publish(PubMessage {
            channel_type: ChannelType::Worker as i32,
            key_id: worker_id.binary(),
            sequence_id: 0,
            inner_message: Some(tidal_proto::gcs::pub_message::InnerMessage::WorkerMessage(
                row,
            )),
        });
        tracing::info!(worker_id = %worker_id.hex(), exit_type, "worker failure recorded");
    }

    pub fn get_worker(&self, worker_id: &WorkerID) -> Option<WorkerTableData> {
        self.workers.read().get(worker_id).cloned()
    }

    pub fn is_worker_dead(&self, worker_id: &WorkerID) -> bool {
        self.workers
            .read()
            .get(worker_id)
            .is_some_and(|w| !w.is_alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_client::InMemoryStoreClient;

    #[tokio::test]
    async fn test_failure_recorded_and_published() {
        let manager = GcsWorkerManager::new(
            Arc::new(GcsTableStorage::new(Arc::new(InMemoryStoreClient::new()))),
            Arc::new(PubSubHandler::new()),
        );
        let mut rx = manager.pubsub.subscribe(ChannelType::Worker);

        let worker_id = WorkerID::from_random();
        let address = Address {
            worker_id: worker_id.binary(),
            ip_address: "10.0.0.1".to_string(),
            port: 4000,
            node_id: vec![0; 28],
        };
        manager
            .report_worker_failure(address, "UNEXPECTED_SYSTEM_EXIT")
            .await;

        assert!(manager.is_worker_dead(&worker_id));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.key_id, worker_id.binary());
    }
}
