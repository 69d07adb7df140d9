// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Typed tables over the raw store client.
//!
//! Rows are prost-encoded and keyed by the hex rendering of the entity id.

use std::collections::HashMap;
use std::sync::Arc;

use prost::Message;

use crate::store_client::{StoreClient, StoreError, StoreResult};

/// Well-known table names.
pub mod table_names {
    pub const JOB: &str = "Job";
    pub const NODE: &str = "Node";
    pub const ACTOR: &str = "Actor";
    pub const PLACEMENT_GROUP: &str = "PlacementGroup";
    pub const WORKER: &str = "Worker";
}

/// One typed table.
pub struct GcsTable<V: Message + Default> {
    table_name: String,
    store_client: Arc<dyn StoreClient>,
    _row: std::marker::PhantomData<V>,
}

impl<V: Message + Default> GcsTable<V> {
    pub fn new(table_name: &str, store_client: Arc<dyn StoreClient>) -> Self {
        Self {
            table_name: table_name.to_string(),
            store_client,
            _row: std::marker::PhantomData,
        }
    }

    pub async fn put(&self, key: &str, value: &V) -> StoreResult<bool> {
        self.store_client
            .put(&self.table_name, key, value.encode_to_vec(), true)
            .await
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<V>> {
        match self.store_client.get(&self.table_name, key).await? {
            Some(data) => Ok(Some(V::decode(data.as_slice()).map_err(|e| {
                StoreError::Internal(format!("row decode: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    pub async fn get_all(&self) -> StoreResult<HashMap<String, V>> {
        let raw = self.store_client.get_all(&self.table_name).await?;
        let mut result = HashMap::new();
        for (key, data) in raw {
            let value = V::decode(data.as_slice())
                .map_err(|e| StoreError::Internal(format!("row decode: {e}")))?;
            result.insert(key, value);
        }
        Ok(result)
    }

    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.store_client.delete(&self.table_name, key).await
    }

    pub async fn batch_delete(&self, keys: &[String]) -> StoreResult<i64> {
        self.store_client.batch_delete(&self.table_name, keys).await
    }
}

/// All tables, created once at server startup.
pub struct GcsTableStorage {
    store_client: Arc<dyn StoreClient>,
}

impl GcsTableStorage {
    pub fn new(store_client: Arc<dyn StoreClient>) -> Self {
        Self { store_client }
    }

    pub fn store_client(&self) -> &Arc<dyn StoreClient> {
        &self.store_client
    }

    pub fn job_table(&self) -> GcsTable<tidal_proto::gcs::JobTableData> {
        GcsTable::new(table_names::JOB, self.store_client.clone())
    }

    pub fn node_table(&self) -> GcsTable<tidal_proto::gcs::NodeTableData> {
        GcsTable::new(table_names::NODE, self.store_client.clone())
    }

    pub fn actor_table(&self) -> GcsTable<tidal_proto::gcs::ActorTableData> {
        GcsTable::new(table_names::ACTOR, self.store_client.clone())
    }

    pub fn placement_group_table(&self) -> GcsTable<tidal_proto::gcs::PlacementGroupTableData> {
        GcsTable::new(table_names::PLACEMENT_GROUP, self.store_client.clone())
    }

    pub fn worker_table(&self) -> GcsTable<tidal_proto::gcs::WorkerTableData> {
        GcsTable::new(table_names::WORKER, self.store_client.clone())
    }
}
