// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Persistence layer for control-service data.
//!
//! Two backends: an in-memory store for single-control-plane deployments and
//! a Redis-backed store for highly available ones. Tables are logical
//! namespaces; each is an independent key-value map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,
    #[error("redis error: {0}")]
    Redis(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Async KV operations organized by table.
#[async_trait::async_trait]
pub trait StoreClient: Send + Sync {
    /// Put a key-value pair. Returns true when the key already existed.
    async fn put(&self, table: &str, key: &str, data: Vec<u8>, overwrite: bool)
        -> StoreResult<bool>;

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn multi_get(&self, table: &str, keys: &[String])
        -> StoreResult<HashMap<String, Vec<u8>>>;

    async fn get_all(&self, table: &str) -> StoreResult<HashMap<String, Vec<u8>>>;

    /// Delete a key. Returns true when the key existed.
    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool>;

    /// Delete several keys, returning how many existed.
    async fn batch_delete(&self, table: &str, keys: &[String]) -> StoreResult<i64>;

    /// Next auto-incrementing job id.
    async fn get_next_job_id(&self) -> StoreResult<u32>;

    async fn get_keys(&self, table: &str, prefix: &str) -> StoreResult<Vec<String>>;

    async fn exists(&self, table: &str, key: &str) -> StoreResult<bool>;
}

// ── In-memory backend ───────────────────────────────────────────────────

/// Thread-safe in-memory store.
pub struct InMemoryStoreClient {
    tables: DashMap<String, DashMap<String, Vec<u8>>>,
    next_job_id: AtomicI64,
}

impl InMemoryStoreClient {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            next_job_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryStoreClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StoreClient for InMemoryStoreClient {
    async fn put(
        &self,
        table: &str,
        key: &str,
        data: Vec<u8>,
        overwrite: bool,
    ) -> StoreResult<bool> {
        let tbl = self.tables.entry(table.to_string()).or_default();
        let existed = tbl.contains_key(key);
        if existed && !overwrite {
            return Ok(true);
        }
        tbl.insert(key.to_string(), data);
        Ok(existed)
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .tables
            .get(table)
            .and_then(|tbl| tbl.get(key).map(|v| v.value().clone())))
    }

    async fn multi_get(
        &self,
        table: &str,
        keys: &[String],
    ) -> StoreResult<HashMap<String, Vec<u8>>> {
        let mut result = HashMap::new();
        if let Some(tbl) = self.tables.get(table) {
            for key in keys {
                if let Some(v) = tbl.get(key.as_str()) {
                    result.insert(key.clone(), v.value().clone());
                }
            }
        }
        Ok(result)
    }

    async fn get_all(&self, table: &str) -> StoreResult<HashMap<String, Vec<u8>>> {
        Ok(self
            .tables
            .get(table)
            .map(|tbl| {
                tbl.iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
        Ok(self
            .tables
            .get(table)
            .is_some_and(|tbl| tbl.remove(key).is_some()))
    }

    async fn batch_delete(&self, table: &str, keys: &[String]) -> StoreResult<i64> {
        let mut count = 0i64;
        if let Some(tbl) = self.tables.get(table) {
            for key in keys {
                if tbl.remove(key.as_str()).is_some() {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn get_next_job_id(&self) -> StoreResult<u32> {
        Ok(self.next_job_id.fetch_add(1, Ordering::SeqCst) as u32)
    }

    async fn get_keys(&self, table: &str, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .tables
            .get(table)
            .map(|tbl| {
                tbl.iter()
                    .filter(|e| e.key().starts_with(prefix))
                    .map(|e| e.key().clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn exists(&self, table: &str, key: &str) -> StoreResult<bool> {
        Ok(self.tables.get(table).is_some_and(|tbl| tbl.contains_key(key)))
    }
}

// ── Internal KV ─────────────────────────────────────────────────────────

/// Namespaced raw KV store exposed by the control service, used for
/// cluster-level bookkeeping outside the typed tables (named channels,
/// checkpoint roots). Namespaces are byte strings; prefix deletion is
/// supported.
#[async_trait::async_trait]
pub trait InternalKVInterface: Send + Sync {
    async fn get(&self, ns: &[u8], key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Returns true when the value was written (false when the key existed
    /// and `overwrite` was off).
    async fn put(&self, ns: &[u8], key: &[u8], value: Vec<u8>, overwrite: bool)
        -> StoreResult<bool>;

    /// Delete a key, or every key under it when `del_by_prefix`. Returns
    /// how many entries were removed.
    async fn del(&self, ns: &[u8], key: &[u8], del_by_prefix: bool) -> StoreResult<i64>;

    async fn exists(&self, ns: &[u8], key: &[u8]) -> StoreResult<bool>;

    async fn keys(&self, ns: &[u8], prefix: &[u8]) -> StoreResult<Vec<Vec<u8>>>;
}

/// In-memory internal KV.
pub struct InMemoryInternalKV {
    data: DashMap<Vec<u8>, DashMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryInternalKV {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }
}

impl Default for InMemoryInternalKV {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl InternalKVInterface for InMemoryInternalKV {
    async fn get(&self, ns: &[u8], key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .data
            .get(ns)
            .and_then(|ns_map| ns_map.get(key).map(|v| v.value().clone())))
    }

    async fn put(
        &self,
        ns: &[u8],
        key: &[u8],
        value: Vec<u8>,
        overwrite: bool,
    ) -> StoreResult<bool> {
        let ns_map = self.data.entry(ns.to_vec()).or_default();
        if !overwrite && ns_map.contains_key(key) {
            return Ok(false);
        }
        ns_map.insert(key.to_vec(), value);
        Ok(true)
    }

    async fn del(&self, ns: &[u8], key: &[u8], del_by_prefix: bool) -> StoreResult<i64> {
        let Some(ns_map) = self.data.get(ns) else {
            return Ok(0);
        };
        if del_by_prefix {
            let victims: Vec<Vec<u8>> = ns_map
                .iter()
                .filter(|e| e.key().starts_with(key))
                .map(|e| e.key().clone())
                .collect();
            let count = victims.len() as i64;
            for victim in victims {
                ns_map.remove(&victim);
            }
            Ok(count)
        } else {
            Ok(if ns_map.remove(key).is_some() { 1 } else { 0 })
        }
    }

    async fn exists(&self, ns: &[u8], key: &[u8]) -> StoreResult<bool> {
        Ok(self.data.get(ns).is_some_and(|ns_map| ns_map.contains_key(key)))
    }

    async fn keys(&self, ns: &[u8], prefix: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self
            .data
            .get(ns)
            .map(|ns_map| {
                ns_map
                    .iter()
                    .filter(|e| e.key().starts_with(prefix))
                    .map(|e| e.key().clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ── Redis backend ───────────────────────────────────────────────────────

/// Redis-backed store for HA control planes. Each table maps to one Redis
/// hash keyed `TIDAL<namespace>@<table>`.
pub struct RedisStoreClient {
    client: redis::Client,
    namespace: String,
}

impl RedisStoreClient {
    /// `password` is the `redis_password` control-plane credential; empty
    /// for unauthenticated deployments.
    pub fn new(redis_address: &str, password: &str, namespace: String) -> StoreResult<Self> {
        let url = if password.is_empty() {
            format!("redis://{redis_address}/")
        } else {
            format!("redis://:{password}@{redis_address}/")
        };
        let client = redis::Client::open(url).map_err(|e| StoreError::Redis(e.to_string()))?;
        Ok(Self { client, namespace })
    }

    fn table_key(&self, table: &str) -> String {
        format!("TIDAL{}@{}", self.namespace, table)
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Redis(e.to_string()))
    }
}

#[async_trait::async_trait]
impl StoreClient for RedisStoreClient {
    async fn put(
        &self,
        table: &str,
        key: &str,
        data: Vec<u8>,
        overwrite: bool,
    ) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let table_key = self.table_key(table);
        if overwrite {
            let existed: bool = redis::cmd("HEXISTS")
                .arg(&table_key)
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Redis(e.to_string()))?;
            let _: () = redis::cmd("HSET")
                .arg(&table_key)
                .arg(key)
                .arg(data)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Redis(e.to_string()))?;
            Ok(existed)
        } else {
            let added: bool = redis::cmd("HSETNX")
                .arg(&table_key)
                .arg(key)
                .arg(data)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Redis(e.to_string()))?;
            Ok(!added)
        }
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        redis::cmd("HGET")
            .arg(self.table_key(table))
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e.to_string()))
    }

    async fn multi_get(
        &self,
        table: &str,
        keys: &[String],
    ) -> StoreResult<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(self.table_key(table));
        for key in keys {
            cmd.arg(key.as_str());
        }
        let values: Vec<Option<Vec<u8>>> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e.to_string()))?;
        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key.clone(), v)))
            .collect())
    }

    async fn get_all(&self, table: &str) -> StoreResult<HashMap<String, Vec<u8>>> {
        let mut conn = self.connection().await?;
        redis::cmd("HGETALL")
            .arg(self.table_key(table))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e.to_string()))
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::cmd("HDEL")
            .arg(self.table_key(table))
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn batch_delete(&self, table: &str, keys: &[String]) -> StoreResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(self.table_key(table));
        for key in keys {
            cmd.arg(key.as_str());
        }
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e.to_string()))
    }

    async fn get_next_job_id(&self) -> StoreResult<u32> {
        let mut conn = self.connection().await?;
        let id: i64 = redis::cmd("INCR")
            .arg(format!("TIDAL{}@NextJobID", self.namespace))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e.to_string()))?;
        Ok(id as u32)
    }

    async fn get_keys(&self, table: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let all = self.get_all(table).await?;
        Ok(all.into_keys().filter(|k| k.starts_with(prefix)).collect())
    }

    async fn exists(&self, table: &str, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        redis::cmd("HEXISTS")
            .arg(self.table_key(table))
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryStoreClient::new();
        assert!(!store.put("T", "k", b"v1".to_vec(), true).await.unwrap());
        assert_eq!(store.get("T", "k").await.unwrap(), Some(b"v1".to_vec()));
        assert!(store.delete("T", "k").await.unwrap());
        assert!(!store.delete("T", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_no_overwrite_preserves_value() {
        let store = InMemoryStoreClient::new();
        store.put("T", "k", b"v1".to_vec(), true).await.unwrap();
        let existed = store.put("T", "k", b"v2".to_vec(), false).await.unwrap();
        assert!(existed);
        assert_eq!(store.get("T", "k").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn test_get_all_and_prefix_keys() {
        let store = InMemoryStoreClient::new();
        store.put("T", "a_1", b"1".to_vec(), true).await.unwrap();
        store.put("T", "a_2", b"2".to_vec(), true).await.unwrap();
        store.put("T", "b_1", b"3".to_vec(), true).await.unwrap();

        assert_eq!(store.get_all("T").await.unwrap().len(), 3);
        assert_eq!(store.get_keys("T", "a_").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_delete_counts_existing() {
        let store = InMemoryStoreClient::new();
        store.put("T", "a", b"1".to_vec(), true).await.unwrap();
        store.put("T", "b", b"2".to_vec(), true).await.unwrap();
        let deleted = store
            .batch_delete("T", &["a".into(), "b".into(), "ghost".into()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn test_job_ids_increment() {
        let store = InMemoryStoreClient::new();
        assert_eq!(store.get_next_job_id().await.unwrap(), 1);
        assert_eq!(store.get_next_job_id().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let store = InMemoryStoreClient::new();
        store.put("A", "k", b"a".to_vec(), true).await.unwrap();
        assert!(store.get("B", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_internal_kv_roundtrip() {
        let kv = InMemoryInternalKV::new();
        assert!(kv.put(b"ns", b"k", b"v".to_vec(), true).await.unwrap());
        assert!(!kv.put(b"ns", b"k", b"v2".to_vec(), false).await.unwrap());
        assert_eq!(kv.get(b"ns", b"k").await.unwrap(), Some(b"v".to_vec()));
        assert!(kv.exists(b"ns", b"k").await.unwrap());
        assert_eq!(kv.del(b"ns", b"k", false).await.unwrap(), 1);
        assert!(!kv.exists(b"ns", b"k").await.unwrap());
    }

    #[tokio::test]
    async fn test_internal_kv_prefix_delete() {
        let kv = InMemoryInternalKV::new();
        kv.put(b"ns", b"ckpt/1", b"a".to_vec(), true).await.unwrap();
        kv.put(b"ns", b"ckpt/2", b"b".to_vec(), true).await.unwrap();
        kv.put(b"ns", b"other", b"c".to_vec(), true).await.unwrap();

        assert_eq!(kv.keys(b"ns", b"ckpt/").await.unwrap().len(), 2);
        assert_eq!(kv.del(b"ns", b"ckpt/", true).await.unwrap(), 2);
        assert!(kv.exists(b"ns", b"other").await.unwrap());
    }
}
