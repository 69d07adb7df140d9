// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Runtime configuration.
//!
//! A plain struct with defaults; values come from a JSON document (optionally
//! base64-encoded, as handed over by a launcher) with `TIDAL_<field>`
//! environment overrides applied last. The config is passed explicitly into
//! constructors; there is no process-global instance.

use std::collections::BTreeMap;

use crate::constants::{DEFAULT_MAX_BYTES_IN_FLIGHT, DEFAULT_OBJECT_CHUNK_SIZE};

/// Recognized runtime options.
#[derive(Debug, Clone)]
pub struct TidalConfig {
    /// Endpoint of the global control service, `ip:port`.
    pub cluster_address: String,
    /// Address this node advertises to peers.
    pub node_ip_address: String,
    /// Port of the per-node daemon.
    pub node_manager_port: u16,

    /// Shared-memory object store capacity in bytes (-1 = auto).
    pub object_store_memory: i64,
    /// Chunk size for inter-node object transfers.
    pub object_chunk_size: u64,
    /// Cap on outbound transfer bytes in flight.
    pub max_bytes_in_flight: u64,
    /// How long a single pull attempt may wait before trying another location.
    pub pull_timeout_ms: u64,
    /// How long a push may remain unacknowledged before it is retried.
    pub push_timeout_ms: u64,
    /// Period of the object manager's housekeeping timer.
    pub timer_freq_ms: u64,

    /// Control-plane credential for the Redis-backed store.
    pub redis_password: String,
    /// Paths user functions are loaded from (consumed by bindings).
    pub code_search_path: Vec<String>,
    /// Job id; assigned randomly when absent.
    pub job_id: Option<u32>,

    /// Node resource declarations.
    pub num_cpus: f64,
    pub num_gpus: f64,
    pub resources: BTreeMap<String, i64>,

    /// Delay before a failed task is retried.
    pub task_retry_delay_ms: u64,
}

impl Default for TidalConfig {
    fn default() -> Self {
        Self {
            cluster_address: "127.0.0.1:6379".to_string(),
            node_ip_address: "127.0.0.1".to_string(),
            node_manager_port: 0,
            object_store_memory: -1,
            object_chunk_size: DEFAULT_OBJECT_CHUNK_SIZE,
            max_bytes_in_flight: DEFAULT_MAX_BYTES_IN_FLIGHT,
            pull_timeout_ms: 10_000,
            push_timeout_ms: 10_000,
            timer_freq_ms: 100,
            redis_password: String::new(),
            code_search_path: Vec::new(),
            job_id: None,
            num_cpus: 0.0,
            num_gpus: 0.0,
            resources: BTreeMap::new(),
            task_retry_delay_ms: 0,
        }
    }
}

impl TidalConfig {
    /// Parse from a base64-encoded JSON document.
    pub fn from_base64_json(b64: &str) -> Result<Self, String> {
        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64)
            .map_err(|e| format!("base64 decode error: {e}"))?;
        let json_str = String::from_utf8(decoded).map_err(|e| format!("utf-8 error: {e}"))?;
        Self::from_json(&json_str)
    }

    /// Parse from a JSON document; unknown keys are ignored.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(json).map_err(|e| format!("json parse error: {e}"))?;

        let mut config = Self::default();

        macro_rules! set_field {
            ($field:ident, String) => {
                if let Some(v) = map.get(stringify!($field)).and_then(|v| v.as_str()) {
                    config.$field = v.to_string();
                }
            };
            ($field:ident, u16) => {
                if let Some(v) = map.get(stringify!($field)).and_then(|v| v.as_u64()) {
                    config.$field = v as u16;
                }
            };
            ($field:ident, u64) => {
                if let Some(v) = map.get(stringify!($field)).and_then(|v| v.as_u64()) {
                    config.$field = v;
                }
            };
            ($field:ident, i64) => {
                if let Some(v) = map.get(stringify!($field)).and_then(|v| v.as_i64()) {
                    config.$field = v;
                }
            };
            ($field:ident, f64) => {
                if let Some(v) = map.get(stringify!($field)).and_then(|v| v.as_f64()) {
                    config.$field = v;
                }
            };
        }

        set_field!(cluster_address, String);
        set_field!(node_ip_address, String);
        set_field!(node_manager_port, u16);
        set_field!(object_store_memory, i64);
        set_field!(object_chunk_size, u64);
        set_field!(max_bytes_in_flight, u64);
        set_field!(pull_timeout_ms, u64);
        set_field!(push_timeout_ms, u64);
        set_field!(timer_freq_ms, u64);
        set_field!(redis_password, String);
        set_field!(num_cpus, f64);
        set_field!(num_gpus, f64);
        set_field!(task_retry_delay_ms, u64);

        if let Some(v) = map.get("job_id").and_then(|v| v.as_u64()) {
            config.job_id = Some(v as u32);
        }
        if let Some(paths) = map.get("code_search_path").and_then(|v| v.as_array()) {
            config.code_search_path = paths
                .iter()
                .filter_map(|p| p.as_str().map(str::to_string))
                .collect();
        }
        if let Some(custom) = map.get("resources").and_then(|v| v.as_object()) {
            config.resources = custom
                .iter()
                .filter_map(|(k, v)| v.as_i64().map(|n| (k.clone(), n)))
                .collect();
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `TIDAL_<field>` environment overrides.
    fn apply_env_overrides(&mut self) {
        macro_rules! env_override {
            ($field:ident, String) => {
                if let Ok(val) = std::env::var(concat!("TIDAL_", stringify!($field))) {
                    self.$field = val;
                }
            };
            ($field:ident, $ty:ty) => {
                if let Ok(val) = std::env::var(concat!("TIDAL_", stringify!($field))) {
                    if let Ok(v) = val.parse::<$ty>() {
                        self.$field = v;
                    }
                }
            };
        }

        env_override!(cluster_address, String);
        env_override!(node_ip_address, String);
        env_override!(node_manager_port, u16);
        env_override!(object_store_memory, i64);
        env_override!(object_chunk_size, u64);
        env_override!(max_bytes_in_flight, u64);
        env_override!(pull_timeout_ms, u64);
        env_override!(push_timeout_ms, u64);
        env_override!(timer_freq_ms, u64);
        env_override!(redis_password, String);
    }

    /// The declared node resources as a name → quantity map.
    pub fn node_resource_map(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        if self.num_cpus > 0.0 {
            out.insert(crate::constants::CPU_RESOURCE.to_string(), self.num_cpus);
        }
        if self.num_gpus > 0.0 {
            out.insert(crate::constants::GPU_RESOURCE.to_string(), self.num_gpus);
        }
        for (name, amount) in &self.resources {
            out.insert(name.clone(), *amount as f64);
        }
        out
    }
}
