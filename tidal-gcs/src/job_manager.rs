// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Job table management.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use tidal_common::id::JobID;
use tidal_proto::common::Address;
use tidal_proto::gcs::{JobTableData, PubMessage};

use crate::pubsub_handler::{ChannelType, PubSubHandler};
use crate::table_storage::GcsTableStorage;

/// Assigns job ids and records job lifecycles.
pub struct GcsJobManager {
    jobs: RwLock<HashMap<JobID, JobTableData>>,
    table_storage: Arc<GcsTableStorage>,
    pubsub: Arc<PubSubHandler>,
}

impl GcsJobManager {
    pub fn new(table_storage: Arc<GcsTableStorage>, pubsub: Arc<PubSubHandler>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            table_storage,
            pubsub,
        }
    }

    /// Register a job. When `requested_id` is absent the next incremental
    /// id is assigned.
    pub async fn add_job(
        &self,
        requested_id: Option<u32>,
        driver_address: Option<Address>,
    ) -> anyhow::Result<JobID> {
        let job_id = match requested_id {
            Some(id) => JobID::from_int(id),
            None => {
                let next = self
                    .table_storage
                    .store_client()
                    .get_next_job_id()
                    .await
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                JobID::from_int(next)
            }
        };

        if self.jobs.read().contains_key(&job_id) {
            anyhow::bail!("job {} already exists", job_id.hex());
        }

        let row = JobTableData {
            job_id: job_id.binary(),
            is_dead: false,
            driver_address,
            start_time_ms: tidal_util::time::current_time_ms(),
            end_time_ms: 0,
        };
        self.table_storage
            .job_table()
            .put(&job_id.hex(), &row)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        self.jobs.write().insert(job_id, row.clone());
        self.publish(job_id, row);
        tracing::info!(job_id = %job_id.hex(), "job added");
        Ok(job_id)
    }

    /// Mark a job finished.
    pub async fn mark_job_finished(&self, job_id: &JobID) -> bool {
        let updated = {
            let mut jobs = self.jobs.write();
            match jobs.get_mut(job_id) {
                Some(row) => {
                    row.is_dead = true;
                    row.end_time_ms = tidal_util::time::current_time_ms();
                    Some(row.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(row) => {
                if let Err(e) = self.table_storage.job_table().put(&job_id.hex(), &row).await {
                    tracing::warn!(job_id = %job_id.hex(), error = %e, "job finish write failed");
                }
                self.publish(*job_id, row);
                true
            }
            None => false,
        }
    }

    fn publish(&self, job_id: JobID, row: JobTableData) {
        self.pubsub.publish(PubMessage {
            channel_type: ChannelType::Job as i32,
            key_id: job_id.binary(),
            sequence_id: 0,
            inner_message: Some(tidal_proto::gcs::pub_message::InnerMessage::JobMessage(row)),
        });
    }

    pub fn get_job(&self, job_id: &JobID) -> Option<JobTableData> {
        self.jobs.read().get(job_id).cloned()
    }

    pub fn is_job_dead(&self, job_id: &JobID) -> bool {
        self.jobs.read().get(job_id).is_some_and(|j| j.is_dead)
    }

    pub fn num_jobs(&self) -> usize {
        self.jobs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_client::InMemoryStoreClient;

    fn make_manager() -> GcsJobManager {
        GcsJobManager::new(
            Arc::new(GcsTableStorage::new(Arc::new(InMemoryStoreClient::new()))),
            Arc::new(PubSubHandler::new()),
        )
    }

    #[tokio::test]
    async fn test_incremental_ids() {
        let manager = make_manager();
        let j1 = manager.add_job(None, None).await.unwrap();
        let j2 = manager.add_job(None, None).await.unwrap();
        assert_ne!(j1, j2);
        assert_eq!(j2.to_int(), j1.to_int() + 1);
    }

    #[tokio::test]
    async fn test_requested_id_and_conflict() {
        let manager = make_manager();
        let job = manager.add_job(Some(42), None).await.unwrap();
        assert_eq!(job.to_int(), 42);
        assert!(manager.add_job(Some(42), None).await.is_err());
    }

    #[tokio::test]
    async fn test_finish_job() {
        let manager = make_manager();
        let job = manager.add_job(None, None).await.unwrap();
        assert!(!manager.is_job_dead(&job));
        assert!(manager.mark_job_finished(&job).await);
        assert!(manager.is_job_dead(&job));
        assert!(!manager.mark_job_finished(&JobID::from_int(999)).await);
    }
}
