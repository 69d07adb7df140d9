// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Wait manager: satisfy `Wait(ids, num_required, timeout)` calls.
//!
//! A wait completes when `num_required` of the requested objects are local,
//! or when the timeout fires, whichever comes first. Local arrivals are fed
//! in by the object manager's add events.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use tidal_common::id::ObjectID;

/// Outcome of one wait call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitResult {
    pub ready: Vec<ObjectID>,
    pub remaining: Vec<ObjectID>,
}

type WaitId = u64;

struct WaitState {
    wanted: Vec<ObjectID>,
    ready: HashSet<ObjectID>,
    num_required: usize,
    notify: Option<oneshot::Sender<()>>,
}

/// Tracks in-flight waits.
pub struct WaitManager {
    next_id: Mutex<WaitId>,
    waits: Mutex<HashMap<WaitId, WaitState>>,
}

impl WaitManager {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            waits: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for `num_required` of `object_ids`, using `is_local` for the
    /// initial scan, up to `timeout`.
    pub async fn wait(
        &self,
        object_ids: Vec<ObjectID>,
        num_required: usize,
        timeout: Duration,
        is_local: impl Fn(&ObjectID) -> bool,
    ) -> WaitResult {
        let num_required = num_required.min(object_ids.len());
        let ready: HashSet<ObjectID> = object_ids
            .iter()
            .filter(|oid| is_local(oid))
            .copied()
            .collect();

        if ready.len() >= num_required {
            return Self::result(&object_ids, &ready);
        }

        let (tx, rx) = oneshot::channel();
        let wait_id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.waits.lock().insert(
            wait_id,
            WaitState {
                wanted: object_ids.clone(),
                ready,
                num_required,
                notify: Some(tx),
            },
        );

        let _ = tokio::time::timeout(timeout, rx).await;

        let state = self.waits.lock().remove(&wait_id);
        match state {
            Some(state) => Self::result(&object_ids, &state.ready),
            None => Self::result(&object_ids, &HashSet::new()),
        }
    }

    /// Feed a local arrival into every matching wait.
    pub fn on_object_local(&self, object_id: &ObjectID) {
        let mut waits = self.waits.lock();
        for state in waits.values_mut() {
            if state.wanted.contains(object_id) && state.ready.insert(*object_id) {
                if state.ready.len() >= state.num_required {
                    if let Some(tx) = state.notify.take() {
                        let _ = tx.send(());
                    }
                }
            }
        }
    }

    pub fn num_pending_waits(&self) -> usize {
        self.waits.lock().len()
    }

    fn result(wanted: &[ObjectID], ready: &HashSet<ObjectID>) -> WaitResult {
        WaitResult {
            ready: wanted
                .iter()
                .filter(|o| ready.contains(*o))
                .copied()
                .collect(),
            remaining: wanted
                .iter()
                .filter(|o| !ready.contains(*o))
                .copied()
                .collect(),
        }
    }
}

impl Default for WaitManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn make_oid(val: u8) -> ObjectID {
        let mut data = [0u8; 28];
        data[0] = val;
        ObjectID::from_binary(&data)
    }

    #[tokio::test]
    async fn test_wait_satisfied_immediately() {
        let manager = WaitManager::new();
        let o1 = make_oid(1);
        let result = manager
            .wait(vec![o1], 1, Duration::from_millis(10), |_| true)
            .await;
        assert_eq!(result.ready, vec![o1]);
        assert!(result.remaining.is_empty());
    }

    #[tokio::test]
    async fn test_wait_times_out_with_partial_results() {
        let manager = WaitManager::new();
        let o1 = make_oid(1);
        let o2 = make_oid(2);
        let result = manager
            .wait(
                vec![o1, o2],
                2,
                Duration::from_millis(20),
                |oid| *oid == o1,
            )
            .await;
        assert_eq!(result.ready, vec![o1]);
        assert_eq!(result.remaining, vec![o2]);
        assert_eq!(manager.num_pending_waits(), 0);
    }

    #[tokio::test]
    async fn test_wait_completes_on_arrival() {
        let manager = Arc::new(WaitManager::new());
        let o1 = make_oid(1);

        let m = Arc::clone(&manager);
        let handle = tokio::spawn(async move {
            m.wait(vec![o1], 1, Duration::from_secs(2), |_| false).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.on_object_local(&o1);

        let result = handle.await.unwrap();
        assert_eq!(result.ready, vec![o1]);
    }

    #[tokio::test]
    async fn test_num_required_capped_at_len() {
        let manager = WaitManager::new();
        let o1 = make_oid(1);
        let result = manager
            .wait(vec![o1], 5, Duration::from_millis(10), |_| true)
            .await;
        assert_eq!(result.ready, vec![o1]);
    }

    #[tokio::test]
    async fn test_partial_requirement() {
        let manager = Arc::new(WaitManager::new());
        let o1 = make_oid(1);
        let o2 = make_oid(2);
        let o3 = make_oid(3);

        let m = Arc::clone(&manager);
        let handle = tokio::spawn(async move {
            m.wait(vec![o1, o2, o3], 2, Duration::from_secs(2), |_| false)
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.on_object_local(&o1);
        manager.on_object_local(&o3);

        let result = handle.await.unwrap();
        assert_eq!(result.ready.len(), 2);
        assert_eq!(result.remaining, vec![o2]);
    }
}
