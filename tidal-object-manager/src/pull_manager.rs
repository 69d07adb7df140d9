// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Pull manager: decides which remote objects to fetch into the local store.
//!
//! Requests come in three classes, highest priority first: worker requests
//! (arguments of a task already blocked), get requests (user `Get` calls),
//! and pre-dispatch task-argument requests. Requests are FIFO within a class
//! and activate as a prefix of the class-ordered list while the sum of their
//! object sizes stays within the memory budget. Each wanted object gets one
//! outstanding pull to exactly one chosen location; if the location does not
//! produce the object within the pull timeout the manager rotates to another
//! location (or to the spill URL) with exponential backoff.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tidal_common::id::{NodeID, ObjectID};

/// Priority classes, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RequestKind {
    /// Arguments of a task currently blocked on them.
    Worker = 0,
    /// A user `Get` call.
    Get = 1,
    /// Pre-dispatch task arguments.
    TaskArgs = 2,
}

pub type RequestId = u64;

/// What the manager wants sent out after a state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullCommand {
    /// Send a pull to this node for this object.
    SendPull { object_id: ObjectID, node_id: NodeID },
    /// Restore the object from its spill URL.
    Restore { object_id: ObjectID, url: String },
}

#[derive(Debug, Default)]
struct ObjectPullState {
    locations: Vec<NodeID>,
    spilled_url: String,
    object_size: u64,
    size_known: bool,
    /// The location the outstanding pull was sent to.
    pulling_from: Option<NodeID>,
    next_attempt_at_ms: u64,
    num_attempts: u32,
    request_ids: BTreeSet<RequestId>,
}

struct PullRequestState {
    kind: RequestKind,
    /// Objects still missing locally.
    missing: BTreeSet<ObjectID>,
}

/// The pull manager. Callers drive it with location updates, local-arrival
/// events, and a periodic `tick`, and dispatch the commands it returns.
pub struct PullManager {
    available_memory: u64,
    pull_timeout_ms: u64,
    next_request_id: RequestId,
    requests: HashMap<RequestId, PullRequestState>,
    /// FIFO queues per class, indexed by `RequestKind as usize`.
    queues: [VecDeque<RequestId>; 3],
    active_requests: BTreeSet<RequestId>,
    active_bytes: u64,
    objects: HashMap<ObjectID, ObjectPullState>,
}

impl PullManager {
    pub fn new(available_memory: u64, pull_timeout_ms: u64) -> Self {
        Self {
            available_memory,
            pull_timeout_ms,
            next_request_id: 1,
            requests: HashMap::new(),
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            active_requests: BTreeSet::new(),
            active_bytes: 0,
            objects: HashMap::new(),
        }
    }

    /// Register a request for `objects`. Objects already local should be
    /// filtered out by the caller. Returns the request id.
    pub fn pull(&mut self, objects: Vec<ObjectID>, kind: RequestKind) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;

        for oid in &objects {
            self.objects
                .entry(*oid)
                .or_default()
                .request_ids
                .insert(id);
        }
        self.requests.insert(
            id,
            PullRequestState {
                kind,
                missing: objects.into_iter().collect(),
            },
        );
        self.queues[kind as usize].push_back(id);
        self.update_active_requests();
        id
    }

    /// Cancel a request. Returns objects no longer wanted by anyone.
    pub fn cancel(&mut self, request_id: RequestId) -> Vec<ObjectID> {
        let state = match self.requests.remove(&request_id) {
            Some(state) => state,
            None => return Vec::new(),
        };
        self.queues[state.kind as usize].retain(|id| *id != request_id);
        self.active_requests.remove(&request_id);

        let mut orphaned = Vec::new();
        for oid in &state.missing {
            if let Some(obj) = self.objects.get_mut(oid) {
                obj.request_ids.remove(&request_id);
                if obj.request_ids.is_empty() {
                    self.objects.remove(oid);
                    orphaned.push(*oid);
                }
            }
        }
        self.update_active_requests();
        orphaned
    }

    /// New cluster knowledge about an object. Returns the ids of requests
    /// that must fail with `ObjectLost`: every location is gone, there is no
    /// spill URL, and the object is not being recreated.
    pub fn on_location_update(
        &mut self,
        object_id: &ObjectID,
        locations: Vec<NodeID>,
        spilled_url: String,
        object_size: u64,
        pending_creation: bool,
    ) -> Vec<RequestId> {
        let obj = match self.objects.get_mut(object_id) {
            Some(obj) => obj,
            None => return Vec::new(),
        };

        obj.locations = locations;
        if !spilled_url.is_empty() {
            obj.spilled_url = spilled_url;
        }
        if object_size > 0 && !obj.size_known {
            obj.object_size = object_size;
            obj.size_known = true;
        }
        // A failed location choice is rotated away from on the next tick.
        if let Some(pulling_from) = obj.pulling_from {
            if !obj.locations.contains(&pulling_from) {
                obj.pulling_from = None;
                obj.next_attempt_at_ms = 0;
            }
        }

        let lost = obj.locations.is_empty() && obj.spilled_url.is_empty() && !pending_creation;
        let failed: Vec<RequestId> = if lost {
            obj.request_ids.iter().copied().collect()
        } else {
            Vec::new()
        };

        self.update_active_requests();
        failed
    }

    /// The object arrived in the local store. Returns requests that are now
    /// fully satisfied.
    pub fn on_object_local(&mut self, object_id: &ObjectID) -> Vec<RequestId> {
        let obj = match self.objects.remove(object_id) {
            Some(obj) => obj,
            None => return Vec::new(),
        };

        let mut completed = Vec::new();
        for request_id in obj.request_ids {
            if let Some(req) = self.requests.get_mut(&request_id) {
                req.missing.remove(object_id);
                if req.missing.is_empty() {
                    completed.push(request_id);
                }
            }
        }
        for request_id in &completed {
            if let Some(state) = self.requests.remove(request_id) {
                self.queues[state.kind as usize].retain(|id| id != request_id);
            }
            self.active_requests.remove(request_id);
        }
        self.update_active_requests();
        completed
    }

    /// Update the memory budget (capacity minus store bytes in use).
    pub fn set_available_memory(&mut self, available_memory: u64) {
        self.available_memory = available_memory;
        self.update_active_requests();
    }

    /// Decide which pulls to (re)send now.
    pub fn tick(&mut self, now_ms: u64) -> Vec<PullCommand> {
        let mut commands = Vec::new();
        let pull_timeout_ms = self.pull_timeout_ms;

        let mut wanted: Vec<ObjectID> = Vec::new();
        for request_id in &self.active_requests {
            if let Some(req) = self.requests.get(request_id) {
                wanted.extend(req.missing.iter().copied());
            }
        }
        wanted.sort();
        wanted.dedup();

        for oid in wanted {
            let obj = match self.objects.get_mut(&oid) {
                Some(obj) => obj,
                None => continue,
            };
            if now_ms < obj.next_attempt_at_ms {
                continue;
            }

            if obj.locations.is_empty() {
                if !obj.spilled_url.is_empty() {
                    obj.num_attempts += 1;
                    obj.next_attempt_at_ms = now_ms + backoff_ms(pull_timeout_ms, obj.num_attempts);
                    obj.pulling_from = None;
                    commands.push(PullCommand::Restore {
                        object_id: oid,
                        url: obj.spilled_url.clone(),
                    });
                }
                continue;
            }

            // Rotate deterministically through the known locations.
            let index = obj.num_attempts as usize % obj.locations.len();
            let node_id = obj.locations[index];
            obj.pulling_from = Some(node_id);
            obj.num_attempts += 1;
            obj.next_attempt_at_ms = now_ms + backoff_ms(pull_timeout_ms, obj.num_attempts);
            commands.push(PullCommand::SendPull {
                object_id: oid,
                node_id,
            });
        }

        commands
    }

    /// Recompute the active prefix: walk the class-ordered request list and
    /// activate while the byte budget holds. A request with unknown object
    /// sizes counts as zero until the sizes are learned.
    fn update_active_requests(&mut self) {
        let mut active = BTreeSet::new();
        let mut active_bytes = 0u64;

        'outer: for queue in &self.queues {
            for request_id in queue {
                let req = match self.requests.get(request_id) {
                    Some(req) => req,
                    None => continue,
                };
                let request_bytes: u64 = req
                    .missing
                    .iter()
                    .filter_map(|oid| self.objects.get(oid))
                    .map(|obj| obj.object_size)
                    .sum();
                if !active.is_empty() && active_bytes + request_bytes > self.available_memory {
                    // The next request does not fit; stop raising.
                    break 'outer;
                }
                active_bytes += request_bytes;
                active.insert(*request_id);
            }
        }

        self.active_requests = active;
        self.active_bytes = active_bytes;
    }

    pub fn is_active(&self, request_id: RequestId) -> bool {
        self.active_requests.contains(&request_id)
    }

    pub fn num_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn num_active_requests(&self) -> usize {
        self.active_requests.len()
    }

    /// Bytes of object payload the active requests may pull concurrently.
    pub fn num_active_bytes(&self) -> u64 {
        self.active_bytes
    }

    pub fn num_objects_wanted(&self) -> usize {
        self.objects.len()
    }
}

/// Exponential retry delay: the pull timeout doubled per attempt, capped.
fn backoff_ms(pull_timeout_ms: u64, attempts: u32) -> u64 {
    let factor = 1u64 << attempts.saturating_sub(1).min(6);
    pull_timeout_ms * factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_oid(val: u8) -> ObjectID {
        let mut data = [0u8; 28];
        data[0] = val;
        ObjectID::from_binary(&data)
    }

    fn make_nid(val: u8) -> NodeID {
        let mut data = [0u8; 28];
        data[0] = val;
        NodeID::from_binary(&data)
    }

    fn with_location(pm: &mut PullManager, oid: ObjectID, node: NodeID, size: u64) {
        let failed = pm.on_location_update(&oid, vec![node], String::new(), size, false);
        assert!(failed.is_empty());
    }

    #[test]
    fn test_pull_and_complete() {
        let mut pm = PullManager::new(1 << 20, 1000);
        let o1 = make_oid(1);
        let o2 = make_oid(2);
        let id = pm.pull(vec![o1, o2], RequestKind::Get);
        assert!(pm.is_active(id));

        assert!(pm.on_object_local(&o1).is_empty());
        assert_eq!(pm.on_object_local(&o2), vec![id]);
        assert_eq!(pm.num_requests(), 0);
        assert_eq!(pm.num_objects_wanted(), 0);
    }

    #[test]
    fn test_cancel_reports_orphans() {
        let mut pm = PullManager::new(1 << 20, 1000);
        let o1 = make_oid(1);
        let shared = make_oid(2);
        let id1 = pm.pull(vec![o1, shared], RequestKind::Get);
        let _id2 = pm.pull(vec![shared], RequestKind::TaskArgs);

        let orphaned = pm.cancel(id1);
        // `shared` is still wanted by the second request.
        assert_eq!(orphaned, vec![o1]);
        assert_eq!(pm.num_objects_wanted(), 1);
    }

    #[test]
    fn test_tick_sends_one_pull_per_object() {
        let mut pm = PullManager::new(1 << 20, 1000);
        let o1 = make_oid(1);
        let node = make_nid(1);
        pm.pull(vec![o1], RequestKind::Get);
        with_location(&mut pm, o1, node, 100);

        let commands = pm.tick(0);
        assert_eq!(
            commands,
            vec![PullCommand::SendPull {
                object_id: o1,
                node_id: node
            }]
        );
        // Within the timeout window nothing is re-sent.
        assert!(pm.tick(500).is_empty());
        // After the timeout the pull is retried.
        assert_eq!(pm.tick(1001).len(), 1);
    }

    #[test]
    fn test_location_rotation_on_timeout() {
        let mut pm = PullManager::new(1 << 20, 1000);
        let o1 = make_oid(1);
        let n1 = make_nid(1);
        let n2 = make_nid(2);
        pm.pull(vec![o1], RequestKind::Get);
        pm.on_location_update(&o1, vec![n1, n2], String::new(), 10, false);

        let first = pm.tick(0);
        let second = pm.tick(10_000_000);
        let node_of = |cmds: &[PullCommand]| match &cmds[0] {
            PullCommand::SendPull { node_id, .. } => *node_id,
            other => panic!("unexpected command {other:?}"),
        };
        assert_ne!(node_of(&first), node_of(&second));
    }

    #[test]
    fn test_spill_restore_when_no_locations() {
        let mut pm = PullManager::new(1 << 20, 1000);
        let o1 = make_oid(1);
        pm.pull(vec![o1], RequestKind::Worker);
        pm.on_location_update(&o1, vec![], "file:///spill/x".into(), 10, false);

        let commands = pm.tick(0);
        assert_eq!(
            commands,
            vec![PullCommand::Restore {
                object_id: o1,
                url: "file:///spill/x".into()
            }]
        );
    }

    #[test]
    fn test_object_lost_fails_requests() {
        let mut pm = PullManager::new(1 << 20, 1000);
        let o1 = make_oid(1);
        let id = pm.pull(vec![o1], RequestKind::Get);

        let failed = pm.on_location_update(&o1, vec![], String::new(), 0, false);
        assert_eq!(failed, vec![id]);
    }

    #[test]
    fn test_pending_creation_is_not_lost() {
        let mut pm = PullManager::new(1 << 20, 1000);
        let o1 = make_oid(1);
        pm.pull(vec![o1], RequestKind::Get);
        let failed = pm.on_location_update(&o1, vec![], String::new(), 0, true);
        assert!(failed.is_empty());
    }

    #[test]
    fn test_priority_worker_over_get_over_args() {
        // Budget fits only one sized request at a time.
        let mut pm = PullManager::new(100, 1000);
        let o_args = make_oid(1);
        let o_get = make_oid(2);
        let o_worker = make_oid(3);
        let node = make_nid(1);

        let id_args = pm.pull(vec![o_args], RequestKind::TaskArgs);
        let id_get = pm.pull(vec![o_get], RequestKind::Get);
        let id_worker = pm.pull(vec![o_worker], RequestKind::Worker);

        with_location(&mut pm, o_args, node, 80);
        with_location(&mut pm, o_get, node, 80);
        with_location(&mut pm, o_worker, node, 80);

        // Only the worker request fits; it outranks the earlier arrivals.
        assert!(pm.is_active(id_worker));
        assert!(!pm.is_active(id_get));
        assert!(!pm.is_active(id_args));

        // Once the worker request completes, the get request activates.
        pm.on_object_local(&o_worker);
        assert!(pm.is_active(id_get));
        assert!(!pm.is_active(id_args));
    }

    #[test]
    fn test_budget_respected() {
        let mut pm = PullManager::new(150, 1000);
        let o1 = make_oid(1);
        let o2 = make_oid(2);
        let node = make_nid(1);
        let id1 = pm.pull(vec![o1], RequestKind::Get);
        let id2 = pm.pull(vec![o2], RequestKind::Get);
        with_location(&mut pm, o1, node, 100);
        with_location(&mut pm, o2, node, 100);

        assert!(pm.is_active(id1));
        assert!(!pm.is_active(id2));
        assert!(pm.num_active_bytes() <= 150);

        // Inactive requests produce no pulls.
        let commands = pm.tick(0);
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_first_active_even_if_over_budget() {
        // A single request larger than the budget still activates; otherwise
        // it could never complete.
        let mut pm = PullManager::new(10, 1000);
        let o1 = make_oid(1);
        let id = pm.pull(vec![o1], RequestKind::Get);
        with_location(&mut pm, o1, make_nid(1), 1000);
        assert!(pm.is_active(id));
    }

    #[test]
    fn test_fifo_within_class() {
        let mut pm = PullManager::new(100, 1000);
        let o1 = make_oid(1);
        let o2 = make_oid(2);
        let node = make_nid(1);
        let id1 = pm.pull(vec![o1], RequestKind::Get);
        let id2 = pm.pull(vec![o2], RequestKind::Get);
        with_location(&mut pm, o1, node, 80);
        with_location(&mut pm, o2, node, 80);

        assert!(pm.is_active(id1));
        assert!(!pm.is_active(id2));

        pm.cancel(id1);
        assert!(pm.is_active(id2));
    }

    #[test]
    fn test_memory_shrink_deactivates_tail() {
        let mut pm = PullManager::new(200, 1000);
        let o1 = make_oid(1);
        let o2 = make_oid(2);
        let node = make_nid(1);
        let id1 = pm.pull(vec![o1], RequestKind::Get);
        let id2 = pm.pull(vec![o2], RequestKind::Get);
        with_location(&mut pm, o1, node, 80);
        with_location(&mut pm, o2, node, 80);
        assert!(pm.is_active(id1) && pm.is_active(id2));

        pm.set_available_memory(100);
        assert!(pm.is_active(id1));
        assert!(!pm.is_active(id2));
    }
}
