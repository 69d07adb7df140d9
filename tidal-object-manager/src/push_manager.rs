// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Push manager: round-robin chunked sender with a bytes-in-flight cap.
//!
//! Objects are cut into `chunk_size` chunks (the last one may be shorter).
//! While `bytes_in_flight < max_bytes_in_flight` the manager walks the active
//! pushes in arrival order and hands out their next chunks. A repeated push
//! request for a (destination, object) pair that still has chunks in flight
//! marks the whole object for resend: the remaining count resets to the full
//! chunk count and the cursor wraps, so every byte is delivered at least once
//! even if the receiver dropped the first attempt.

use std::collections::HashMap;

use tidal_common::constants::MAX_PUSH_CHUNK_FAILURES;
use tidal_common::id::{NodeID, ObjectID};

/// A chunk the caller should send now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkToSend {
    pub node_id: NodeID,
    pub object_id: ObjectID,
    pub chunk_index: u64,
    pub chunk_len: u64,
}

#[derive(Debug)]
struct PushState {
    num_chunks: u64,
    /// Cursor of the next chunk to hand out; wraps modulo `num_chunks`.
    next_chunk: u64,
    num_in_flight: u64,
    /// Chunks still to hand out in the current plan. A resend resets this to
    /// `num_chunks`; completion requires it and the in-flight count to both
    /// reach zero.
    num_to_send: u64,
    resend_requested: bool,
    consecutive_failures: u32,
    total_size: u64,
    started_at_ms: u64,
}

/// The push manager. Single-owner state; callers serialize access.
pub struct PushManager {
    /// Active pushes in arrival order (order drives the round-robin walk).
    push_order: Vec<(NodeID, ObjectID)>,
    push_state: HashMap<(NodeID, ObjectID), PushState>,
    chunk_size: u64,
    max_bytes_in_flight: u64,
    bytes_in_flight: u64,
}

impl PushManager {
    pub fn new(max_bytes_in_flight: u64, chunk_size: u64) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            push_order: Vec::new(),
            push_state: HashMap::new(),
            chunk_size,
            max_bytes_in_flight,
            bytes_in_flight: 0,
        }
    }

    fn num_chunks(&self, total_size: u64) -> u64 {
        if total_size == 0 {
            1
        } else {
            total_size.div_ceil(self.chunk_size)
        }
    }

    fn chunk_len(&self, total_size: u64, chunk_index: u64) -> u64 {
        let start = chunk_index * self.chunk_size;
        if start >= total_size {
            return 0;
        }
        (total_size - start).min(self.chunk_size)
    }

    /// Queue a push of `total_size` bytes to `node_id`. A duplicate request
    /// while the first is still in flight triggers a full resend. Returns
    /// true when a new push was started.
    pub fn queue_push(
        &mut self,
        node_id: NodeID,
        object_id: ObjectID,
        total_size: u64,
        now_ms: u64,
    ) -> bool {
        let key = (node_id, object_id);
        if let Some(state) = self.push_state.get_mut(&key) {
            // Resend everything; the cursor keeps its position and wraps.
            state.num_to_send = state.num_chunks;
            state.resend_requested = true;
            return false;
        }

        let num_chunks = self.num_chunks(total_size);
        self.push_state.insert(
            key,
            PushState {
                num_chunks,
                next_chunk: 0,
                num_in_flight: 0,
                num_to_send: num_chunks,
                resend_requested: false,
                consecutive_failures: 0,
                total_size,
                started_at_ms: now_ms,
            },
        );
        self.push_order.push(key);
        true
    }

    /// Hand out the next chunks to send, round-robin over active pushes,
    /// while the bytes-in-flight cap holds.
    pub fn next_chunks(&mut self) -> Vec<ChunkToSend> {
        let mut out = Vec::new();
        loop {
            let mut sent_any = false;
            for key in &self.push_order {
                let state = match self.push_state.get_mut(key) {
                    Some(state) => state,
                    None => continue,
                };
                if state.num_to_send == 0 {
                    continue;
                }
                let chunk_index = state.next_chunk;
                let start = chunk_index * self.chunk_size;
                let chunk_len = if start >= state.total_size {
                    0
                } else {
                    (state.total_size - start).min(self.chunk_size)
                };
                if self.bytes_in_flight + chunk_len > self.max_bytes_in_flight
                    && self.bytes_in_flight > 0
                {
                    continue;
                }

                state.next_chunk = (state.next_chunk + 1) % state.num_chunks;
                state.num_to_send -= 1;
                state.num_in_flight += 1;
                self.bytes_in_flight += chunk_len;
                out.push(ChunkToSend {
                    node_id: key.0,
                    object_id: key.1,
                    chunk_index,
                    chunk_len,
                });
                sent_any = true;
            }
            if !sent_any {
                break;
            }
        }
        out
    }

    /// A chunk was acknowledged. Returns true when the push completed.
    pub fn on_chunk_complete(&mut self, node_id: NodeID, object_id: ObjectID, chunk_len: u64) -> bool {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(chunk_len);
        let key = (node_id, object_id);
        let done = match self.push_state.get_mut(&key) {
            Some(state) => {
                state.num_in_flight = state.num_in_flight.saturating_sub(1);
                state.consecutive_failures = 0;
                state.num_in_flight == 0 && state.num_to_send == 0
            }
            None => false,
        };
        if done {
            self.remove_push(&key);
        }
        done
    }

    /// A chunk send failed. The chunk is released for retry (the wrapping
    /// cursor covers it on a later pass). After too many consecutive
    /// failures the push is dropped and `true` is returned so the caller can
    /// raise a push-failed notification.
    pub fn on_chunk_failed(&mut self, node_id: NodeID, object_id: ObjectID, chunk_len: u64) -> bool {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(chunk_len);
        let key = (node_id, object_id);
        let escalate = match self.push_state.get_mut(&key) {
            Some(state) => {
                state.num_in_flight = state.num_in_flight.saturating_sub(1);
                state.num_to_send += 1;
                state.consecutive_failures += 1;
                state.consecutive_failures >= MAX_PUSH_CHUNK_FAILURES
            }
            None => false,
        };
        if escalate {
            self.remove_push(&key);
        }
        escalate
    }

    /// Abandon a push outright (e.g. the destination died).
    pub fn cancel_push(&mut self, node_id: &NodeID, object_id: &ObjectID) -> bool {
        let key = (*node_id, *object_id);
        if self.push_state.contains_key(&key) {
            self.remove_push(&key);
            true
        } else {
            false
        }
    }

    /// Pushes that have been running longer than `timeout_ms`.
    pub fn timed_out_pushes(&self, now_ms: u64, timeout_ms: u64) -> Vec<(NodeID, ObjectID)> {
        self.push_state
            .iter()
            .filter(|(_, s)| now_ms.saturating_sub(s.started_at_ms) > timeout_ms)
            .map(|(key, _)| *key)
            .collect()
    }

    fn remove_push(&mut self, key: &(NodeID, ObjectID)) {
        self.push_state.remove(key);
        self.push_order.retain(|k| k != key);
    }

    pub fn is_pushing(&self, node_id: &NodeID, object_id: &ObjectID) -> bool {
        self.push_state.contains_key(&(*node_id, *object_id))
    }

    pub fn num_active_pushes(&self) -> usize {
        self.push_state.len()
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}
