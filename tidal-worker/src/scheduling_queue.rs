// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Per-caller scheduling queues.
//!
//! Each caller→callee pair numbers its requests with strictly monotonic,
//! gapless sequence numbers, and every request carries the highest sequence
//! number the caller has a reply for (`client_processed_up_to`). The queue
//! admits a request when its number is next (ordered variant) or as soon as
//! its dependencies are resolved (out-of-order variant); anything at or
//! below `client_processed_up_to` is stale and dropped. A hole in the
//! sequence stalls the ordered queue until the missing request arrives.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::Notify;

use tidal_common::id::TaskID;
use tidal_common::status::{TidalError, TidalResult};

/// Message used when a request is superseded or explicitly cancelled.
pub const STALE_RPC_MESSAGE: &str = "client cancelled stale rpc";

struct QueueState {
    next_sequence_number: i64,
    client_processed_up_to: i64,
    cancelled: HashSet<TaskID>,
    /// Sequence numbers rejected by cancellation; the head skips over them
    /// instead of stalling on the hole.
    skipped: BTreeSet<i64>,
    stopped: bool,
}

impl QueueState {
    fn advance_past_skipped(&mut self) {
        while self.skipped.remove(&self.next_sequence_number) {
            self.next_sequence_number += 1;
        }
    }
}

/// One caller's queue on the callee.
pub struct SchedulingQueue {
    ordered: bool,
    inner: Mutex<QueueState>,
    turn_changed: Notify,
}

impl SchedulingQueue {
    /// The default actor queue: strict sequence order.
    pub fn new_ordered() -> Self {
        Self::new(true)
    }

    /// Dependency-driven release; still honors staleness.
    pub fn new_out_of_order() -> Self {
        Self::new(false)
    }

    fn new(ordered: bool) -> Self {
        Self {
            ordered,
            inner: Mutex::new(QueueState {
                next_sequence_number: 0,
                client_processed_up_to: -1,
                cancelled: HashSet::new(),
                skipped: BTreeSet::new(),
                stopped: false,
            }),
            turn_changed: Notify::new(),
        }
    }

    /// Admit one request: wait for its turn (ordered), run the caller's
    /// release step (dependency resolution and, typically, acquiring the
    /// execution-pool slot), then advance the queue. Because the release
    /// step runs while the request holds the head, execution slots are
    /// granted in sequence order. Errors reject the request without
    /// running it.
    pub async fn admit<F, T>(
        &self,
        sequence_number: i64,
        client_processed_up_to: i64,
        task_id: TaskID,
        resolve_dependencies: F,
    ) -> TidalResult<T>
    where
        F: Future<Output = TidalResult<T>>,
    {
        // Wait for this request's turn.
        loop {
            let notified = self.turn_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if state.stopped {
                    return Err(TidalError::disconnected("scheduling queue stopped"));
                }

                // Fast-forward past everything the caller already saw
                // replied; those sequence numbers never arrive again.
                if client_processed_up_to >= state.client_processed_up_to {
                    state.client_processed_up_to = client_processed_up_to;
                    if state.next_sequence_number <= client_processed_up_to {
                        state.next_sequence_number = client_processed_up_to + 1;
                        self.turn_changed.notify_waiters();
                    }
                }

                if sequence_number <= state.client_processed_up_to {
                    return Err(TidalError::scheduling_cancelled(STALE_RPC_MESSAGE));
                }
                if state.cancelled.remove(&task_id) {
                    // The hole left by the cancelled request must not stall
                    // its successors.
                    if self.ordered {
                        if state.next_sequence_number == sequence_number {
                            state.next_sequence_number = sequence_number + 1;
                        } else if sequence_number > state.next_sequence_number {
                            state.skipped.insert(sequence_number);
                        }
                        state.advance_past_skipped();
                        self.turn_changed.notify_waiters();
                    }
                    return Err(TidalError::scheduling_cancelled(STALE_RPC_MESSAGE));
                }

                if !self.ordered || sequence_number == state.next_sequence_number {
                    break;
                }
            }
            notified.await;
        }

        // Head of the queue (or out-of-order): dependencies gate release.
        // An unresolved dependency stalls every later request of an ordered
        // queue, by design of the sequence contract.
        let resolved = resolve_dependencies.await;

        if self.ordered {
            let mut state = self.inner.lock();
            if state.next_sequence_number == sequence_number {
                state.next_sequence_number = sequence_number + 1;
            }
            state.advance_past_skipped();
        }
        self.turn_changed.notify_waiters();
        resolved
    }

    /// Reject a request that has not been released yet. A later `admit` (or
    /// a waiter already buffered) observes the cancellation and rejects
    /// with [`STALE_RPC_MESSAGE`]. Running tasks are not interrupted.
    pub fn cancel_task_if_found(&self, task_id: TaskID) {
        self.inner.lock().cancelled.insert(task_id);
        self.turn_changed.notify_waiters();
    }

    /// Reject every waiter and refuse future requests.
    pub fn stop(&self) {
        self.inner.lock().stopped = true;
        self.turn_changed.notify_waiters();
    }

    pub fn next_sequence_number(&self) -> i64 {
        self.inner.lock().next_sequence_number
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }
}
