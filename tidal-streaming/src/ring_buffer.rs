// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The producer-side ring buffer.
//!
//! Holds unacknowledged messages within a fixed byte capacity. A full ring
//! rejects writes with `ChannelFull` until a checkpoint acknowledgement
//! evicts the covered prefix; replay reads straight out of the ring.

use std::collections::VecDeque;

use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::streaming::StreamingMessage;

/// Byte-bounded buffer of outgoing messages ordered by id.
pub struct RingBuffer {
    messages: VecDeque<StreamingMessage>,
    capacity_bytes: usize,
    used_bytes: usize,
}

impl RingBuffer {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity_bytes,
            used_bytes: 0,
        }
    }

    fn message_bytes(message: &StreamingMessage) -> usize {
        message.payload.len() + std::mem::size_of::<StreamingMessage>()
    }

    /// Append a message. A full ring returns `ChannelFull`; the caller
    /// retries once the consumer acknowledges a checkpoint.
    pub fn push(&mut self, message: StreamingMessage) -> TidalResult<()> {
        let bytes = Self::message_bytes(&message);
        if !self.messages.is_empty() && self.used_bytes + bytes > self.capacity_bytes {
            return Err(TidalError::channel_full(format!(
                "ring at {}/{} bytes",
                self.used_bytes, self.capacity_bytes
            )));
        }
        self.used_bytes += bytes;
        self.messages.push_back(message);
        Ok(())
    }

    /// Drop every message with id ≤ `up_to_id` (checkpoint eviction).
    pub fn evict_up_to(&mut self, up_to_id: u64) {
        while let Some(front) = self.messages.front() {
            if front.message_id > up_to_id {
                break;
            }
            self.used_bytes -= Self::message_bytes(front);
            self.messages.pop_front();
        }
    }

    /// Messages with id > `from_id`, in order (replay reads).
    pub fn read_from(&self, from_id: u64) -> Vec<StreamingMessage> {
        self.messages
            .iter()
            .filter(|m| m.message_id > from_id)
            .cloned()
            .collect()
    }

    pub fn first_id(&self) -> Option<u64> {
        self.messages.front().map(|m| m.message_id)
    }

    pub fn last_id(&self) -> Option<u64> {
        self.messages.back().map(|m| m.message_id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }
}
