// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The consumer side of streaming channels.
//!
//! Messages deliver in strictly increasing id order per channel; duplicates
//! (possible at AT_LEAST_ONCE after failure) drop silently; a gap asks the
//! producer for a replay. A barrier aligns once every inbound channel has
//! seen its id; the caller then acknowledges the checkpoint to all
//! producers.

use std::collections::HashMap;

use tidal_common::id::ChannelID;
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::streaming::{StreamingEnvelope, StreamingMessage, StreamingMessageKind};

use crate::Reliability;

/// What one envelope produced.
#[derive(Debug, Default)]
pub struct ReaderEvent {
    /// Messages delivered to the application, in id order.
    pub delivered: Vec<StreamingMessage>,
    /// Set when a barrier id has been seen on every inbound channel; the
    /// caller acknowledges the checkpoint.
    pub barrier_aligned: Option<u64>,
    /// Set when a gap was detected; the caller sends a `PullRequest` with
    /// this id.
    pub replay_from: Option<u64>,
}

struct ChannelState {
    last_received_id: u64,
    last_barrier_id: u64,
}

/// Consumer endpoint over one or more inbound channels.
pub struct DataReader {
    reliability: Reliability,
    dst_actor_id: Vec<u8>,
    channels: HashMap<ChannelID, ChannelState>,
}

impl DataReader {
    pub fn new(dst_actor_id: Vec<u8>, reliability: Reliability) -> Self {
        Self {
            reliability,
            dst_actor_id,
            channels: HashMap::new(),
        }
    }

    /// Register an inbound channel, optionally resuming from a checkpointed
    /// message id.
    pub fn add_channel(&mut self, channel_id: ChannelID, resume_after_id: u64) {
        self.channels.insert(
            channel_id,
            ChannelState {
                last_received_id: resume_after_id,
                last_barrier_id: 0,
            },
        );
    }

    /// Consume one envelope.
    pub fn on_envelope(&mut self, envelope: &StreamingEnvelope) -> TidalResult<ReaderEvent> {
        let channel_id = ChannelID::try_from_binary(&envelope.channel_id);
        let state = self
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| {
                TidalError::channel_error(format!("unknown channel {}", channel_id.hex()))
            })?;

        let mut event = ReaderEvent::default();
        match StreamingMessageKind::try_from(envelope.kind) {
            Ok(StreamingMessageKind::Data) | Ok(StreamingMessageKind::PullData) => {
                let Some(bundle) = &envelope.bundle else {
                    return Err(TidalError::channel_error("data envelope without bundle"));
                };
                if bundle.last_message_id <= state.last_received_id {
                    // A full duplicate; drop it.
                    return Ok(event);
                }
                if bundle.first_message_id > state.last_received_id + 1 {
                    // Missing messages: ask for a replay instead of
                    // delivering out of order.
                    tracing::debug!(
                        channel_id = %channel_id.hex(),
                        have = state.last_received_id,
                        got = bundle.first_message_id,
                        "gap in channel; requesting replay"
                    );
                    event.replay_from = Some(state.last_received_id);
                    return Ok(event);
                }
                for message in &bundle.messages {
                    if message.message_id <= state.last_received_id {
                        // Partial overlap after a replay; duplicates drop.
                        continue;
                    }
                    if message.message_id != state.last_received_id + 1 {
                        return Err(TidalError::channel_error(format!(
                            "non-contiguous message id {} after {}",
                            message.message_id, state.last_received_id
                        )));
                    }
                    state.last_received_id = message.message_id;
                    event.delivered.push(message.clone());
                }
            }
            Ok(StreamingMessageKind::Barrier) => {
                if envelope.barrier_id > state.last_barrier_id {
                    state.last_barrier_id = envelope.barrier_id;
                }
                let barrier_id = envelope.barrier_id;
                if self
                    .channels
                    .values()
                    .all(|s| s.last_barrier_id >= barrier_id)
                {
                    event.barrier_aligned = Some(barrier_id);
                }
            }
            Ok(StreamingMessageKind::Empty)
            | Ok(StreamingMessageKind::CheckStatus)
            | Ok(StreamingMessageKind::GetLastMessageId) => {}
            _ => {
                return Err(TidalError::channel_error(format!(
                    "unexpected envelope kind {} on consumer",
                    envelope.kind
                )));
            }
        }
        Ok(event)
    }

    /// Build the checkpoint acknowledgement for one producer.
    pub fn make_ack(&self, channel_id: &ChannelID, barrier_id: u64) -> StreamingEnvelope {
        StreamingEnvelope {
            src_actor_id: self.dst_actor_id.clone(),
            dst_actor_id: Vec::new(),
            channel_id: channel_id.binary(),
            kind: StreamingMessageKind::Notification as i32,
            bundle: None,
            from_message_id: 0,
            last_message_id: self
                .channels
                .get(channel_id)
                .map(|s| s.last_received_id)
                .unwrap_or(0),
            barrier_id,
        }
    }

    /// Build a replay request for one channel.
    pub fn make_pull_request(&self, channel_id: &ChannelID) -> StreamingEnvelope {
        StreamingEnvelope {
            src_actor_id: self.dst_actor_id.clone(),
            dst_actor_id: Vec::new(),
            channel_id: channel_id.binary(),
            kind: StreamingMessageKind::PullRequest as i32,
            bundle: None,
            from_message_id: self
                .channels
                .get(channel_id)
                .map(|s| s.last_received_id)
                .unwrap_or(0),
            last_message_id: 0,
            barrier_id: 0,
        }
    }

    pub fn last_received_id(&self, channel_id: &ChannelID) -> u64 {
        self.channels
            .get(channel_id)
            .map(|s| s.last_received_id)
            .unwrap_or(0)
    }

    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}
