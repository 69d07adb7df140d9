// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The producer side of a streaming channel.
//!
//! Messages get strictly increasing ids and logical timestamps, batch into
//! bundles (closed at a fixed message count or at a barrier, never on wall
//! time, so bundling is a pure function of the message stream), and stay
//! buffered until the consumer acknowledges a barrier checkpoint. Barriers
//! persist `(barrier_id, first, last)` snapshots; recovery resumes numbering
//! right after the last checkpoint, which makes a replayed suffix identical
//! at EXACTLY_SAME reliability.

use std::collections::VecDeque;
use std::sync::Arc;

use tidal_common::id::ChannelID;
use tidal_common::status::{TidalError, TidalResult};
use tidal_proto::streaming::{
    BarrierSnapshot, MessageBundle, StreamingEnvelope, StreamingMessage, StreamingMessageKind,
};

use crate::checkpoint::CheckpointStore;
use crate::ring_buffer::RingBuffer;
use crate::Reliability;

/// Producer endpoint of one channel.
pub struct DataWriter {
    channel_id: ChannelID,
    src_actor_id: Vec<u8>,
    dst_actor_id: Vec<u8>,
    reliability: Reliability,
    ring: RingBuffer,
    /// Closed bundles retained for replay until checkpoint-acked.
    bundles: VecDeque<MessageBundle>,
    current_bundle: Vec<StreamingMessage>,
    max_bundle_messages: usize,
    next_message_id: u64,
    last_committed_id: u64,
    last_barrier_id: u64,
    /// First message id of the running barrier epoch.
    epoch_first_id: u64,
    outgoing: VecDeque<StreamingEnvelope>,
    store: Arc<dyn CheckpointStore>,
}

impl DataWriter {
    pub fn new(
        channel_id: ChannelID,
        src_actor_id: Vec<u8>,
        dst_actor_id: Vec<u8>,
        reliability: Reliability,
        ring_capacity_bytes: usize,
        max_bundle_messages: usize,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            channel_id,
            src_actor_id,
            dst_actor_id,
            reliability,
            ring: RingBuffer::new(ring_capacity_bytes),
            bundles: VecDeque::new(),
            current_bundle: Vec::new(),
            max_bundle_messages: max_bundle_messages.max(1),
            next_message_id: 1,
            last_committed_id: 0,
            last_barrier_id: 0,
            epoch_first_id: 1,
            outgoing: VecDeque::new(),
            store,
        }
    }

    /// Recover a writer from the channel's latest checkpoint: numbering
    /// resumes right after the last snapshot's coverage.
    pub fn restore(
        channel_id: ChannelID,
        src_actor_id: Vec<u8>,
        dst_actor_id: Vec<u8>,
        reliability: Reliability,
        ring_capacity_bytes: usize,
        max_bundle_messages: usize,
        store: Arc<dyn CheckpointStore>,
    ) -> TidalResult<Self> {
        let mut writer = Self::new(
            channel_id,
            src_actor_id,
            dst_actor_id,
            reliability,
            ring_capacity_bytes,
            max_bundle_messages,
            store,
        );
        if let Some(snapshot) = writer.store.load_latest(&channel_id)? {
            writer.last_barrier_id = snapshot.barrier_id;
            writer.next_message_id = snapshot.last_message_id + 1;
            writer.last_committed_id = snapshot.last_message_id;
            writer.epoch_first_id = snapshot.last_message_id + 1;
            tracing::info!(
                channel_id = %channel_id.hex(),
                barrier_id = snapshot.barrier_id,
                resume_at = writer.next_message_id,
                "channel writer restored from checkpoint"
            );
        }
        Ok(writer)
    }

    /// Write one message. A full ring returns `ChannelFull`; the caller
    /// retries after the consumer acknowledges a checkpoint.
    pub fn write_message(&mut self, payload: Vec<u8>) -> TidalResult<u64> {
        let message_id = self.next_message_id;
        let message = StreamingMessage {
            message_id,
            kind: StreamingMessageKind::Data as i32,
            payload,
            // Logical timestamps stay identical across replay.
            timestamp: message_id,
        };
        self.ring.push(message.clone())?;
        self.next_message_id += 1;
        self.current_bundle.push(message);

        if self.current_bundle.len() >= self.max_bundle_messages {
            self.close_bundle();
        }
        Ok(message_id)
    }

    /// Close the open bundle and queue it for sending.
    fn close_bundle(&mut self) {
        if self.current_bundle.is_empty() {
            return;
        }
        let messages = std::mem::take(&mut self.current_bundle);
        let first = messages.first().unwrap().message_id;
        let last = messages.last().unwrap().message_id;
        let bundle = MessageBundle {
            // Deterministic across incarnations: the bundle is named by its
            // first message.
            bundle_id: first,
            first_message_id: first,
            last_message_id: last,
            kind: StreamingMessageKind::Data as i32,
            barrier_id: 0,
            messages,
        };
        self.outgoing.push_back(self.envelope_for(
            StreamingMessageKind::Data,
            Some(bundle.clone()),
        ));
        self.bundles.push_back(bundle);
    }

    /// Emit the next barrier: flush the open bundle, persist the epoch
    /// snapshot, and send the in-band barrier marker. A barrier with no data
    /// in its epoch still advances the barrier id.
    pub fn broadcast_barrier(&mut self) -> TidalResult<u64> {
        self.close_bundle();

        let barrier_id = self.last_barrier_id + 1;
        let snapshot = BarrierSnapshot {
            barrier_id,
            first_message_id: self.epoch_first_id,
            last_message_id: self.next_message_id - 1,
        };
        self.store.save(&self.channel_id, &snapshot)?;

        let mut envelope = self.envelope_for(StreamingMessageKind::Barrier, None);
        envelope.barrier_id = barrier_id;
        envelope.last_message_id = snapshot.last_message_id;
        self.outgoing.push_back(envelope);

        self.last_barrier_id = barrier_id;
        self.epoch_first_id = self.next_message_id;
        Ok(barrier_id)
    }

    /// Emit a heartbeat envelope.
    pub fn emit_empty(&mut self) {
        let mut envelope = self.envelope_for(StreamingMessageKind::Empty, None);
        envelope.last_message_id = self.next_message_id - 1;
        self.outgoing.push_back(envelope);
    }

    /// Handle an inbound control envelope; returns the replies to send.
    pub fn handle_envelope(
        &mut self,
        envelope: &StreamingEnvelope,
    ) -> TidalResult<Vec<StreamingEnvelope>> {
        match StreamingMessageKind::try_from(envelope.kind) {
            Ok(StreamingMessageKind::Notification) => {
                self.on_checkpoint_ack(envelope.barrier_id)?;
                Ok(Vec::new())
            }
            Ok(StreamingMessageKind::PullRequest) => {
                Ok(self.replay_from(envelope.from_message_id))
            }
            Ok(StreamingMessageKind::GetLastMessageId) => {
                let mut reply = self.envelope_for(StreamingMessageKind::GetLastMessageId, None);
                reply.last_message_id = self.next_message_id - 1;
                Ok(vec![reply])
            }
            Ok(StreamingMessageKind::CheckStatus) | Ok(StreamingMessageKind::Resubscribe) => {
                Ok(vec![self.envelope_for(StreamingMessageKind::CheckStatus, None)])
            }
            _ => Err(TidalError::channel_error(format!(
                "unexpected envelope kind {} on producer",
                envelope.kind
            ))),
        }
    }

    /// The consumer checkpointed `barrier_id`: data covered by it clears.
    fn on_checkpoint_ack(&mut self, barrier_id: u64) -> TidalResult<()> {
        let snapshot = self
            .store
            .load(&self.channel_id, barrier_id)?
            .ok_or_else(|| {
                TidalError::channel_error(format!("unknown barrier {barrier_id} acknowledged"))
            })?;
        self.last_committed_id = self.last_committed_id.max(snapshot.last_message_id);
        self.ring.evict_up_to(self.last_committed_id);
        while let Some(front) = self.bundles.front() {
            if front.last_message_id > self.last_committed_id {
                break;
            }
            self.bundles.pop_front();
        }
        Ok(())
    }

    /// Replay retained bundles with content past `from_message_id`, in
    /// order, one `PullData` envelope per bundle.
    fn replay_from(&self, from_message_id: u64) -> Vec<StreamingEnvelope> {
        self.bundles
            .iter()
            .filter(|b| b.last_message_id > from_message_id)
            .map(|bundle| {
                let mut envelope =
                    self.envelope_for(StreamingMessageKind::PullData, Some(bundle.clone()));
                envelope.from_message_id = from_message_id;
                envelope
            })
            .collect()
    }

    /// Drain the envelopes ready to send.
    pub fn take_outgoing(&mut self) -> Vec<StreamingEnvelope> {
        self.outgoing.drain(..).collect()
    }

    fn envelope_for(
        &self,
        kind: StreamingMessageKind,
        bundle: Option<MessageBundle>,
    ) -> StreamingEnvelope {
        StreamingEnvelope {
            src_actor_id: self.src_actor_id.clone(),
            dst_actor_id: self.dst_actor_id.clone(),
            channel_id: self.channel_id.binary(),
            kind: kind as i32,
            bundle,
            from_message_id: 0,
            last_message_id: 0,
            barrier_id: 0,
        }
    }

    pub fn channel_id(&self) -> &ChannelID {
        &self.channel_id
    }

    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    pub fn next_message_id(&self) -> u64 {
        self.next_message_id
    }

    pub fn last_committed_id(&self) -> u64 {
        self.last_committed_id
    }

    pub fn last_barrier_id(&self) -> u64 {
        self.last_barrier_id
    }

    pub fn buffered_bytes(&self) -> usize {
        self.ring.used_bytes()
    }
}
