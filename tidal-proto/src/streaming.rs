// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Streaming channel wire messages.

/// Kinds of streaming messages exchanged between actor pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum StreamingMessageKind {
    Data = 0,
    Barrier = 1,
    /// Heartbeat keeping the channel warm when no data flows.
    Empty = 2,
    /// Consumer-initiated replay request.
    PullRequest = 3,
    /// Replay payload.
    PullData = 4,
    /// Consumer acknowledgement.
    Notification = 5,
    CheckStatus = 6,
    Resubscribe = 7,
    GetLastMessageId = 8,
}

/// One message inside a bundle.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamingMessage {
    #[prost(uint64, tag = "1")]
    pub message_id: u64,
    #[prost(enumeration = "StreamingMessageKind", tag = "2")]
    pub kind: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
    /// Logical timestamp assigned by the producer; stable across replay.
    #[prost(uint64, tag = "4")]
    pub timestamp: u64,
}

/// The unit of batching on the wire. Messages inside a bundle have
/// contiguous, increasing ids.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageBundle {
    #[prost(uint64, tag = "1")]
    pub bundle_id: u64,
    #[prost(uint64, tag = "2")]
    pub first_message_id: u64,
    #[prost(uint64, tag = "3")]
    pub last_message_id: u64,
    #[prost(enumeration = "StreamingMessageKind", tag = "4")]
    pub kind: i32,
    #[prost(uint64, tag = "5")]
    pub barrier_id: u64,
    #[prost(message, repeated, tag = "6")]
    pub messages: Vec<StreamingMessage>,
}

/// The envelope around every streaming exchange.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamingEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub src_actor_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub dst_actor_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub channel_id: Vec<u8>,
    #[prost(enumeration = "StreamingMessageKind", tag = "4")]
    pub kind: i32,
    #[prost(message, optional, tag = "5")]
    pub bundle: Option<MessageBundle>,
    /// For PullRequest: replay starts from this message id (exclusive).
    #[prost(uint64, tag = "6")]
    pub from_message_id: u64,
    /// For Notification / GetLastMessageId replies.
    #[prost(uint64, tag = "7")]
    pub last_message_id: u64,
    #[prost(uint64, tag = "8")]
    pub barrier_id: u64,
}

/// Persisted per-barrier snapshot, keyed `<channel_hex>_<checkpoint_id>`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BarrierSnapshot {
    #[prost(uint64, tag = "1")]
    pub barrier_id: u64,
    #[prost(uint64, tag = "2")]
    pub first_message_id: u64,
    #[prost(uint64, tag = "3")]
    pub last_message_id: u64,
}
