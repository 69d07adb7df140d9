// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Object manager wire messages: Push, Pull, FreeObjects.

use crate::common::Address;

/// One chunk of an object transfer. For chunk 0 the `data` buffer carries the
/// metadata bytes first, then the payload bytes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PushRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub push_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub object_id: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub owner_address: Option<Address>,
    #[prost(bytes = "vec", tag = "4")]
    pub sender_node_id: Vec<u8>,
    #[prost(uint64, tag = "5")]
    pub data_size: u64,
    #[prost(uint64, tag = "6")]
    pub metadata_size: u64,
    #[prost(uint64, tag = "7")]
    pub chunk_index: u64,
    #[prost(bytes = "vec", tag = "8")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PushReply {}

/// Ask a peer to start pushing an object to the requester.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PullRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub object_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub requester_node_id: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PullReply {}

/// Free objects on the receiving node.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FreeObjectsRequest {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub object_ids: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FreeObjectsReply {}
