// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Streaming channels between actor pairs.
//!
//! A channel delivers message bundles in strictly increasing id order with a
//! bounded in-memory ring and barrier-based checkpoints. At EXACTLY_SAME
//! reliability a replay from checkpoint B reproduces the pre-crash bundle
//! sequence byte for byte for ids beyond B; at AT_LEAST_ONCE duplicates are
//! possible after failure and the reader drops them.

pub mod checkpoint;
pub mod reader;
pub mod ring_buffer;
pub mod writer;

/// Delivery guarantee of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    /// Replay reproduces identical bundles (ids, boundaries, timestamps).
    ExactlySame,
    /// Duplicates are possible after failure; order is preserved.
    AtLeastOnce,
}
