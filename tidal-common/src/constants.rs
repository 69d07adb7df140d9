// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Workspace-wide constants.

/// Length of full-width unique ids (node, worker, channel) in bytes.
pub const UNIQUE_ID_SIZE: usize = 28;

/// Precision of fractional resource quantities: one tick is 1/10000.
pub const RESOURCE_UNIT_SCALING: i32 = 10_000;

/// Return values at or below this size are inlined into the task reply
/// instead of being written to the local object store.
pub const TASK_RPC_INLINED_BYTES_LIMIT: usize = 100 * 1024;

/// Default chunk size for inter-node object transfers.
pub const DEFAULT_OBJECT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Default cap on transfer bytes in flight per node.
pub const DEFAULT_MAX_BYTES_IN_FLIGHT: u64 = 256 * 1024 * 1024;

/// Consecutive chunk-send failures after which a push is reported failed.
pub const MAX_PUSH_CHUNK_FAILURES: u32 = 5;

/// Predefined resource names.
pub const CPU_RESOURCE: &str = "CPU";
pub const GPU_RESOURCE: &str = "GPU";
pub const MEMORY_RESOURCE: &str = "memory";
pub const OBJECT_STORE_MEMORY_RESOURCE: &str = "object_store_memory";

/// Metadata prefix marking an object that holds a task execution error.
pub const TASK_EXECUTION_EXCEPTION_META: &[u8] = b"TASK_EXECUTION_EXCEPTION";

/// Metadata marking an object whose payload lives in the plasma store.
pub const IN_PLASMA_META: &[u8] = b"IN_PLASMA";

/// Process exit code for an uncaught fatal error.
pub const EXIT_CODE_FATAL: i32 = 1;

/// Default capacity of a streaming channel ring buffer, in bytes.
pub const DEFAULT_STREAMING_RING_BYTES: usize = 32 * 1024 * 1024;

/// Messages per streaming bundle before a bundle is closed.
pub const DEFAULT_MAX_BUNDLE_MESSAGES: usize = 100;
