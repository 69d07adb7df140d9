// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The node-local shared-memory object store.
//!
//! Lifecycle of every object: CREATE → (write) → SEAL → GET/RELEASE → DELETE,
//! with AbortCreate for partially written objects and LRU eviction plus
//! spilling under memory pressure.

pub mod allocator;
pub mod eviction;
pub mod object_store;
pub mod store;
