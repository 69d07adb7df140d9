// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The object subsystem of a Tidal node.
//!
//! A node-local shared-memory store (`plasma`), a directory mapping object
//! ids to cluster locations, a pull manager deciding what to fetch under a
//! memory budget, a push manager streaming chunks to peers under a
//! bytes-in-flight cap, and the object manager facade tying them to the wire.

pub mod common;
pub mod object_buffer_pool;
pub mod object_directory;
pub mod object_manager;
pub mod plasma;
pub mod pull_manager;
pub mod push_manager;
pub mod service;
pub mod spill;
