// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Wire message types for Tidal.
//!
//! Every RPC payload and persisted row in the system is one of these
//! hand-written prost messages; the transport frames them with a length
//! prefix (see `tidal-rpc`). Field tags are stable; append, never renumber.
//!
//! Note: `prost::Message` derives `Debug` and `Default`, so message structs
//! must not also derive them explicitly.

pub mod common;
pub mod gcs;
pub mod object_manager;
pub mod streaming;
pub mod task;
