// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The method-id registry. One byte per method, unique across all services
//! so a misrouted frame fails loudly instead of decoding as something else.

// Object manager service.
pub const PUSH: u8 = 1;
pub const PULL: u8 = 2;
pub const FREE_OBJECTS: u8 = 3;

// Worker service.
pub const PUSH_TASK: u8 = 10;
pub const CANCEL_TASK: u8 = 11;
pub const WAIT_FOR_REF_REMOVED: u8 = 12;

// Node manager service. The node daemon also serves the worker methods on
// the same endpoint for its resident worker.
pub const PREPARE_BUNDLE_RESOURCES: u8 = 20;
pub const COMMIT_BUNDLE_RESOURCES: u8 = 21;
pub const RETURN_BUNDLE_RESOURCES: u8 = 22;
pub const SUBMIT_TASK: u8 = 23;

// Control service.
pub const CREATE_ACTOR: u8 = 31;
pub const KILL_ACTOR: u8 = 32;
pub const CREATE_PLACEMENT_GROUP: u8 = 33;
pub const REMOVE_PLACEMENT_GROUP: u8 = 34;
pub const WAIT_PLACEMENT_GROUP_READY: u8 = 35;
pub const REGISTER_NODE: u8 = 36;

// Streaming transport.
pub const STREAMING_ENVELOPE: u8 = 40;
