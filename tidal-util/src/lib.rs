// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Utility library for Tidal.
//!
//! Small building blocks shared by every other crate: exponential backoff,
//! counter maps, logging bootstrap, networking helpers, randomness, time.

pub mod backoff;
pub mod counter_map;
pub mod logging;
pub mod network;
pub mod random;
pub mod time;
