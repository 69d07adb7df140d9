// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Publish/subscribe channels.
//!
//! A thin layer over tokio broadcast channels keyed by topic, used by the
//! control service to fan state changes out to in-process subscribers.

pub mod publisher;
pub mod subscriber;

pub use publisher::{Publisher, Topic};
pub use subscriber::{SubscribeError, Subscriber};
