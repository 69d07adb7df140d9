// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The worker engine.
//!
//! A worker hosts a driver, an actor, or short-lived stateless tasks. This
//! crate holds the execution loop (receive → resolve arguments → invoke →
//! store returns), the task submitters with their per-callee sequence
//! numbering, the per-caller scheduling queues, the reference counter that
//! drives object lifetimes, and the worker facade tying them together.

pub mod actor_handle;
pub mod actor_manager;
pub mod actor_task_submitter;
pub mod context;
pub mod core_worker;
pub mod dependency_resolver;
pub mod error;
pub mod memory_store;
pub mod normal_task_submitter;
pub mod options;
pub mod reference_counter;
pub mod scheduling_queue;
pub mod service;
pub mod task_receiver;
pub mod task_spec_builder;
