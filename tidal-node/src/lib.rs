// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The per-node daemon library: cluster and local resource tracking, the
//! scheduling policies (single-task and gang), the placement-group bundle
//! resource manager, and the wait manager.

pub mod cluster_resource_manager;
pub mod cluster_resource_scheduler;
pub mod local_resource_manager;
pub mod placement_group_resource_manager;
pub mod registration;
pub mod scheduling_policy;
pub mod scheduling_resources;
pub mod service;
pub mod task_dispatch;
pub mod wait_manager;
