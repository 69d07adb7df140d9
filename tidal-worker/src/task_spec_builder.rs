// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Builder for task specifications.

use std::collections::HashMap;

use tidal_common::id::{ActorID, JobID, TaskID};
use tidal_proto::common::{Address, Language, TaskType};
use tidal_proto::task::{
    ActorCreationTaskSpec, ActorTaskSpec, ConcurrencyGroup, FunctionDescriptor, TaskArg, TaskSpec,
};

/// Assembles a `TaskSpec` step by step.
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_common_task_spec(
        &mut self,
        task_id: &TaskID,
        name: &str,
        language: Language,
        task_type: TaskType,
        job_id: &JobID,
        caller_address: Address,
        function: FunctionDescriptor,
        num_returns: u64,
        required_resources: HashMap<String, f64>,
    ) -> &mut Self {
        self.spec.task_id = task_id.binary();
        self.spec.name = name.to_string();
        self.spec.language = language as i32;
        self.spec.task_type = task_type as i32;
        self.spec.job_id = job_id.binary();
        self.spec.caller_address = Some(caller_address);
        self.spec.function = Some(function);
        self.spec.num_returns = num_returns;
        self.spec.required_resources = required_resources;
        self
    }

    pub fn set_normal_task_spec(&mut self) -> &mut Self {
        self.spec.task_type = TaskType::NormalTask as i32;
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_actor_creation_task_spec(
        &mut self,
        actor_id: &ActorID,
        max_restarts: i64,
        max_concurrency: u32,
        is_detached: bool,
        is_asyncio: bool,
        name: &str,
        namespace: &str,
        concurrency_groups: Vec<ConcurrencyGroup>,
        execute_out_of_order: bool,
    ) -> &mut Self {
        self.spec.task_type = TaskType::ActorCreationTask as i32;
        self.spec.actor_creation_task_spec = Some(ActorCreationTaskSpec {
            actor_id: actor_id.binary(),
            max_restarts,
            max_concurrency,
            is_detached,
            is_asyncio,
            name: name.to_string(),
            namespace: namespace.to_string(),
            concurrency_groups,
            execute_out_of_order,
        });
        self
    }

    pub fn set_actor_task_spec(&mut self, actor_id: &ActorID) -> &mut Self {
        self.spec.task_type = TaskType::ActorTask as i32;
        self.spec.actor_task_spec = Some(ActorTaskSpec {
            actor_id: actor_id.binary(),
            // Assigned by the submitter at send time.
            sequence_number: 0,
        });
        self
    }

    pub fn set_placement(&mut self, placement_group_id: Vec<u8>, bundle_index: i64) -> &mut Self {
        self.spec.placement_group_id = placement_group_id;
        self.spec.placement_group_bundle_index = bundle_index;
        self
    }

    pub fn set_retries(&mut self, max_retries: i32, is_idempotent: bool) -> &mut Self {
        self.spec.max_retries = max_retries;
        self.spec.is_idempotent = is_idempotent;
        self
    }

    pub fn set_concurrency_group_name(&mut self, name: &str) -> &mut Self {
        self.spec.concurrency_group_name = name.to_string();
        self
    }

    pub fn add_arg(&mut self, arg: TaskArg) -> &mut Self {
        self.spec.args.push(arg);
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

impl Default for TaskSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}
