// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Actor handles held by callers.

use tidal_common::id::ActorID;
use tidal_proto::common::Address;

/// What a caller knows about an actor: its stable id and the address of its
/// current incarnation. The address refreshes on every actor notification.
#[derive(Debug, Clone)]
pub struct ActorHandle {
    actor_id: ActorID,
    address: Option<Address>,
    num_restarts: u64,
    max_task_retries: i32,
    is_detached: bool,
}

impl ActorHandle {
    pub fn new(actor_id: ActorID, max_task_retries: i32, is_detached: bool) -> Self {
        Self {
            actor_id,
            address: None,
            num_restarts: 0,
            max_task_retries,
            is_detached,
        }
    }

    pub fn actor_id(&self) -> ActorID {
        self.actor_id
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    pub fn num_restarts(&self) -> u64 {
        self.num_restarts
    }

    pub fn max_task_retries(&self) -> i32 {
        self.max_task_retries
    }

    pub fn is_detached(&self) -> bool {
        self.is_detached
    }

    /// Refresh from an actor-table notification.
    pub fn update_address(&mut self, address: Option<Address>, num_restarts: u64) {
        self.address = address;
        self.num_restarts = num_restarts;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_common::id::{JobID, TaskID};

    #[test]
    fn test_address_refresh() {
        let actor_id = ActorID::of(&JobID::from_int(1), &TaskID::nil(), 0);
        let mut handle = ActorHandle::new(actor_id, 3, false);
        assert!(handle.address().is_none());

        handle.update_address(
            Some(Address {
                ip_address: "10.0.0.2".to_string(),
                port: 7000,
                ..Default::default()
            }),
            1,
        );
        assert_eq!(handle.address().unwrap().port, 7000);
        assert_eq!(handle.num_restarts(), 1);
    }
}
