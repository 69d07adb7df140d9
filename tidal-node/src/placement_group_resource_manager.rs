// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Node-side bundle resource transactions.
//!
//! Two-phase commit: prepare atomically deducts a bundle's raw resources and
//! records it PREPARED; commit (idempotent) materializes the group's virtual
//! resources so tasks bound to the group can be scheduled against them;
//! return restores everything. A bundle's resources are deducted exactly
//! once per commit and returned exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use tidal_common::id::{BundleID, PlacementGroupID};
use tidal_common::scheduling::{FixedPoint, ResourceSet};
use tidal_common::status::{TidalError, TidalResult};

use crate::local_resource_manager::LocalResourceManager;
use crate::scheduling_resources::TaskResourceInstances;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Prepared,
    Committed,
}

struct BundleTransaction {
    state: CommitState,
    resources: ResourceSet,
    allocation: TaskResourceInstances,
}

/// Manages bundle resource state on one node.
pub struct PlacementGroupResourceManager {
    bundles: Mutex<HashMap<BundleID, BundleTransaction>>,
    local_resource_manager: Arc<LocalResourceManager>,
}

impl PlacementGroupResourceManager {
    pub fn new(local_resource_manager: Arc<LocalResourceManager>) -> Self {
        Self {
            bundles: Mutex::new(HashMap::new()),
            local_resource_manager,
        }
    }

    /// Phase 1: atomically lock raw resources for all given bundles. Either
    /// every bundle is prepared or none is.
    pub fn prepare_bundles(&self, specs: &[(BundleID, ResourceSet)]) -> TidalResult<()> {
        let mut bundles = self.bundles.lock();

        let mut allocated: Vec<(BundleID, ResourceSet, TaskResourceInstances)> = Vec::new();
        for (bundle_id, resources) in specs {
            if bundles.contains_key(bundle_id) {
                // Prepare is idempotent per bundle: the earlier preparation
                // stands and the resources stay deducted exactly once.
                continue;
            }
            match self
                .local_resource_manager
                .allocate_local_task_resources(resources)
            {
                Some(allocation) => allocated.push((*bundle_id, resources.clone(), allocation)),
                None => {
                    for (_, _, allocation) in &allocated {
                        self.local_resource_manager.release_task_resources(allocation);
                    }
                    return Err(TidalError::out_of_resource(format!(
                        "insufficient resources to prepare bundle {} of group {}",
                        bundle_id.1,
                        bundle_id.0.hex()
                    )));
                }
            }
        }

        for (bundle_id, resources, allocation) in allocated {
            bundles.insert(
                bundle_id,
                BundleTransaction {
                    state: CommitState::Prepared,
                    resources,
                    allocation,
                },
            );
        }
        Ok(())
    }

    /// Phase 2: materialize virtual resources for prepared bundles. Commit
    /// is idempotent; re-committing a committed bundle is a no-op.
    pub fn commit_bundles(&self, bundle_ids: &[BundleID]) -> TidalResult<()> {
        let mut bundles = self.bundles.lock();

        for bundle_id in bundle_ids {
            let txn = bundles.get_mut(bundle_id).ok_or_else(|| {
                TidalError::not_found(format!(
                    "bundle {} of group {} was never prepared here",
                    bundle_id.1,
                    bundle_id.0.hex()
                ))
            })?;
            if txn.state == CommitState::Committed {
                continue;
            }
            txn.state = CommitState::Committed;

            for (resource, amount) in txn.resources.iter() {
                let wildcard = wildcard_resource_name(resource, &bundle_id.0);
                let indexed = indexed_resource_name(resource, bundle_id.1, &bundle_id.0);
                self.local_resource_manager
                    .add_resource_instances(wildcard, vec![amount]);
                self.local_resource_manager
                    .add_resource_instances(indexed, vec![amount]);
            }
        }
        Ok(())
    }

    /// Roll back or clean up a bundle, restoring its raw resources and
    /// withdrawing any committed virtual resources. Returns false when the
    /// bundle was unknown (already returned).
    pub fn return_bundle(&self, bundle_id: &BundleID) -> bool {
        let txn = match self.bundles.lock().remove(bundle_id) {
            Some(txn) => txn,
            None => return false,
        };

        if txn.state == CommitState::Committed {
            for (resource, amount) in txn.resources.iter() {
                self.local_resource_manager
                    .delete_resource(&indexed_resource_name(resource, bundle_id.1, &bundle_id.0));
                self.local_resource_manager
                    .subtract_resource_instances(&wildcard_resource_name(resource, &bundle_id.0), amount);
            }
        }

        self.local_resource_manager
            .release_task_resources(&txn.allocation);
        true
    }

    /// Return every bundle not present in `in_use` (control-service restart
    /// reconciliation).
    pub fn return_unused_bundles(&self, in_use: &[BundleID]) {
        let all: Vec<BundleID> = self.bundles.lock().keys().copied().collect();
        for bundle_id in all {
            if !in_use.contains(&bundle_id) {
                self.return_bundle(&bundle_id);
            }
        }
    }

    pub fn num_bundles(&self) -> usize {
        self.bundles.lock().len()
    }

    pub fn num_committed_bundles(&self) -> usize {
        self.bundles
            .lock()
            .values()
            .filter(|t| t.state == CommitState::Committed)
            .count()
    }
}

/// `<resource>_group_<pg_hex>`: any bundle of the group on this node.
pub fn wildcard_resource_name(resource: &str, pg_id: &PlacementGroupID) -> String {
    format!("{}_group_{}", resource, pg_id.hex())
}

/// `<resource>_group_<bundle_index>_<pg_hex>`: one specific bundle.
pub fn indexed_resource_name(resource: &str, bundle_index: i64, pg_id: &PlacementGroupID) -> String {
    format!("{}_group_{}_{}", resource, bundle_index, pg_id.hex())
}
