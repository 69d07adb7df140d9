// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The local object store facade.
//!
//! Allocation pressure is resolved in order: LRU eviction, the registered
//! spill callback, the fallback (disk) allocator, then `OutOfMemory`.
//! Callbacks are always invoked after the store lock is released.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use tidal_common::id::ObjectID;

use crate::common::{
    AddObjectCallback, DeleteObjectCallback, ObjectInfo, ObjectSource, PlasmaError,
    SpillObjectsCallback,
};
use crate::plasma::allocator::IAllocator;
use crate::plasma::eviction::EvictionPolicy;
use crate::plasma::object_store::ObjectTable;

/// Result of a `get` for one id.
pub enum GetResult {
    /// The object is sealed locally; the buffer pins it until dropped.
    Found(ObjectBuffer),
    /// Not (yet) present locally.
    Pending,
}

/// A pinned read handle. The pin is released on drop.
pub struct ObjectBuffer {
    store: Arc<LocalObjectStore>,
    object_id: ObjectID,
    pub metadata: Bytes,
    pub data: Bytes,
}

impl ObjectBuffer {
    pub fn object_id(&self) -> &ObjectID {
        &self.object_id
    }
}

impl Drop for ObjectBuffer {
    fn drop(&mut self) {
        self.store.release(&self.object_id);
    }
}

struct StoreInner {
    table: ObjectTable,
    eviction_policy: EvictionPolicy,
    add_object_callback: Option<AddObjectCallback>,
    delete_object_callback: Option<DeleteObjectCallback>,
    spill_objects_callback: Option<SpillObjectsCallback>,
    /// Ids spilled out of the local store, with their restore URLs; drained
    /// by the object manager into the directory.
    spilled: Vec<(ObjectID, String)>,
}

/// The node-local object store.
pub struct LocalObjectStore {
    allocator: Arc<dyn IAllocator>,
    inner: Mutex<StoreInner>,
    /// Wakes `get` waiters after a seal.
    sealed_notify: Notify,
}

impl LocalObjectStore {
    pub fn new(allocator: Arc<dyn IAllocator>, capacity: i64) -> Self {
        Self {
            allocator,
            inner: Mutex::new(StoreInner {
                table: ObjectTable::new(),
                eviction_policy: EvictionPolicy::new(capacity),
                add_object_callback: None,
                delete_object_callback: None,
                spill_objects_callback: None,
                spilled: Vec::new(),
            }),
            sealed_notify: Notify::new(),
        }
    }

    pub fn set_add_object_callback(&self, callback: AddObjectCallback) {
        self.inner.lock().add_object_callback = Some(callback);
    }

    pub fn set_delete_object_callback(&self, callback: DeleteObjectCallback) {
        self.inner.lock().delete_object_callback = Some(callback);
    }

    pub fn set_spill_objects_callback(&self, callback: SpillObjectsCallback) {
        self.inner.lock().spill_objects_callback = Some(callback);
    }

    /// Create a writable object. Fails with `ObjectExists` for duplicate ids
    /// and `OutOfMemory` when no space can be made even after spilling.
    pub fn create(&self, object_info: ObjectInfo, source: ObjectSource) -> Result<(), PlasmaError> {
        let size = object_info.total_size() as usize;
        let object_id = object_info.object_id;

        let mut deleted_callbacks = Vec::new();
        let mut allocation;
        let spill_callback;
        {
            let mut inner = self.inner.lock();
            if inner.table.contains(&object_id) {
                return Err(PlasmaError::ObjectExists);
            }

            allocation = self.allocator.allocate(size);
            if allocation.is_none() {
                // Evict unpinned sealed objects.
                let mut victims = Vec::new();
                inner
                    .eviction_policy
                    .require_space(size as i64, &mut victims);
                for victim in &victims {
                    if let Ok(alloc) = inner.table.delete_object(victim) {
                        self.allocator.free(alloc);
                        inner.eviction_policy.remove_object(victim);
                        deleted_callbacks.push(*victim);
                    }
                }
                allocation = self.allocator.allocate(size);
            }
            spill_callback = inner.spill_objects_callback.clone();
        }

        if allocation.is_none() {
            // Ask the spill callback to move objects out. It reads objects
            // back out of the store, so it runs without the store lock.
            if let Some(cb) = spill_callback {
                let (bytes_spilled, spilled) = cb(size as u64);
                let mut inner = self.inner.lock();
                for (oid, url) in spilled {
                    if let Ok(alloc) = inner.table.delete_object(&oid) {
                        self.allocator.free(alloc);
                        inner.eviction_policy.remove_object(&oid);
                        deleted_callbacks.push(oid);
                    }
                    inner.spilled.push((oid, url));
                }
                if bytes_spilled > 0 {
                    allocation = self.allocator.allocate(size);
                }
            }
        }

        if allocation.is_none() {
            allocation = self.allocator.fallback_allocate(size);
        }

        let result = {
            let mut inner = self.inner.lock();
            match allocation {
                Some(allocation) => {
                    // Re-check: another creator may have won the race while
                    // the lock was released for spilling.
                    if inner.table.contains(&object_id) {
                        self.allocator.free(allocation);
                        Err(PlasmaError::ObjectExists)
                    } else {
                        let created = inner
                            .table
                            .create_object(allocation, object_info, source)
                            .map(|_| ());
                        if created.is_ok() {
                            inner
                                .eviction_policy
                                .object_created(object_id, size as i64);
                        }
                        created
                    }
                }
                None => Err(PlasmaError::OutOfMemory),
            }
        };

        if !deleted_callbacks.is_empty() {
            let inner = self.inner.lock();
            if let Some(cb) = &inner.delete_object_callback {
                for oid in &deleted_callbacks {
                    cb(oid);
                }
            }
        }
        result
    }

    /// Write the metadata region of an unsealed object.
    pub fn write_metadata(&self, object_id: &ObjectID, metadata: &[u8]) -> Result<(), PlasmaError> {
        let mut inner = self.inner.lock();
        inner
            .table
            .get_mut(object_id)
            .ok_or(PlasmaError::ObjectNonexistent)?
            .write_metadata(metadata)
    }

    /// Write into the data region of an unsealed object.
    pub fn write_data_at(
        &self,
        object_id: &ObjectID,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), PlasmaError> {
        let mut inner = self.inner.lock();
        inner
            .table
            .get_mut(object_id)
            .ok_or(PlasmaError::ObjectNonexistent)?
            .write_data_at(offset, bytes)
    }

    /// Write a raw chunk (metadata-then-data layout) of an unsealed object.
    pub fn write_raw_at(
        &self,
        object_id: &ObjectID,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), PlasmaError> {
        let mut inner = self.inner.lock();
        inner
            .table
            .get_mut(object_id)
            .ok_or(PlasmaError::ObjectNonexistent)?
            .write_raw_at(offset, bytes)
    }

    /// Seal an object, making it immutable and readable, and notify waiters
    /// and the add-object callback.
    pub fn seal(&self, object_id: &ObjectID) -> Result<ObjectInfo, PlasmaError> {
        let info = {
            let mut inner = self.inner.lock();
            inner.table.seal_object(object_id)?.object_info().clone()
        };

        {
            let inner = self.inner.lock();
            if let Some(cb) = &inner.add_object_callback {
                cb(&info);
            }
        }
        self.sealed_notify.notify_waiters();
        Ok(info)
    }

    /// Abort a partially written object, releasing its memory.
    pub fn abort_create(&self, object_id: &ObjectID) -> Result<(), PlasmaError> {
        let mut inner = self.inner.lock();
        if inner
            .table
            .get(object_id)
            .is_some_and(|obj| obj.is_sealed())
        {
            return Err(PlasmaError::ObjectSealed);
        }
        let allocation = inner.table.delete_object(object_id)?;
        self.allocator.free(allocation);
        inner.eviction_policy.remove_object(object_id);
        Ok(())
    }

    /// Delete sealed objects. Pinned ids are skipped; missing ids ignored.
    pub fn delete(&self, object_ids: &[ObjectID]) {
        let mut deleted = Vec::new();
        {
            let mut inner = self.inner.lock();
            for oid in object_ids {
                if let Ok(allocation) = inner.table.delete_object(oid) {
                    self.allocator.free(allocation);
                    inner.eviction_policy.remove_object(oid);
                    deleted.push(*oid);
                }
            }
        }
        if !deleted.is_empty() {
            let inner = self.inner.lock();
            if let Some(cb) = &inner.delete_object_callback {
                for oid in &deleted {
                    cb(oid);
                }
            }
        }
    }

    /// Read sealed objects. Blocks up to `timeout` for absent ones, which
    /// come back as `Pending`. Found objects stay pinned while the returned
    /// buffer lives.
    pub async fn get(
        self: &Arc<Self>,
        object_ids: &[ObjectID],
        timeout: Duration,
    ) -> Vec<GetResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let pending: Vec<ObjectID> = {
                let inner = self.inner.lock();
                object_ids
                    .iter()
                    .filter(|oid| {
                        !inner.table.get(oid).is_some_and(|obj| obj.is_sealed())
                    })
                    .copied()
                    .collect()
            };
            if pending.is_empty() {
                break;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let _ = tokio::time::timeout(remaining, self.sealed_notify.notified()).await;
        }

        let mut results = Vec::with_capacity(object_ids.len());
        let mut inner = self.inner.lock();
        for oid in object_ids {
            let buffer = match inner.table.get(oid) {
                Some(obj) if obj.is_sealed() => {
                    let (metadata, data) = obj.read().expect("sealed object readable");
                    Some((metadata, data))
                }
                _ => None,
            };
            match buffer {
                Some((metadata, data)) => {
                    inner.table.get_mut(oid).unwrap().incr_ref();
                    inner.eviction_policy.begin_object_access(oid);
                    results.push(GetResult::Found(ObjectBuffer {
                        store: Arc::clone(self),
                        object_id: *oid,
                        metadata,
                        data,
                    }));
                }
                None => results.push(GetResult::Pending),
            }
        }
        results
    }

    /// Release a pin taken by `get`.
    fn release(&self, object_id: &ObjectID) {
        let mut inner = self.inner.lock();
        let size = match inner.table.get_mut(object_id) {
            Some(obj) => {
                obj.decr_ref();
                if obj.ref_count() == 0 {
                    Some(obj.object_size() as i64)
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some(size) = size {
            inner.eviction_policy.end_object_access(*object_id, size);
        }
    }

    /// Copy a raw slice of a sealed object for a chunked send.
    pub fn read_chunk(
        &self,
        object_id: &ObjectID,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, PlasmaError> {
        let inner = self.inner.lock();
        let obj = inner
            .table
            .get(object_id)
            .ok_or(PlasmaError::ObjectNonexistent)?;
        if !obj.is_sealed() {
            return Err(PlasmaError::ObjectNotSealed);
        }
        Ok(obj.read_raw(offset, len))
    }

    /// Descriptor of a sealed object.
    pub fn object_info(&self, object_id: &ObjectID) -> Option<ObjectInfo> {
        let inner = self.inner.lock();
        inner
            .table
            .get(object_id)
            .filter(|obj| obj.is_sealed())
            .map(|obj| obj.object_info().clone())
    }

    pub fn contains(&self, object_id: &ObjectID) -> bool {
        self.inner.lock().table.contains(object_id)
    }

    pub fn contains_sealed(&self, object_id: &ObjectID) -> bool {
        self.inner
            .lock()
            .table
            .get(object_id)
            .is_some_and(|obj| obj.is_sealed())
    }

    pub fn num_objects(&self) -> usize {
        self.inner.lock().table.num_objects()
    }

    /// Bytes currently resident; reported to the pull manager for flow
    /// control.
    pub fn bytes_in_use(&self) -> i64 {
        self.inner.lock().table.num_bytes_in_use()
    }

    /// Drain (id, URL) pairs spilled since the last call.
    pub fn take_spilled(&self) -> Vec<(ObjectID, String)> {
        std::mem::take(&mut self.inner.lock().spilled)
    }
}
