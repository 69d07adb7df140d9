// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The object table: ObjectID → LocalObject with create/seal state.

use std::collections::HashMap;

use bytes::Bytes;

use tidal_common::id::ObjectID;

use crate::common::{ObjectInfo, ObjectSource, PlasmaError};
use crate::plasma::allocator::Allocation;

/// State of an object in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Being written; not yet readable.
    Created,
    /// Immutable and readable.
    Sealed,
}

/// One object resident in the local store.
///
/// Layout inside the allocation: metadata bytes first, then data bytes.
#[derive(Debug)]
pub struct LocalObject {
    allocation: Allocation,
    object_info: ObjectInfo,
    /// Number of readers currently pinning the object.
    ref_count: i32,
    create_time_ms: u64,
    state: ObjectState,
    source: ObjectSource,
}

impl LocalObject {
    pub fn new(allocation: Allocation, object_info: ObjectInfo, source: ObjectSource) -> Self {
        Self {
            allocation,
            object_info,
            ref_count: 0,
            create_time_ms: tidal_util::time::current_time_ms(),
            state: ObjectState::Created,
            source,
        }
    }

    pub fn object_info(&self) -> &ObjectInfo {
        &self.object_info
    }

    pub fn object_id(&self) -> &ObjectID {
        &self.object_info.object_id
    }

    pub fn state(&self) -> ObjectState {
        self.state
    }

    pub fn is_sealed(&self) -> bool {
        self.state == ObjectState::Sealed
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count
    }

    pub fn source(&self) -> ObjectSource {
        self.source
    }

    pub fn create_time_ms(&self) -> u64 {
        self.create_time_ms
    }

    /// Total footprint: metadata + data.
    pub fn object_size(&self) -> u64 {
        self.object_info.total_size()
    }

    /// Write the metadata region. Only valid before sealing.
    pub fn write_metadata(&mut self, metadata: &[u8]) -> Result<(), PlasmaError> {
        if self.is_sealed() {
            return Err(PlasmaError::ObjectSealed);
        }
        if metadata.len() as u64 != self.object_info.metadata_size
            || !self.allocation.write_at(0, metadata)
        {
            return Err(PlasmaError::OutOfMemory);
        }
        Ok(())
    }

    /// Write data bytes at `offset` within the data region.
    pub fn write_data_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), PlasmaError> {
        if self.is_sealed() {
            return Err(PlasmaError::ObjectSealed);
        }
        let base = self.object_info.metadata_size as usize;
        if (offset + bytes.len()) as u64 > self.object_info.data_size
            || !self.allocation.write_at(base + offset, bytes)
        {
            return Err(PlasmaError::OutOfMemory);
        }
        Ok(())
    }

    /// Write a raw chunk at `offset` within the whole buffer (metadata then
    /// data), as received from a peer transfer.
    pub fn write_raw_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), PlasmaError> {
        if self.is_sealed() {
            return Err(PlasmaError::ObjectSealed);
        }
        if (offset + bytes.len()) as u64 > self.object_size()
            || !self.allocation.write_at(offset, bytes)
        {
            return Err(PlasmaError::OutOfMemory);
        }
        Ok(())
    }

    /// Copy out (metadata, data). Only valid once sealed.
    pub fn read(&self) -> Result<(Bytes, Bytes), PlasmaError> {
        if !self.is_sealed() {
            return Err(PlasmaError::ObjectNotSealed);
        }
        let metadata_len = self.object_info.metadata_size as usize;
        let data_len = self.object_info.data_size as usize;
        let metadata = Bytes::from(self.allocation.read_at(0, metadata_len));
        let data = Bytes::from(self.allocation.read_at(metadata_len, data_len));
        Ok((metadata, data))
    }

    /// Copy a raw slice of the whole buffer, for chunked sends.
    pub fn read_raw(&self, offset: usize, len: usize) -> Vec<u8> {
        self.allocation.read_at(offset, len)
    }

    pub fn seal(&mut self) {
        assert_eq!(self.state, ObjectState::Created, "object already sealed");
        self.state = ObjectState::Sealed;
    }

    pub fn incr_ref(&mut self) {
        self.ref_count += 1;
    }

    pub fn decr_ref(&mut self) {
        self.ref_count -= 1;
        assert!(self.ref_count >= 0, "negative pin count");
    }
}

/// The object table.
pub struct ObjectTable {
    objects: HashMap<ObjectID, LocalObject>,
    cumulative_created_bytes: u64,
    num_bytes_sealed: i64,
    num_bytes_unsealed: i64,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            cumulative_created_bytes: 0,
            num_bytes_sealed: 0,
            num_bytes_unsealed: 0,
        }
    }

    /// Register a new object in the Created state.
    pub fn create_object(
        &mut self,
        allocation: Allocation,
        object_info: ObjectInfo,
        source: ObjectSource,
    ) -> Result<&mut LocalObject, PlasmaError> {
        let object_id = object_info.object_id;
        if self.objects.contains_key(&object_id) {
            return Err(PlasmaError::ObjectExists);
        }

        let size = object_info.total_size() as i64;
        self.objects
            .insert(object_id, LocalObject::new(allocation, object_info, source));
        self.num_bytes_unsealed += size;
        self.cumulative_created_bytes += size as u64;

        Ok(self.objects.get_mut(&object_id).unwrap())
    }

    pub fn get(&self, object_id: &ObjectID) -> Option<&LocalObject> {
        self.objects.get(object_id)
    }

    pub fn get_mut(&mut self, object_id: &ObjectID) -> Option<&mut LocalObject> {
        self.objects.get_mut(object_id)
    }

    pub fn seal_object(&mut self, object_id: &ObjectID) -> Result<&LocalObject, PlasmaError> {
        let obj = self
            .objects
            .get_mut(object_id)
            .ok_or(PlasmaError::ObjectNonexistent)?;
        if obj.is_sealed() {
            return Err(PlasmaError::ObjectSealed);
        }
        let size = obj.object_size() as i64;
        obj.seal();
        self.num_bytes_unsealed -= size;
        self.num_bytes_sealed += size;
        Ok(self.objects.get(object_id).unwrap())
    }

    /// Remove an object, returning its allocation for freeing. Pinned
    /// objects cannot be removed.
    pub fn delete_object(&mut self, object_id: &ObjectID) -> Result<Allocation, PlasmaError> {
        match self.objects.get(object_id) {
            Some(obj) if obj.ref_count() > 0 => return Err(PlasmaError::ObjectInUse),
            Some(_) => {}
            None => return Err(PlasmaError::ObjectNonexistent),
        }

        let obj = self.objects.remove(object_id).unwrap();
        let size = obj.object_size() as i64;
        if obj.is_sealed() {
            self.num_bytes_sealed -= size;
        } else {
            self.num_bytes_unsealed -= size;
        }
        Ok(obj.allocation)
    }

    pub fn contains(&self, object_id: &ObjectID) -> bool {
        self.objects.contains_key(object_id)
    }

    pub fn object_ids(&self) -> impl Iterator<Item = &ObjectID> {
        self.objects.keys()
    }

    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn num_bytes_sealed(&self) -> i64 {
        self.num_bytes_sealed
    }

    pub fn num_bytes_unsealed(&self) -> i64 {
        self.num_bytes_unsealed
    }

    pub fn num_bytes_in_use(&self) -> i64 {
        self.num_bytes_sealed + self.num_bytes_unsealed
    }

    pub fn cumulative_created_bytes(&self) -> u64 {
        self.cumulative_created_bytes
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plasma::allocator::{HeapAllocator, IAllocator};

    fn make_oid(val: u8) -> ObjectID {
        let mut data = [0u8; 28];
        data[0] = val;
        ObjectID::from_binary(&data)
    }

    fn alloc_for(allocator: &HeapAllocator, info: &ObjectInfo) -> Allocation {
        allocator.allocate(info.total_size() as usize).unwrap()
    }

    #[test]
    fn test_create_write_seal_read() {
        let allocator = HeapAllocator::new(1 << 20);
        let mut table = ObjectTable::new();
        let oid = make_oid(1);
        let info = ObjectInfo {
            object_id: oid,
            data_size: 5,
            metadata_size: 4,
            ..Default::default()
        };
        let allocation = alloc_for(&allocator, &info);

        let obj = table
            .create_object(allocation, info, ObjectSource::CreatedByWorker)
            .unwrap();
        obj.write_metadata(b"meta").unwrap();
        obj.write_data_at(0, b"hello").unwrap();

        table.seal_object(&oid).unwrap();
        let (metadata, data) = table.get(&oid).unwrap().read().unwrap();
        assert_eq!(&metadata[..], b"meta");
        assert_eq!(&data[..], b"hello");

        let allocation = table.delete_object(&oid).unwrap();
        allocator.free(allocation);
        assert!(!table.contains(&oid));
    }

    #[test]
    fn test_duplicate_create() {
        let allocator = HeapAllocator::new(1 << 20);
        let mut table = ObjectTable::new();
        let oid = make_oid(1);
        let info = ObjectInfo {
            object_id: oid,
            data_size: 16,
            ..Default::default()
        };
        table
            .create_object(
                alloc_for(&allocator, &info),
                info.clone(),
                ObjectSource::CreatedByWorker,
            )
            .unwrap();
        let second = alloc_for(&allocator, &info);
        let err = table
            .create_object(second, info, ObjectSource::CreatedByWorker)
            .unwrap_err();
        assert_eq!(err, PlasmaError::ObjectExists);
    }

    #[test]
    fn test_read_before_seal_fails() {
        let allocator = HeapAllocator::new(1 << 20);
        let mut table = ObjectTable::new();
        let oid = make_oid(1);
        let info = ObjectInfo {
            object_id: oid,
            data_size: 8,
            ..Default::default()
        };
        table
            .create_object(alloc_for(&allocator, &info), info, ObjectSource::CreatedByWorker)
            .unwrap();
        assert_eq!(
            table.get(&oid).unwrap().read().unwrap_err(),
            PlasmaError::ObjectNotSealed
        );
    }

    #[test]
    fn test_seal_twice_fails() {
        let allocator = HeapAllocator::new(1 << 20);
        let mut table = ObjectTable::new();
        let oid = make_oid(1);
        let info = ObjectInfo {
            object_id: oid,
            data_size: 1,
            ..Default::default()
        };
        table
            .create_object(alloc_for(&allocator, &info), info, ObjectSource::CreatedByWorker)
            .unwrap();
        table.seal_object(&oid).unwrap();
        assert_eq!(
            table.seal_object(&oid).unwrap_err(),
            PlasmaError::ObjectSealed
        );
    }

    #[test]
    fn test_delete_pinned_fails() {
        let allocator = HeapAllocator::new(1 << 20);
        let mut table = ObjectTable::new();
        let oid = make_oid(1);
        let info = ObjectInfo {
            object_id: oid,
            data_size: 8,
            ..Default::default()
        };
        table
            .create_object(alloc_for(&allocator, &info), info, ObjectSource::CreatedByWorker)
            .unwrap();
        table.seal_object(&oid).unwrap();
        table.get_mut(&oid).unwrap().incr_ref();

        assert_eq!(
            table.delete_object(&oid).unwrap_err(),
            PlasmaError::ObjectInUse
        );
        table.get_mut(&oid).unwrap().decr_ref();
        let allocation = table.delete_object(&oid).unwrap();
        allocator.free(allocation);
    }

    #[test]
    fn test_byte_accounting() {
        let allocator = HeapAllocator::new(1 << 20);
        let mut table = ObjectTable::new();
        let oid1 = make_oid(1);
        let oid2 = make_oid(2);
        let info1 = ObjectInfo {
            object_id: oid1,
            data_size: 100,
            ..Default::default()
        };
        let info2 = ObjectInfo {
            object_id: oid2,
            data_size: 200,
            ..Default::default()
        };
        table
            .create_object(alloc_for(&allocator, &info1), info1, ObjectSource::CreatedByWorker)
            .unwrap();
        table
            .create_object(alloc_for(&allocator, &info2), info2, ObjectSource::CreatedByWorker)
            .unwrap();
        assert_eq!(table.num_bytes_unsealed(), 300);
        assert_eq!(table.num_bytes_sealed(), 0);

        table.seal_object(&oid1).unwrap();
        assert_eq!(table.num_bytes_unsealed(), 200);
        assert_eq!(table.num_bytes_sealed(), 100);

        let allocation = table.delete_object(&oid1).unwrap();
        allocator.free(allocation);
        assert_eq!(table.num_bytes_in_use(), 200);
        assert_eq!(table.cumulative_created_bytes(), 300);
    }

    #[test]
    fn test_zero_size_object() {
        let allocator = HeapAllocator::new(1 << 20);
        let mut table = ObjectTable::new();
        let oid = make_oid(1);
        let info = ObjectInfo {
            object_id: oid,
            data_size: 0,
            metadata_size: 0,
            ..Default::default()
        };
        table
            .create_object(alloc_for(&allocator, &info), info, ObjectSource::CreatedByWorker)
            .unwrap();
        table.seal_object(&oid).unwrap();
        let (metadata, data) = table.get(&oid).unwrap().read().unwrap();
        assert!(metadata.is_empty());
        assert!(data.is_empty());
    }
}
