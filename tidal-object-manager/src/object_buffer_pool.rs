// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Receive-side buffer pool for chunked transfers.
//!
//! On the first chunk of a push the pool creates the object in the local
//! store sized `metadata_size + data_size` and writes every chunk at its
//! offset. Duplicate chunks are dropped. The buffer is always either sealed
//! (all chunks written) or aborted, never leaked.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use tidal_common::id::ObjectID;

use crate::common::{ObjectInfo, ObjectSource, PlasmaError};
use crate::plasma::store::LocalObjectStore;

struct CreateState {
    num_chunks: u64,
    chunks_written: HashSet<u64>,
    total_size: u64,
    chunk_size: u64,
}

/// Assembles inbound objects chunk by chunk.
pub struct ObjectBufferPool {
    store: Arc<LocalObjectStore>,
    chunk_size: u64,
    creating: Mutex<HashMap<ObjectID, CreateState>>,
}

impl ObjectBufferPool {
    pub fn new(store: Arc<LocalObjectStore>, chunk_size: u64) -> Self {
        Self {
            store,
            chunk_size,
            creating: Mutex::new(HashMap::new()),
        }
    }

    /// Number of chunks for an object of `total_size` bytes. A zero-size
    /// object still occupies one (empty) chunk.
    pub fn num_chunks(&self, total_size: u64) -> u64 {
        if total_size == 0 {
            return 1;
        }
        total_size.div_ceil(self.chunk_size)
    }

    /// Byte length of the chunk at `chunk_index`.
    pub fn chunk_len(&self, total_size: u64, chunk_index: u64) -> u64 {
        let start = chunk_index * self.chunk_size;
        if start >= total_size {
            return 0;
        }
        (total_size - start).min(self.chunk_size)
    }

    /// Write one received chunk. Creates the local object on first contact;
    /// returns `Ok(true)` once the object is complete and sealed.
    ///
    /// If the object vanished from the store between chunks (evicted or
    /// aborted), the transfer state is dropped and the chunk ignored.
    pub fn write_chunk(
        &self,
        object_info: &ObjectInfo,
        chunk_index: u64,
        chunk: &[u8],
    ) -> Result<bool, PlasmaError> {
        let object_id = object_info.object_id;
        let total_size = object_info.total_size();

        {
            let mut creating = self.creating.lock();
            if !creating.contains_key(&object_id) {
                if self.store.contains(&object_id) {
                    // Already resident (or mid-write from another source);
                    // drop the chunk.
                    return Ok(false);
                }
                self.store
                    .create(object_info.clone(), ObjectSource::ReceivedFromRemoteNode)?;
                creating.insert(
                    object_id,
                    CreateState {
                        num_chunks: self.num_chunks(total_size),
                        chunks_written: HashSet::new(),
                        total_size,
                        chunk_size: self.chunk_size,
                    },
                );
            }
        }

        let complete = {
            let mut creating = self.creating.lock();
            let state = match creating.get_mut(&object_id) {
                Some(state) => state,
                None => return Ok(false),
            };

            if chunk_index >= state.num_chunks {
                return Err(PlasmaError::OutOfMemory);
            }
            if !state.chunks_written.insert(chunk_index) {
                // Duplicate chunk; receiver drops it.
                return Ok(false);
            }

            let offset = (chunk_index * state.chunk_size) as usize;
            let expected = self.chunk_len(state.total_size, chunk_index) as usize;
            if chunk.len() != expected {
                state.chunks_written.remove(&chunk_index);
                return Err(PlasmaError::OutOfMemory);
            }

            match self.store.write_raw_at(&object_id, offset, chunk) {
                Ok(()) => {}
                Err(err) => {
                    // The object went away mid-transfer; forget it.
                    creating.remove(&object_id);
                    return Err(err);
                }
            }

            if state.chunks_written.len() as u64 == state.num_chunks {
                creating.remove(&object_id);
                true
            } else {
                false
            }
        };

        if complete {
            self.store.seal(&object_id)?;
        }
        Ok(complete)
    }

    /// Abort an in-flight receive, releasing the partial buffer.
    pub fn abort_create(&self, object_id: &ObjectID) {
        if self.creating.lock().remove(object_id).is_some() {
            let _ = self.store.abort_create(object_id);
        }
    }

    pub fn is_creating(&self, object_id: &ObjectID) -> bool {
        self.creating.lock().contains_key(object_id)
    }

    pub fn num_creating(&self) -> usize {
        self.creating.lock().len()
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plasma::allocator::HeapAllocator;
    use std::time::Duration;

    fn make_oid(val: u8) -> ObjectID {
        let mut data = [0u8; 28];
        data[0] = val;
        ObjectID::from_binary(&data)
    }

    fn make_pool(chunk_size: u64) -> (Arc<LocalObjectStore>, ObjectBufferPool) {
        let store = Arc::new(LocalObjectStore::new(
            Arc::new(HeapAllocator::new(1 << 20)),
            1 << 20,
        ));
        let pool = ObjectBufferPool::new(Arc::clone(&store), chunk_size);
        (store, pool)
    }

    fn info_for(oid: ObjectID, data_size: u64, metadata_size: u64) -> ObjectInfo {
        ObjectInfo {
            object_id: oid,
            data_size,
            metadata_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_chunk_math() {
        let (_store, pool) = make_pool(1024);
        assert_eq!(pool.num_chunks(0), 1);
        assert_eq!(pool.num_chunks(1024), 1);
        assert_eq!(pool.num_chunks(1025), 2);
        assert_eq!(pool.chunk_len(2500, 0), 1024);
        assert_eq!(pool.chunk_len(2500, 2), 452);
        assert_eq!(pool.chunk_len(2500, 3), 0);
    }

    #[tokio::test]
    async fn test_assemble_in_order() {
        let (store, pool) = make_pool(4);
        let oid = make_oid(1);
        // metadata "mm" + data "abcdefgh" = 10 bytes = 3 chunks of 4.
        let info = info_for(oid, 8, 2);

        assert!(!pool.write_chunk(&info, 0, b"mmab").unwrap());
        assert!(!pool.write_chunk(&info, 1, b"cdef").unwrap());
        assert!(pool.write_chunk(&info, 2, b"gh").unwrap());

        let results = store.get(&[oid], Duration::from_millis(10)).await;
        match &results[0] {
            crate::plasma::store::GetResult::Found(buf) => {
                assert_eq!(&buf.metadata[..], b"mm");
                assert_eq!(&buf.data[..], b"abcdefgh");
            }
            _ => panic!("object should be sealed"),
        }
    }

    #[tokio::test]
    async fn test_assemble_out_of_order_with_duplicates() {
        let (store, pool) = make_pool(4);
        let oid = make_oid(2);
        let info = info_for(oid, 8, 0);

        assert!(!pool.write_chunk(&info, 1, b"efgh").unwrap());
        // Duplicate of chunk 1 is dropped.
        assert!(!pool.write_chunk(&info, 1, b"efgh").unwrap());
        assert!(pool.write_chunk(&info, 0, b"abcd").unwrap());

        let results = store.get(&[oid], Duration::from_millis(10)).await;
        match &results[0] {
            crate::plasma::store::GetResult::Found(buf) => {
                assert_eq!(&buf.data[..], b"abcdefgh");
            }
            _ => panic!("object should be sealed"),
        }
    }

    #[test]
    fn test_wrong_chunk_length_rejected() {
        let (_store, pool) = make_pool(4);
        let oid = make_oid(3);
        let info = info_for(oid, 8, 0);
        assert!(pool.write_chunk(&info, 0, b"ab").is_err());
        // The right-sized chunk still lands afterwards.
        assert!(!pool.write_chunk(&info, 0, b"abcd").unwrap());
    }

    #[test]
    fn test_chunk_index_out_of_range() {
        let (_store, pool) = make_pool(4);
        let oid = make_oid(4);
        let info = info_for(oid, 8, 0);
        assert!(pool.write_chunk(&info, 5, b"abcd").is_err());
    }

    #[test]
    fn test_abort_create_releases() {
        let (store, pool) = make_pool(4);
        let oid = make_oid(5);
        let info = info_for(oid, 8, 0);
        pool.write_chunk(&info, 0, b"abcd").unwrap();
        assert!(pool.is_creating(&oid));

        pool.abort_create(&oid);
        assert!(!pool.is_creating(&oid));
        assert!(!store.contains(&oid));
    }

    #[test]
    fn test_zero_size_object_single_empty_chunk() {
        let (store, pool) = make_pool(4);
        let oid = make_oid(6);
        let info = info_for(oid, 0, 0);
        assert!(pool.write_chunk(&info, 0, b"").unwrap());
        assert!(store.contains_sealed(&oid));
    }

    #[test]
    fn test_chunks_for_resident_object_dropped() {
        let (store, pool) = make_pool(4);
        let oid = make_oid(7);
        let info = info_for(oid, 4, 0);
        assert!(pool.write_chunk(&info, 0, b"data").unwrap());
        assert!(store.contains_sealed(&oid));
        // A late retransmission after completion is ignored.
        assert!(!pool.write_chunk(&info, 0, b"data").unwrap());
    }
}
