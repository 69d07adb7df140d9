// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Typed ids.
//!
//! Every entity kind has a fixed-width opaque id; equality and ordering are
//! bytewise. Ids embed their parents so ownership can be recovered without a
//! lookup:
//! - `JobID` (4 bytes)
//! - `ActorID` (16 bytes = 12 unique + 4 JobID)
//! - `TaskID` (24 bytes = 8 unique + 16 ActorID)
//! - `ObjectID` (28 bytes = 4 index + 24 TaskID)
//! - `PlacementGroupID` (16 bytes = 12 unique + 4 JobID)
//! - `NodeID` / `WorkerID` / `ChannelID` / `UniqueID` (28 bytes)

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::constants::UNIQUE_ID_SIZE;

// MurmurHash64A. Ids are hashed with this fixed function so the same id
// hashes identically in every process of the cluster.
fn murmur_hash_64a(key: &[u8], seed: u64) -> u64 {
    const M: u64 = 0xc6a4a7935bd1e995;
    const R: i32 = 47;

    let len = key.len();
    let mut h: u64 = seed ^ ((len as u64).wrapping_mul(M));

    let n_blocks = len / 8;
    for i in 0..n_blocks {
        let offset = i * 8;
        let mut k = u64::from_le_bytes(key[offset..offset + 8].try_into().unwrap());

        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = &key[n_blocks * 8..];
    let remaining = len & 7;
    if remaining >= 7 {
        h ^= (tail[6] as u64) << 48;
    }
    if remaining >= 6 {
        h ^= (tail[5] as u64) << 40;
    }
    if remaining >= 5 {
        h ^= (tail[4] as u64) << 32;
    }
    if remaining >= 4 {
        h ^= (tail[3] as u64) << 24;
    }
    if remaining >= 3 {
        h ^= (tail[2] as u64) << 16;
    }
    if remaining >= 2 {
        h ^= (tail[1] as u64) << 8;
    }
    if remaining >= 1 {
        h ^= tail[0] as u64;
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;

    h
}

/// Generates a fixed-size id type.
///
/// Each id is a `[u8; N]` newtype with binary/hex/random constructors,
/// bytewise equality and ordering, and a nil value of all `0xFF` bytes.
macro_rules! define_tidal_id {
    ($name:ident, $size:expr) => {
        #[derive(Clone, Copy, PartialOrd, Ord)]
        #[repr(C)]
        pub struct $name {
            data: [u8; $size],
        }

        impl $name {
            /// The fixed byte size of this id type.
            pub const SIZE: usize = $size;

            /// The nil id (all 0xFF bytes).
            pub const fn nil() -> Self {
                Self {
                    data: [0xFF; $size],
                }
            }

            /// Build from raw bytes. Panics when `bytes.len() != SIZE`.
            pub fn from_binary(bytes: &[u8]) -> Self {
                assert_eq!(
                    bytes.len(),
                    $size,
                    "expected {} bytes for {}, got {}",
                    $size,
                    stringify!($name),
                    bytes.len()
                );
                let mut data = [0u8; $size];
                data.copy_from_slice(bytes);
                Self { data }
            }

            /// Build from raw bytes, falling back to nil on a size mismatch.
            pub fn try_from_binary(bytes: &[u8]) -> Self {
                if bytes.len() == $size {
                    Self::from_binary(bytes)
                } else {
                    Self::nil()
                }
            }

            /// Build from a lowercase hex string. Returns nil on bad input.
            pub fn from_hex(hex_str: &str) -> Self {
                if hex_str.len() != $size * 2 {
                    tracing::error!(
                        "bad hex length for {}: expected {}, got {}",
                        stringify!($name),
                        $size * 2,
                        hex_str.len()
                    );
                    return Self::nil();
                }
                match hex::decode(hex_str) {
                    Ok(bytes) => Self::from_binary(&bytes),
                    Err(_) => {
                        tracing::error!("bad hex string for {}", stringify!($name));
                        Self::nil()
                    }
                }
            }

            /// A random id.
            pub fn from_random() -> Self {
                let mut data = [0u8; $size];
                tidal_util::random::fill_random(&mut data);
                Self { data }
            }

            pub fn is_nil(&self) -> bool {
                self.data == [0xFF; $size]
            }

            pub fn data(&self) -> &[u8; $size] {
                &self.data
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.data
            }

            /// Owned copy of the raw bytes.
            pub fn binary(&self) -> Vec<u8> {
                self.data.to_vec()
            }

            /// Lowercase hex rendering.
            pub fn hex(&self) -> String {
                hex::encode(self.data)
            }

            pub fn murmur_hash(&self) -> u64 {
                murmur_hash_64a(&self.data, 0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.data == other.data
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.murmur_hash().hash(state);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.hex())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.data
            }
        }
    };
}

define_tidal_id!(UniqueID, UNIQUE_ID_SIZE);
define_tidal_id!(JobID, 4);
define_tidal_id!(ActorID, 16);
define_tidal_id!(TaskID, 24);
define_tidal_id!(ObjectID, 28);
define_tidal_id!(PlacementGroupID, 16);
define_tidal_id!(WorkerID, UNIQUE_ID_SIZE);
define_tidal_id!(NodeID, UNIQUE_ID_SIZE);
define_tidal_id!(ChannelID, UNIQUE_ID_SIZE);

// ── JobID ───────────────────────────────────────────────────────────────

impl JobID {
    /// Build from an integer.
    pub fn from_int(value: u32) -> Self {
        Self {
            data: value.to_be_bytes(),
        }
    }

    pub fn to_int(&self) -> u32 {
        u32::from_be_bytes(self.data)
    }
}

// ── ActorID ─────────────────────────────────────────────────────────────

impl ActorID {
    const UNIQUE_BYTES_LENGTH: usize = 12;

    /// Deterministic actor id derived from the creating task and counter,
    /// with the job id embedded in the trailing bytes.
    pub fn of(job_id: &JobID, parent_task_id: &TaskID, parent_task_counter: usize) -> Self {
        let mut data = [0u8; 16];

        let mut hash_input = Vec::with_capacity(TaskID::SIZE + 8);
        hash_input.extend_from_slice(parent_task_id.as_bytes());
        hash_input.extend_from_slice(&(parent_task_counter as u64).to_le_bytes());

        let hash = murmur_hash_64a(&hash_input, 0);
        data[..8].copy_from_slice(&hash.to_le_bytes());

        let hash2 = murmur_hash_64a(&hash.to_le_bytes(), 1);
        data[8..Self::UNIQUE_BYTES_LENGTH].copy_from_slice(&hash2.to_le_bytes()[..4]);

        data[Self::UNIQUE_BYTES_LENGTH..].copy_from_slice(job_id.data());

        Self { data }
    }

    /// The embedded job id (last 4 bytes).
    pub fn job_id(&self) -> JobID {
        JobID::from_binary(&self.data[Self::UNIQUE_BYTES_LENGTH..])
    }
}

// ── TaskID ──────────────────────────────────────────────────────────────

impl TaskID {
    const UNIQUE_BYTES_LENGTH: usize = 8;

    /// The id of an actor's creation task: zero unique bytes + actor id.
    pub fn for_actor_creation_task(actor_id: &ActorID) -> Self {
        let mut data = [0u8; 24];
        data[Self::UNIQUE_BYTES_LENGTH..].copy_from_slice(actor_id.data());
        Self { data }
    }

    pub fn for_normal_task(
        job_id: &JobID,
        parent_task_id: &TaskID,
        parent_task_counter: usize,
    ) -> Self {
        Self::for_actor_task(job_id, parent_task_id, parent_task_counter, &ActorID::nil())
    }

    pub fn for_actor_task(
        _job_id: &JobID,
        parent_task_id: &TaskID,
        parent_task_counter: usize,
        actor_id: &ActorID,
    ) -> Self {
        let mut data = [0u8; 24];

        let mut hash_input = Vec::with_capacity(TaskID::SIZE + 8);
        hash_input.extend_from_slice(parent_task_id.as_bytes());
        hash_input.extend_from_slice(&(parent_task_counter as u64).to_le_bytes());
        let hash = murmur_hash_64a(&hash_input, 0);

        data[..Self::UNIQUE_BYTES_LENGTH].copy_from_slice(&hash.to_le_bytes());
        data[Self::UNIQUE_BYTES_LENGTH..].copy_from_slice(actor_id.data());

        Self { data }
    }

    /// The driver task id for a job.
    pub fn for_driver_task(job_id: &JobID) -> Self {
        let actor_id = ActorID::of(job_id, &TaskID::nil(), 0);
        Self::for_actor_creation_task(&actor_id)
    }

    /// The embedded actor id (last 16 bytes).
    pub fn actor_id(&self) -> ActorID {
        ActorID::from_binary(&self.data[Self::UNIQUE_BYTES_LENGTH..])
    }

    pub fn job_id(&self) -> JobID {
        self.actor_id().job_id()
    }

    /// Whether this id names an actor creation task (zero unique bytes).
    pub fn is_for_actor_creation_task(&self) -> bool {
        self.data[..Self::UNIQUE_BYTES_LENGTH]
            .iter()
            .all(|&b| b == 0)
    }
}

// ── ObjectID ────────────────────────────────────────────────────────────

impl ObjectID {
    const INDEX_BYTES_LENGTH: usize = 4;

    /// Maximum return index a single task can produce.
    pub const MAX_OBJECT_INDEX: u64 = (1u64 << 32) - 1;

    /// Build from the producing task id and a return/put index. The task id
    /// is embedded so the owner worker can be located from the object id.
    pub fn from_index(task_id: &TaskID, index: u32) -> Self {
        let mut data = [0u8; 28];
        data[..Self::INDEX_BYTES_LENGTH].copy_from_slice(&index.to_be_bytes());
        data[Self::INDEX_BYTES_LENGTH..].copy_from_slice(task_id.data());
        Self { data }
    }

    /// The return/put index (first 4 bytes, big-endian).
    pub fn object_index(&self) -> u32 {
        u32::from_be_bytes(self.data[..Self::INDEX_BYTES_LENGTH].try_into().unwrap())
    }

    /// The embedded producing task id (last 24 bytes).
    pub fn task_id(&self) -> TaskID {
        TaskID::from_binary(&self.data[Self::INDEX_BYTES_LENGTH..])
    }

    /// The sentinel object tracking an actor handle's lifetime.
    pub fn for_actor_handle(actor_id: &ActorID) -> Self {
        let task_id = TaskID::for_actor_creation_task(actor_id);
        Self::from_index(&task_id, 1)
    }

    pub fn is_actor_handle_id(object_id: &ObjectID) -> bool {
        object_id.object_index() == 1 && object_id.task_id().is_for_actor_creation_task()
    }

    pub fn to_actor_id(object_id: &ObjectID) -> ActorID {
        object_id.task_id().actor_id()
    }
}

// ── PlacementGroupID ────────────────────────────────────────────────────

impl PlacementGroupID {
    const UNIQUE_BYTES_LENGTH: usize = 12;

    /// A random placement group id bound to a job.
    pub fn of(job_id: &JobID) -> Self {
        let mut data = [0u8; 16];
        tidal_util::random::fill_random(&mut data[..Self::UNIQUE_BYTES_LENGTH]);
        data[Self::UNIQUE_BYTES_LENGTH..].copy_from_slice(job_id.data());
        Self { data }
    }

    pub fn job_id(&self) -> JobID {
        JobID::from_binary(&self.data[Self::UNIQUE_BYTES_LENGTH..])
    }
}

// ── WorkerID ────────────────────────────────────────────────────────────

impl WorkerID {
    /// The driver's worker id for a job: job bytes then zeros.
    pub fn for_driver(job_id: &JobID) -> Self {
        let mut data = [0u8; UNIQUE_ID_SIZE];
        data[..JobID::SIZE].copy_from_slice(job_id.data());
        Self { data }
    }
}

/// Bundle id: a placement group id plus the bundle's index within the group.
pub type BundleID = (PlacementGroupID, i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_id() {
        let id = JobID::nil();
        assert!(id.is_nil());
        assert_eq!(id.data(), &[0xFF; 4]);
    }

    #[test]
    fn test_job_id_roundtrip() {
        for val in [0u32, 1, 4096, u32::MAX] {
            let id = JobID::from_int(val);
            assert_eq!(id.to_int(), val);
            assert_eq!(JobID::from_hex(&id.hex()), id);
            assert_eq!(JobID::from_binary(&id.binary()), id);
        }
    }

    #[test]
    fn test_actor_id_embeds_job_id() {
        let job_id = JobID::from_int(7);
        let actor_id = ActorID::of(&job_id, &TaskID::nil(), 0);
        assert_eq!(actor_id.job_id(), job_id);
    }

    #[test]
    fn test_actor_id_is_deterministic() {
        let job_id = JobID::from_int(1);
        let a = ActorID::of(&job_id, &TaskID::nil(), 3);
        let b = ActorID::of(&job_id, &TaskID::nil(), 3);
        let c = ActorID::of(&job_id, &TaskID::nil(), 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_task_id_embeds_actor_id() {
        let job_id = JobID::from_int(3);
        let actor_id = ActorID::of(&job_id, &TaskID::nil(), 1);
        let task_id = TaskID::for_actor_creation_task(&actor_id);
        assert_eq!(task_id.actor_id(), actor_id);
        assert!(task_id.is_for_actor_creation_task());
    }

    #[test]
    fn test_object_id_embeds_task_id() {
        let task_id = TaskID::from_random();
        let obj_id = ObjectID::from_index(&task_id, 5);
        assert_eq!(obj_id.object_index(), 5);
        assert_eq!(obj_id.task_id(), task_id);
    }

    #[test]
    fn test_object_id_for_actor_handle() {
        let job_id = JobID::from_int(1);
        let actor_id = ActorID::of(&job_id, &TaskID::nil(), 0);
        let obj_id = ObjectID::for_actor_handle(&actor_id);
        assert!(ObjectID::is_actor_handle_id(&obj_id));
        assert_eq!(ObjectID::to_actor_id(&obj_id), actor_id);
    }

    #[test]
    fn test_placement_group_id_embeds_job_id() {
        let job_id = JobID::from_int(99);
        let pg_id = PlacementGroupID::of(&job_id);
        assert_eq!(pg_id.job_id(), job_id);
        assert_eq!(PlacementGroupID::SIZE, 16);
    }

    #[test]
    fn test_unique_id_sizes() {
        assert_eq!(UniqueID::SIZE, 28);
        assert_eq!(WorkerID::SIZE, 28);
        assert_eq!(NodeID::SIZE, 28);
        assert_eq!(ChannelID::SIZE, 28);
        assert_eq!(TaskID::SIZE, 24);
        assert_eq!(ActorID::SIZE, 16);
        assert_eq!(ObjectID::SIZE, 28);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = UniqueID::from_random();
        let hex_str = id.hex();
        assert_eq!(hex_str.len(), 56);
        assert_eq!(UniqueID::from_hex(&hex_str), id);
    }

    #[test]
    fn test_try_from_binary_bad_size_is_nil() {
        assert!(NodeID::try_from_binary(&[1, 2, 3]).is_nil());
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let lo = NodeID::from_binary(&[0u8; 28]);
        let mut hi_bytes = [0u8; 28];
        hi_bytes[0] = 1;
        let hi = NodeID::from_binary(&hi_bytes);
        assert!(lo < hi);
    }

    #[test]
    fn test_hash_deterministic() {
        let id = UniqueID::from_random();
        assert_eq!(id.murmur_hash(), id.murmur_hash());
    }
}
