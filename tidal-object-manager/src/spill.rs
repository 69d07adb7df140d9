// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! File-backed object spilling.
//!
//! Spilled objects live as files under a spill root, keyed by object id.
//! File layout: `[u64 metadata_len][metadata][data]`. The returned URL is
//! `file://<path>`; the directory records it so any node can restore.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use tidal_common::id::ObjectID;
use tidal_common::status::{TidalError, TidalResult};

/// Writes and restores spill files under one root directory.
pub struct SpillManager {
    root: PathBuf,
}

impl SpillManager {
    pub fn new(root: impl Into<PathBuf>) -> TidalResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| TidalError::io_error(format!("create spill root: {e}")))?;
        Ok(Self { root })
    }

    fn path_for(&self, object_id: &ObjectID) -> PathBuf {
        self.root.join(object_id.hex())
    }

    /// Spill one object; returns its restore URL.
    pub fn spill_object(
        &self,
        object_id: &ObjectID,
        metadata: &[u8],
        data: &[u8],
    ) -> TidalResult<String> {
        let path = self.path_for(object_id);
        let mut file = fs::File::create(&path)
            .map_err(|e| TidalError::io_error(format!("create spill file: {e}")))?;
        file.write_all(&(metadata.len() as u64).to_be_bytes())
            .and_then(|_| file.write_all(metadata))
            .and_then(|_| file.write_all(data))
            .map_err(|e| TidalError::io_error(format!("write spill file: {e}")))?;
        Ok(format!("file://{}", path.display()))
    }

    /// Restore an object from its URL; returns (metadata, data).
    pub fn restore_object(&self, url: &str) -> TidalResult<(Vec<u8>, Vec<u8>)> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| TidalError::invalid_argument(format!("bad spill url: {url}")))?;
        let mut file = fs::File::open(path)
            .map_err(|e| TidalError::object_lost(format!("open spill file {path}: {e}")))?;

        let mut len_buf = [0u8; 8];
        file.read_exact(&mut len_buf)
            .map_err(|e| TidalError::io_error(format!("read spill header: {e}")))?;
        let metadata_len = u64::from_be_bytes(len_buf) as usize;

        let mut rest = Vec::new();
        file.read_to_end(&mut rest)
            .map_err(|e| TidalError::io_error(format!("read spill body: {e}")))?;
        if rest.len() < metadata_len {
            return Err(TidalError::io_error("truncated spill file"));
        }
        let data = rest.split_off(metadata_len);
        Ok((rest, data))
    }

    /// Delete the spill file of an object, if present.
    pub fn delete_spilled(&self, object_id: &ObjectID) {
        let _ = fs::remove_file(self.path_for(object_id));
    }
}
