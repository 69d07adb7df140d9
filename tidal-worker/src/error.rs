// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Worker-level error types.

use tidal_common::status::TidalError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("object already exists: {0}")]
    ObjectAlreadyExists(String),

    #[error("actor not found: {0}")]
    ActorNotFound(String),

    #[error("task submission failed: {0}")]
    TaskSubmissionFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation timed out: {0}")]
    TimedOut(String),

    #[error("status: {0}")]
    Status(#[from] TidalError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type WorkerResult<T> = Result<T, WorkerError>;

impl WorkerError {
    /// Flatten to the shared status taxonomy for wire replies.
    pub fn into_status(self) -> TidalError {
        match self {
            WorkerError::Status(status) => status,
            WorkerError::ObjectNotFound(msg) => TidalError::object_not_found(msg),
            WorkerError::ObjectAlreadyExists(msg) => TidalError::already_exists(msg),
            WorkerError::ActorNotFound(msg) => TidalError::not_found(msg),
            WorkerError::TaskSubmissionFailed(msg) => TidalError::rpc_error(msg),
            WorkerError::InvalidArgument(msg) => TidalError::invalid_argument(msg),
            WorkerError::TimedOut(msg) => TidalError::timed_out(msg),
            WorkerError::Internal(msg) => TidalError::new(
                tidal_common::status::StatusCode::UnknownError,
                msg,
            ),
        }
    }
}
