// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Status and error types shared across the workspace.
//!
//! Error kinds fall into a fixed taxonomy; subsystems attach a message. The
//! transient kinds (`TimedOut`, `RpcError`, `TransientObjectStoreFull`,
//! `OutOfResource`) are the retryable ones; everything else is surfaced to
//! the caller or materialized as an error object.

use std::fmt;

/// Status codes. Values are stable across the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum StatusCode {
    OK = 0,
    OutOfMemory = 1,
    KeyError = 2,
    Invalid = 4,
    IOError = 5,
    UnknownError = 9,
    NotImplemented = 10,
    RedisError = 11,
    TimedOut = 12,
    Interrupted = 13,
    IntentionalSystemExit = 14,
    UnexpectedSystemExit = 15,
    NotFound = 17,
    Disconnected = 18,
    SchedulingCancelled = 19,
    AlreadyExists = 20,
    ObjectExists = 21,
    ObjectNotFound = 22,
    ObjectAlreadySealed = 23,
    ObjectStoreFull = 24,
    TransientObjectStoreFull = 25,
    ObjectLost = 26,
    OwnerDied = 27,
    OutOfDisk = 28,
    ActorDied = 29,
    RpcError = 30,
    OutOfResource = 31,
    Infeasible = 32,
    InvalidArgument = 34,
    ChannelError = 35,
    ChannelTimeoutError = 36,
    ChannelFull = 37,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OK => "OK",
            Self::OutOfMemory => "OutOfMemory",
            Self::KeyError => "KeyError",
            Self::Invalid => "Invalid",
            Self::IOError => "IOError",
            Self::UnknownError => "UnknownError",
            Self::NotImplemented => "NotImplemented",
            Self::RedisError => "RedisError",
            Self::TimedOut => "TimedOut",
            Self::Interrupted => "Interrupted",
            Self::IntentionalSystemExit => "IntentionalSystemExit",
            Self::UnexpectedSystemExit => "UnexpectedSystemExit",
            Self::NotFound => "NotFound",
            Self::Disconnected => "Disconnected",
            Self::SchedulingCancelled => "SchedulingCancelled",
            Self::AlreadyExists => "AlreadyExists",
            Self::ObjectExists => "ObjectExists",
            Self::ObjectNotFound => "ObjectNotFound",
            Self::ObjectAlreadySealed => "ObjectAlreadySealed",
            Self::ObjectStoreFull => "ObjectStoreFull",
            Self::TransientObjectStoreFull => "TransientObjectStoreFull",
            Self::ObjectLost => "ObjectLost",
            Self::OwnerDied => "OwnerDied",
            Self::OutOfDisk => "OutOfDisk",
            Self::ActorDied => "ActorDied",
            Self::RpcError => "RpcError",
            Self::OutOfResource => "OutOfResource",
            Self::Infeasible => "Infeasible",
            Self::InvalidArgument => "InvalidArgument",
            Self::ChannelError => "ChannelError",
            Self::ChannelTimeoutError => "ChannelTimeoutError",
            Self::ChannelFull => "ChannelFull",
        }
    }

    /// Parse a code from its string name.
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Self::OK),
            "OutOfMemory" => Some(Self::OutOfMemory),
            "KeyError" => Some(Self::KeyError),
            "Invalid" => Some(Self::Invalid),
            "IOError" => Some(Self::IOError),
            "UnknownError" => Some(Self::UnknownError),
            "NotImplemented" => Some(Self::NotImplemented),
            "RedisError" => Some(Self::RedisError),
            "TimedOut" => Some(Self::TimedOut),
            "Interrupted" => Some(Self::Interrupted),
            "IntentionalSystemExit" => Some(Self::IntentionalSystemExit),
            "UnexpectedSystemExit" => Some(Self::UnexpectedSystemExit),
            "NotFound" => Some(Self::NotFound),
            "Disconnected" => Some(Self::Disconnected),
            "SchedulingCancelled" => Some(Self::SchedulingCancelled),
            "AlreadyExists" => Some(Self::AlreadyExists),
            "ObjectExists" => Some(Self::ObjectExists),
            "ObjectNotFound" => Some(Self::ObjectNotFound),
            "ObjectAlreadySealed" => Some(Self::ObjectAlreadySealed),
            "ObjectStoreFull" => Some(Self::ObjectStoreFull),
            "TransientObjectStoreFull" => Some(Self::TransientObjectStoreFull),
            "ObjectLost" => Some(Self::ObjectLost),
            "OwnerDied" => Some(Self::OwnerDied),
            "OutOfDisk" => Some(Self::OutOfDisk),
            "ActorDied" => Some(Self::ActorDied),
            "RpcError" => Some(Self::RpcError),
            "OutOfResource" => Some(Self::OutOfResource),
            "Infeasible" => Some(Self::Infeasible),
            "InvalidArgument" => Some(Self::InvalidArgument),
            "ChannelError" => Some(Self::ChannelError),
            "ChannelTimeoutError" => Some(Self::ChannelTimeoutError),
            "ChannelFull" => Some(Self::ChannelFull),
            _ => None,
        }
    }

    /// Whether this code is worth retrying by a submitter.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TimedOut
                | Self::RpcError
                | Self::TransientObjectStoreFull
                | Self::OutOfResource
                | Self::Disconnected
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The primary error type for Tidal operations.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TidalError {
    pub code: StatusCode,
    pub message: String,
}

impl TidalError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::OutOfMemory, msg)
    }
    pub fn key_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::KeyError, msg)
    }
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Invalid, msg)
    }
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::IOError, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, msg)
    }
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NotImplemented, msg)
    }
    pub fn timed_out(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::TimedOut, msg)
    }
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Disconnected, msg)
    }
    pub fn redis_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::RedisError, msg)
    }
    pub fn rpc_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::RpcError, msg)
    }
    pub fn object_store_full(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::ObjectStoreFull, msg)
    }
    pub fn object_not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::ObjectNotFound, msg)
    }
    pub fn object_lost(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::ObjectLost, msg)
    }
    pub fn owner_died(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::OwnerDied, msg)
    }
    pub fn actor_died(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::ActorDied, msg)
    }
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::AlreadyExists, msg)
    }
    pub fn scheduling_cancelled(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SchedulingCancelled, msg)
    }
    pub fn out_of_resource(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::OutOfResource, msg)
    }
    pub fn infeasible(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Infeasible, msg)
    }
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, msg)
    }
    pub fn interrupted(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Interrupted, msg)
    }
    pub fn channel_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::ChannelError, msg)
    }
    pub fn channel_full(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::ChannelFull, msg)
    }
    pub fn channel_timeout(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::ChannelTimeoutError, msg)
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.code == StatusCode::OutOfMemory
    }
    pub fn is_not_found(&self) -> bool {
        self.code == StatusCode::NotFound
    }
    pub fn is_timed_out(&self) -> bool {
        self.code == StatusCode::TimedOut
    }
    pub fn is_object_lost(&self) -> bool {
        self.code == StatusCode::ObjectLost
    }
    pub fn is_owner_died(&self) -> bool {
        self.code == StatusCode::OwnerDied
    }
    pub fn is_actor_died(&self) -> bool {
        self.code == StatusCode::ActorDied
    }
    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}

/// Convenience alias: `Result<T, TidalError>`.
pub type TidalResult<T> = Result<T, TidalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_roundtrip() {
        let code = StatusCode::ObjectLost;
        assert_eq!(code.as_str(), "ObjectLost");
        assert_eq!(StatusCode::from_str_name("ObjectLost"), Some(code));
    }

    #[test]
    fn test_error_display() {
        let err = TidalError::io_error("disk full");
        assert_eq!(err.to_string(), "IOError: disk full");
    }

    #[test]
    fn test_transient_classification() {
        assert!(StatusCode::TimedOut.is_transient());
        assert!(StatusCode::RpcError.is_transient());
        assert!(StatusCode::OutOfResource.is_transient());
        assert!(!StatusCode::ActorDied.is_transient());
        assert!(!StatusCode::ObjectLost.is_transient());
        assert!(!StatusCode::Infeasible.is_transient());
        assert!(!StatusCode::InvalidArgument.is_transient());
    }

    #[test]
    fn test_result_alias() {
        let err: TidalResult<()> = Err(TidalError::actor_died("restarts exhausted"));
        assert!(err.unwrap_err().is_actor_died());
    }
}
