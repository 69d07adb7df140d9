// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! RPC framework for Tidal.
//!
//! Messages are prost-encoded and framed with a length prefix over TCP:
//!
//! ```text
//! request:  [u32 len][u8 method][body]
//! reply:    [u32 len][u8 method][i8 status][body-or-error-message]
//! ```
//!
//! Clients are retrying wrappers that classify status codes as transient or
//! permanent; servers are per-connection dispatch loops over a handler trait.

pub mod client;
pub mod frame;
pub mod method;
pub mod server;

pub use client::{ConnectionState, RetryConfig, RpcClient};
pub use server::{RpcServer, ServiceHandler};
