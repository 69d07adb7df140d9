// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Retrying RPC client.
//!
//! `RpcClient` keeps one lazily-established TCP connection per peer and
//! serializes unary calls on it. Transient failures (timeouts, connection
//! loss, resource pressure) are retried with exponential backoff up to the
//! configured budget; everything else returns immediately.

use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use tidal_common::status::{TidalError, TidalResult};

use crate::frame;

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connected = 0,
    Disconnected = 1,
    Reconnecting = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connected,
            2 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }
}

/// Retry behavior for RPC calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts beyond the first call.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Overall budget before the peer is declared unavailable.
    pub server_unavailable_timeout: Duration,
    /// Cap on in-flight request bytes before new calls are rejected.
    pub max_pending_bytes: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            server_unavailable_timeout: Duration::from_secs(60),
            max_pending_bytes: 100 * 1024 * 1024,
        }
    }
}

/// A client for one remote endpoint.
#[derive(Clone)]
pub struct RpcClient {
    addr: String,
    retry_config: RetryConfig,
    stream: Arc<Mutex<Option<TcpStream>>>,
    connection_state: Arc<AtomicU8>,
    pending_bytes: Arc<AtomicUsize>,
}

impl RpcClient {
    /// Create a client; the connection is established on first use.
    pub fn new(addr: impl Into<String>, retry_config: RetryConfig) -> Self {
        Self {
            addr: addr.into(),
            retry_config,
            stream: Arc::new(Mutex::new(None)),
            connection_state: Arc::new(AtomicU8::new(ConnectionState::Connected as u8)),
            pending_bytes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection_state.load(Ordering::Relaxed))
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes.load(Ordering::Relaxed)
    }

    /// One unary call without retries. The connection is (re)established as
    /// needed and dropped on any I/O failure.
    pub async fn call_once<Req, Resp>(&self, method: u8, request: &Req) -> TidalResult<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| TidalError::rpc_error(format!("connect {}: {e}", self.addr)))?;
            stream
                .set_nodelay(true)
                .map_err(|e| TidalError::io_error(format!("set_nodelay: {e}")))?;
            *guard = Some(stream);
        }
        let stream = guard.as_mut().unwrap();

        let result = async {
            frame::write_request(stream, method, request).await?;
            let (_, body) = frame::read_reply(stream).await?;
            Resp::decode(body)
                .map_err(|e| TidalError::invalid(format!("reply decode for method {method}: {e}")))
        }
        .await;

        if let Err(err) = &result {
            // Connection-level failures poison the stream; application-level
            // statuses leave it usable.
            if matches!(
                err.code,
                tidal_common::status::StatusCode::IOError
                    | tidal_common::status::StatusCode::RpcError
            ) {
                *guard = None;
            }
        }
        result
    }

    /// A unary call with transient-failure retries.
    pub async fn call<Req, Resp>(&self, method: u8, request: &Req) -> TidalResult<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let size = request.encoded_len();
        self.call_with_retry(size, None, || self.call_once(method, request))
            .await
    }

    /// Run `rpc_fn` with retries on transient failures. `request_size` feeds
    /// the pending-bytes throttle (0 bypasses it); `timeout` overrides the
    /// configured unavailability budget.
    pub async fn call_with_retry<F, Fut, T>(
        &self,
        request_size: usize,
        timeout: Option<Duration>,
        rpc_fn: F,
    ) -> TidalResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = TidalResult<T>>,
    {
        let prev = self.pending_bytes.fetch_add(request_size, Ordering::Relaxed);
        if request_size > 0 && prev + request_size > self.retry_config.max_pending_bytes {
            self.pending_bytes
                .fetch_sub(request_size, Ordering::Relaxed);
            return Err(TidalError::out_of_resource(
                "max pending request bytes exceeded",
            ));
        }

        let result = self.retry_loop(timeout, &rpc_fn).await;

        self.pending_bytes
            .fetch_sub(request_size, Ordering::Relaxed);
        result
    }

    async fn retry_loop<F, Fut, T>(&self, timeout: Option<Duration>, rpc_fn: &F) -> TidalResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = TidalResult<T>>,
    {
        let budget = timeout.unwrap_or(self.retry_config.server_unavailable_timeout);
        let deadline = tokio::time::Instant::now() + budget;
        let mut delay = self.retry_config.initial_delay;
        let mut attempts = 0u32;

        loop {
            let result = rpc_fn().await;

            match &result {
                Ok(_) => {
                    self.connection_state
                        .store(ConnectionState::Connected as u8, Ordering::Relaxed);
                    return result;
                }
                Err(err) => {
                    if !err.is_transient() {
                        return result;
                    }

                    attempts += 1;
                    if attempts > self.retry_config.max_retries {
                        self.connection_state
                            .store(ConnectionState::Disconnected as u8, Ordering::Relaxed);
                        return result;
                    }

                    if tokio::time::Instant::now() + delay > deadline {
                        self.connection_state
                            .store(ConnectionState::Disconnected as u8, Ordering::Relaxed);
                        return Err(TidalError::timed_out(format!(
                            "peer {} unavailable after {budget:?}",
                            self.addr
                        )));
                    }

                    self.connection_state
                        .store(ConnectionState::Reconnecting as u8, Ordering::Relaxed);

                    tracing::debug!(
                        attempts,
                        code = %err.code,
                        delay_ms = delay.as_millis() as u64,
                        addr = %self.addr,
                        "retrying RPC"
                    );

                    tokio::time::sleep(delay).await;

                    delay = std::cmp::min(
                        Duration::from_secs_f64(delay.as_secs_f64() * self.retry_config.multiplier),
                        self.retry_config.max_delay,
                    );
                }
            }
        }
    }
}
