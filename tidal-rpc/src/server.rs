// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! RPC server: a TCP accept loop dispatching frames to a handler.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use tidal_common::status::{TidalError, TidalResult};

use crate::frame;

/// Implemented by every service exposed over the framed transport. The
/// handler decodes the body for the given method and returns the encoded
/// reply body.
#[async_trait::async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    async fn handle(&self, method: u8, body: Bytes) -> TidalResult<Vec<u8>>;
}

/// A running RPC server.
pub struct RpcServer {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    /// Bind `addr` (port 0 picks a free port) and serve `handler` until the
    /// server is dropped.
    pub async fn bind(addr: &str, handler: Arc<dyn ServiceHandler>) -> TidalResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TidalError::io_error(format!("bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TidalError::io_error(format!("local_addr: {e}")))?;

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(err) = serve_connection(stream, handler).await {
                                tracing::debug!(%peer, error = %err, "connection closed");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// One request at a time per connection: frames are replied to in arrival
/// order, so a client can pipeline without reordering logic.
async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn ServiceHandler>,
) -> TidalResult<()> {
    stream
        .set_nodelay(true)
        .map_err(|e| TidalError::io_error(format!("set_nodelay: {e}")))?;
    loop {
        let (method, body) = match frame::read_request(&mut stream).await? {
            Some(req) => req,
            None => return Ok(()),
        };
        let result = handler.handle(method, body).await;
        if let Err(err) = &result {
            tracing::debug!(method, error = %err, "handler returned error status");
        }
        frame::write_reply(&mut stream, method, &result).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{RetryConfig, RpcClient};
    use prost::Message;
    use tidal_proto::common::Address;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl ServiceHandler for EchoHandler {
        async fn handle(&self, method: u8, body: Bytes) -> TidalResult<Vec<u8>> {
            match method {
                1 => {
                    let addr = Address::decode(body)
                        .map_err(|e| TidalError::invalid(format!("decode: {e}")))?;
                    Ok(addr.encode_to_vec())
                }
                2 => Err(TidalError::not_found("no such thing")),
                _ => Err(TidalError::not_implemented(format!("method {method}"))),
            }
        }
    }

    #[tokio::test]
    async fn test_unary_echo() {
        let server = RpcServer::bind("127.0.0.1:0", Arc::new(EchoHandler))
            .await
            .unwrap();
        let client = RpcClient::new(server.local_addr().to_string(), RetryConfig::default());

        let addr = Address {
            node_id: vec![9; 28],
            ip_address: "10.0.0.1".to_string(),
            port: 80,
            worker_id: vec![8; 28],
        };
        let reply: Address = client.call(1, &addr).await.unwrap();
        assert_eq!(reply, addr);
    }

    #[tokio::test]
    async fn test_error_status_propagates() {
        let server = RpcServer::bind("127.0.0.1:0", Arc::new(EchoHandler))
            .await
            .unwrap();
        let client = RpcClient::new(server.local_addr().to_string(), RetryConfig::default());

        let err = client
            .call::<Address, Address>(2, &Address::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message, "no such thing");
    }

    #[tokio::test]
    async fn test_sequential_calls_on_one_connection() {
        let server = RpcServer::bind("127.0.0.1:0", Arc::new(EchoHandler))
            .await
            .unwrap();
        let client = RpcClient::new(server.local_addr().to_string(), RetryConfig::default());

        for port in 0..20 {
            let addr = Address {
                port,
                ..Default::default()
            };
            let reply: Address = client.call(1, &addr).await.unwrap();
            assert_eq!(reply.port, port);
        }
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_implemented() {
        let server = RpcServer::bind("127.0.0.1:0", Arc::new(EchoHandler))
            .await
            .unwrap();
        let client = RpcClient::new(server.local_addr().to_string(), RetryConfig::default());
        let err = client
            .call::<Address, Address>(99, &Address::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.code,
            tidal_common::status::StatusCode::NotImplemented
        );
    }
}
