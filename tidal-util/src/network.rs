// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Networking helpers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

/// Determine the local IP address by connecting a UDP socket to a public DNS
/// server and reading the chosen interface address. Falls back to loopback.
pub fn get_local_ip() -> IpAddr {
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(_) => return IpAddr::V4(Ipv4Addr::LOCALHOST),
    };
    match socket.connect("8.8.8.8:53") {
        Ok(()) => socket
            .local_addr()
            .map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

/// Find a free TCP port on the given address. Returns 0 when none is found.
pub fn get_free_port(addr: IpAddr) -> u16 {
    TcpListener::bind(SocketAddr::new(addr, 0))
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap_or(0)
}

/// Whether the given TCP port can currently be bound.
pub fn is_port_available(addr: IpAddr, port: u16) -> bool {
    TcpListener::bind(SocketAddr::new(addr, port)).is_ok()
}

/// Format an `ip:port` endpoint string.
pub fn endpoint(ip: &str, port: u16) -> String {
    format!("{ip}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_free_port() {
        let port = get_free_port(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(port > 0);
        assert!(is_port_available(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
    }

    #[test]
    fn test_endpoint_format() {
        assert_eq!(endpoint("127.0.0.1", 6379), "127.0.0.1:6379");
    }
}
