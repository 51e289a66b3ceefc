//! UDP socket setup
//!
//! Sockets are built with `socket2` so address reuse can be set before
//! binding, then handed to tokio.

use crate::error::{TransportError, TransportResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// Largest payload a single IPv4 UDP datagram can carry
pub const MAX_DATAGRAM: usize = 65_507;

/// Bind a non-blocking IPv4 UDP socket to `address:port`.
///
/// Must be called from within a tokio runtime.
pub fn bind_udp(address: &str, port: u16, reuse_addr: bool) -> TransportResult<UdpSocket> {
    let ip: Ipv4Addr = address
        .parse()
        .map_err(|_| TransportError::invalid_config(format!("invalid bind address: {address}")))?;
    let bind_addr = SocketAddrV4::new(ip, port);
    let bind_err = |source| TransportError::Bind {
        address: bind_addr.to_string(),
        source,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    if reuse_addr {
        socket.set_reuse_address(true).map_err(bind_err)?;
    }
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket
        .bind(&SocketAddr::V4(bind_addr).into())
        .map_err(bind_err)?;

    Ok(UdpSocket::from_std(socket.into())?)
}

/// Allow sending to broadcast addresses
pub fn enable_broadcast(socket: &UdpSocket) -> TransportResult<()> {
    socket.set_broadcast(true)?;
    Ok(())
}

/// Join `group` on the default interface and set the outbound TTL
pub fn join_multicast(socket: &UdpSocket, group: Ipv4Addr, ttl: u32) -> TransportResult<()> {
    socket
        .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
        .map_err(|source| TransportError::MulticastJoin {
            group: group.to_string(),
            source,
        })?;
    socket.set_multicast_ttl_v4(ttl)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_bind_ephemeral_loopback() {
        let socket = bind_udp("127.0.0.1", 0, true).unwrap();
        let local = socket.local_addr().unwrap();
        assert!(local.ip().is_loopback());
        assert_ne!(local.port(), 0);
    }

    #[tokio::test]
    async fn test_reuse_addr_allows_shared_port() {
        let first = bind_udp("127.0.0.1", 0, true).unwrap();
        let port = first.local_addr().unwrap().port();
        assert!(bind_udp("127.0.0.1", port, true).is_ok());
    }

    #[tokio::test]
    async fn test_port_conflict_without_reuse() {
        let first = bind_udp("127.0.0.1", 0, false).unwrap();
        let port = first.local_addr().unwrap().port();
        assert_matches!(
            bind_udp("127.0.0.1", port, false),
            Err(TransportError::Bind { .. })
        );
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        assert_matches!(
            bind_udp("not-an-ip", 0, true),
            Err(TransportError::InvalidConfig(_))
        );
    }

    #[tokio::test]
    async fn test_broadcast_flag() {
        let socket = bind_udp("127.0.0.1", 0, true).unwrap();
        assert!(!socket.broadcast().unwrap());
        enable_broadcast(&socket).unwrap();
        assert!(socket.broadcast().unwrap());
    }

    #[tokio::test]
    async fn test_join_non_multicast_group_fails() {
        let socket = bind_udp("0.0.0.0", 0, true).unwrap();
        let group: Ipv4Addr = "10.0.0.1".parse().unwrap();
        assert_matches!(
            join_multicast(&socket, group, 1),
            Err(TransportError::MulticastJoin { .. })
        );
    }
}
