use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use log::{debug, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;

/// Binds a non-blocking IPv4 UDP socket on all interfaces with `SO_REUSEADDR` set.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn bind_udp(port: u16, broadcast: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if broadcast {
        socket.set_broadcast(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))?;

    UdpSocket::from_std(socket.into())
}

/// Like [bind_udp], but falls back to an ephemeral port if `port` is taken.
///
/// Only an error from the fallback bind is returned.
pub(crate) fn bind_with_fallback(port: u16) -> io::Result<UdpSocket> {
    match bind_udp(port, false) {
        Ok(sock) => {
            debug!("Socket bound to port {}", port);
            Ok(sock)
        }
        Err(e) if port != 0 => {
            warn!("Could not bind to port {}: {}, using random port", port, e);
            let sock = bind_udp(0, false)?;
            if let Ok(addr) = sock.local_addr() {
                debug!("Socket bound to random port {}", addr.port());
            }
            Ok(sock)
        }
        Err(e) => Err(e),
    }
}
