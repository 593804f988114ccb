use std::io;
use std::net::SocketAddr;
use std::num::Wrapping;
use std::time::Duration;

use h806sb_core::{
    compare_ips, encode_hex, is_liveness_response, ControlPacket, SerialNumber, DEVICE_PORT,
    LISTEN_PORT, LIVENESS_PROBE,
};
use log::{debug, error, info, warn};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

use crate::socket::bind_with_fallback;
use crate::Error;

/// How long [LedController::check_availability] waits for a reply by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Options used to construct a [LedController].
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Where control packets are sent.
    pub port: u16,
    /// Where liveness probes are sent.  This does not follow `port`.
    pub liveness_port: u16,
    /// Local port to bind.  If it's taken, an ephemeral port is used instead.
    pub local_port: u16,
}

impl std::default::Default for ControllerOptions {
    fn default() -> ControllerOptions {
        ControllerOptions {
            port: DEVICE_PORT,
            liveness_port: DEVICE_PORT,
            local_port: LISTEN_PORT,
        }
    }
}

/// Socket ownership.  Any socket-level error moves `Bound` to `Faulted`, and the next send or
/// check binds a fresh socket.  The socket is moved out while a send or check is in flight.
#[derive(Debug)]
enum SocketState {
    Uninitialized,
    Bound(UdpSocket),
    Faulted,
}

/// Talks to one device, identified by host and serial number.
///
/// Not internally synchronized: the command counter assumes a single caller at a time.
#[derive(Debug)]
pub struct LedController {
    host: String,
    options: ControllerOptions,
    /// Counter carried by the last packet that was actually sent.  Wraps around
    counter: Wrapping<u8>,
    serial: SerialNumber,
    socket: SocketState,
}

impl LedController {
    pub fn new(host: impl Into<String>) -> LedController {
        LedController::with_options(host, ControllerOptions::default())
    }

    pub fn with_options(host: impl Into<String>, options: ControllerOptions) -> LedController {
        LedController {
            host: host.into(),
            options,
            counter: Wrapping(0),
            serial: SerialNumber::default(),
            socket: SocketState::Uninitialized,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.options.port
    }

    /// The counter value carried by the last packet sent, 0 if none was sent yet.
    pub fn counter(&self) -> u8 {
        self.counter.0
    }

    pub fn serial_number(&self) -> SerialNumber {
        self.serial
    }

    /// Local address of the socket, if one is currently bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.socket {
            SocketState::Bound(ref sock) => sock.local_addr().ok(),
            _ => None,
        }
    }

    /// Whether `other` names this controller's host, see [compare_ips].
    pub fn matches_host(&self, other: &str) -> bool {
        compare_ips(&self.host, other)
    }

    /// Sets the serial number from its human-readable hex form.
    ///
    /// `"0c3951"` is padded to `00 0c 39 51` and stored reversed, as `51 39 0c 00`.  On error the
    /// previous serial is kept.
    pub fn set_serial_number(&mut self, serial: &str) -> Result<(), Error> {
        let parsed = SerialNumber::from_hex(serial).map_err(|e| {
            error!("Invalid serial number format {:?}: {}", serial, e);
            e
        })?;
        debug!("Final serial: {}", encode_hex(&parsed.0));
        self.serial = parsed;
        info!("Serial number set: {}", self.serial);
        Ok(())
    }

    /// (Re)creates the socket, dropping any previous one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(&mut self) -> Result<(), Error> {
        self.socket = SocketState::Uninitialized;
        let sock = self.bind_socket()?;
        self.socket = SocketState::Bound(sock);
        Ok(())
    }

    fn bind_socket(&mut self) -> Result<UdpSocket, Error> {
        bind_with_fallback(self.options.local_port).map_err(|e| {
            error!("Failed to bind socket: {}", e);
            self.socket = SocketState::Faulted;
            Error::Bind(e)
        })
    }

    /// Takes the bound socket out for one exchange, binding a new one if needed.  The caller
    /// puts it back with `SocketState::Bound` unless the exchange hit a socket error.
    fn take_socket(&mut self) -> Result<UdpSocket, Error> {
        match std::mem::replace(&mut self.socket, SocketState::Uninitialized) {
            SocketState::Bound(sock) => Ok(sock),
            SocketState::Uninitialized | SocketState::Faulted => self.bind_socket(),
        }
    }

    async fn resolve(&self, port: u16) -> io::Result<SocketAddr> {
        lookup_host((self.host.as_str(), port))
            .await?
            .find(|addr| addr.is_ipv4())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no IPv4 address for {}", self.host),
                )
            })
    }

    /// Sends a control packet.
    ///
    /// `speed` is clamped to 1..=100 and `brightness` to 0..=31.  Returns `true` if the datagram
    /// was handed to the network; the counter only advances in that case.
    pub async fn send_packet(&mut self, brightness: i32, speed: i32, is_on: bool) -> bool {
        let next = self.counter + Wrapping(1);
        let pkt = ControlPacket::new(next.0, speed, brightness, is_on, self.serial);
        let bytes = match pkt.pack() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Error building control packet: {}", e);
                return false;
            }
        };

        let addr = match self.resolve(self.options.port).await {
            Ok(addr) => addr,
            Err(e) => {
                error!("Error resolving {}: {}", self.host, e);
                return false;
            }
        };

        let sock = match self.take_socket() {
            Ok(sock) => sock,
            Err(e) => {
                error!("Error sending UDP packet: {}", e);
                return false;
            }
        };

        let sent = sock.send_to(&bytes, addr).await;
        match sent {
            Ok(_) => {
                self.socket = SocketState::Bound(sock);
                self.counter = next;
                debug!("Sent to {} - {}", addr, encode_hex(&bytes));
                true
            }
            Err(e) => {
                error!("Error sending UDP packet: {}", e);
                self.socket = SocketState::Faulted;
                false
            }
        }
    }

    /// Sends a liveness probe and waits up to `wait` for one reply.
    ///
    /// Returns `true` if the first datagram received starts with `AB 02`, whoever sent it.
    /// Timeouts and socket errors yield `false`; a socket error also drops the socket so the next
    /// call binds a new one.
    pub async fn check_availability(&mut self, wait: Duration) -> bool {
        let addr = match self.resolve(self.options.liveness_port).await {
            Ok(addr) => addr,
            Err(e) => {
                error!("Availability check failed, cannot resolve {}: {}", self.host, e);
                return false;
            }
        };

        let sock = match self.take_socket() {
            Ok(sock) => sock,
            Err(e) => {
                error!("Availability check failed: {}", e);
                return false;
            }
        };

        debug!(
            "Sending alive check: {} to {}",
            encode_hex(&LIVENESS_PROBE),
            addr
        );
        let sent = sock.send_to(&LIVENESS_PROBE, addr).await;
        if let Err(e) = sent {
            warn!("Socket error: {}", e);
            self.socket = SocketState::Faulted;
            return false;
        }

        let mut buf = [0; 128];
        let received = timeout(wait, sock.recv_from(&mut buf)).await;
        match received {
            Ok(Ok((nbytes, src))) => {
                self.socket = SocketState::Bound(sock);
                let data = &buf[..nbytes];
                debug!("Received from {}: {}", src, encode_hex(data));
                is_liveness_response(data)
            }
            Ok(Err(e)) => {
                warn!("Socket error: {}", e);
                self.socket = SocketState::Faulted;
                false
            }
            Err(_) => {
                self.socket = SocketState::Bound(sock);
                debug!("No response received within {:?}", wait);
                false
            }
        }
    }

    /// Releases the socket.  Safe to call more than once; a later send or check binds again.
    pub fn close(&mut self) {
        if let SocketState::Bound(_) = self.socket {
            debug!("Closing socket for {}", self.host);
        }
        self.socket = SocketState::Uninitialized;
    }
}
