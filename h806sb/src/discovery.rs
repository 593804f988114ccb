use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use h806sb_core::{
    encode_hex, DiscoveryResponse, SerialNumber, DEVICE_PORT, DISCOVERY_PROBE, LISTEN_PORT,
};
use log::{debug, error, warn};
use tokio::net::UdpSocket;
use tokio::time::sleep;

use crate::socket::bind_udp;
use crate::Error;

/// How long [Discovery::discover_device] listens by default.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between two receive attempts while nothing is waiting on the socket.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A device that answered a discovery probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Address the response came from
    pub ip: IpAddr,
    /// Serial as advertised in the name (big-endian, not padded)
    pub serial: Vec<u8>,
    /// Full advertised name, e.g. `Strip_0c3951`
    pub name: String,
}

impl DiscoveredDevice {
    /// The serial as a hex string, suitable for [crate::LedController::set_serial_number].
    pub fn serial_hex(&self) -> String {
        encode_hex(&self.serial)
    }

    /// The serial in wire form.  Fails if the advertised serial is longer than 4 bytes.
    pub fn serial_number(&self) -> Result<SerialNumber, Error> {
        Ok(SerialNumber::from_display_bytes(&self.serial)?)
    }
}

/// One-shot local network scan.
///
/// The socket is bound when the `Discovery` is created, and released by [Discovery::close] (or
/// when it's dropped).  Each `Discovery` is meant for a single [Discovery::discover_device] call.
#[derive(Debug)]
pub struct Discovery {
    sock: Option<UdpSocket>,
    target: SocketAddr,
}

impl Discovery {
    /// Binds the discovery socket to port 4882, with broadcast enabled.
    ///
    /// There is no fallback port: if 4882 can't be bound, this fails.  Must be called from within
    /// a Tokio runtime.
    pub fn new() -> Result<Discovery, Error> {
        Discovery::bind(LISTEN_PORT)
    }

    /// Like [Discovery::new], listening on `port` instead.
    pub fn bind(port: u16) -> Result<Discovery, Error> {
        let sock = bind_udp(port, true).map_err(Error::Bind)?;
        if let Ok(addr) = sock.local_addr() {
            debug!("Discovery socket created on port: {}", addr.port());
        }
        Ok(Discovery {
            sock: Some(sock),
            target: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DEVICE_PORT),
        })
    }

    /// Sends the probe to `target` instead of `255.255.255.255:4626`.
    ///
    /// Useful for subnet-directed broadcasts, or to probe a single known address.
    pub fn with_target(mut self, target: SocketAddr) -> Discovery {
        self.target = target;
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.sock.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Broadcasts one probe and returns the first well-formed answer received within `timeout`.
    ///
    /// The probe is not resent.  Responses whose serial is not valid hex are logged and skipped,
    /// so that a different device still has a chance to answer.  Returns `None` on timeout and on
    /// socket errors.
    pub async fn discover_device(&mut self, timeout: Duration) -> Option<DiscoveredDevice> {
        let sock = match self.sock {
            Some(ref sock) => sock,
            None => {
                warn!("Discovery socket is closed");
                return None;
            }
        };

        if let Err(e) = sock.send_to(&DISCOVERY_PROBE, self.target).await {
            error!("Discovery failed: {}", e);
            return None;
        }
        debug!("Discovery packet sent to {}", self.target);

        let mut buf = [0; 128];
        let start = Instant::now();
        while start.elapsed() < timeout {
            match sock.try_recv_from(&mut buf) {
                Ok((nbytes, src)) => {
                    let data = &buf[..nbytes];
                    debug!("Received response from {}: {}", src, encode_hex(data));

                    match DiscoveryResponse::unpack(data) {
                        Ok(resp) => {
                            return Some(DiscoveredDevice {
                                ip: src.ip(),
                                serial: resp.serial,
                                name: resp.name,
                            })
                        }
                        Err(h806sb_core::Error::InvalidHex(hex_part)) => {
                            warn!("Invalid serial format: {}", hex_part);
                        }
                        Err(e) => {
                            debug!("Ignoring datagram from {}: {}", src, e);
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    sleep(POLL_INTERVAL).await;
                }
                Err(e) => {
                    error!("Socket error: {}", e);
                    break;
                }
            }
        }

        None
    }

    /// Releases the socket.  Safe to call more than once.
    pub fn close(&mut self) {
        if self.sock.take().is_some() {
            debug!("Closing socket for discovery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A discovery socket on an ephemeral port, probing a fake device on loopback.
    async fn fake_device() -> (UdpSocket, Discovery) {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let discovery = Discovery::bind(0)
            .unwrap()
            .with_target(device.local_addr().unwrap());
        (device, discovery)
    }

    fn response(name: &[u8]) -> Vec<u8> {
        let mut v = vec![0xAB, 0x02];
        v.extend_from_slice(name);
        v
    }

    #[tokio::test]
    async fn test_discover_device() {
        let (device, mut discovery) = fake_device().await;

        let responder = tokio::spawn(async move {
            let mut buf = [0; 64];
            let (n, src) = device.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], &DISCOVERY_PROBE[..]);
            device
                .send_to(&response(b"Strip_0c3951\0"), src)
                .await
                .unwrap();
        });

        let found = discovery.discover_device(DISCOVERY_TIMEOUT).await.unwrap();
        assert_eq!(found.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(found.serial, vec![0x0c, 0x39, 0x51]);
        assert_eq!(found.name, "Strip_0c3951");
        assert_eq!(found.serial_hex(), "0c3951");
        assert_eq!(found.serial_number().unwrap().0, [0x51, 0x39, 0x0c, 0x00]);

        responder.await.unwrap();
        discovery.close();
    }

    #[tokio::test]
    async fn test_malformed_responses_are_skipped() {
        let (device, mut discovery) = fake_device().await;

        let responder = tokio::spawn(async move {
            let mut buf = [0; 64];
            let (_, src) = device.recv_from(&mut buf).await.unwrap();
            device.send_to(&[0xFB, 0xC1, 0x00], src).await.unwrap();
            device.send_to(&response(b"NoSerial"), src).await.unwrap();
            device.send_to(&response(b"Strip_zz"), src).await.unwrap();
            device.send_to(&response(b"Good_0a0b"), src).await.unwrap();
        });

        let found = discovery.discover_device(DISCOVERY_TIMEOUT).await.unwrap();
        assert_eq!(found.name, "Good_0a0b");
        assert_eq!(found.serial, vec![0x0a, 0x0b]);

        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_device_found() {
        let (_device, mut discovery) = fake_device().await;

        let start = Instant::now();
        assert!(discovery
            .discover_device(Duration::from_millis(300))
            .await
            .is_none());
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_close() {
        let (_device, mut discovery) = fake_device().await;
        assert!(discovery.local_addr().is_some());

        discovery.close();
        discovery.close();
        assert!(discovery.local_addr().is_none());
        assert!(discovery.discover_device(DISCOVERY_TIMEOUT).await.is_none());
    }

    #[tokio::test]
    async fn test_first_responder_wins() {
        let (device, mut discovery) = fake_device().await;
        let other = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0; 64];
            let (_, src) = device.recv_from(&mut buf).await.unwrap();
            device.send_to(&response(b"First_01"), src).await.unwrap();
            other.send_to(&response(b"Second_02"), src).await.unwrap();
        });

        let found = discovery.discover_device(DISCOVERY_TIMEOUT).await.unwrap();
        assert_eq!(found.name, "First_01");

        responder.await.unwrap();
    }
}
