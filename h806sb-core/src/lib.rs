//! This crate provides low-level packet types for talking to H806SB LED strip controllers.
//!
//! The controller listens for UDP datagrams on port 4626 of your local area network.  It speaks
//! three small request/reply exchanges, all of them fixed-layout:
//!
//! * a [ControlPacket] sets power, brightness and playback speed,
//! * a [LIVENESS_PROBE] asks the device if it's alive, and any reply starting with
//!   [RESPONSE_HEADER] counts as a yes (see [is_liveness_response]),
//! * a [DISCOVERY_PROBE] broadcast makes every controller on the subnet announce its name,
//!   which is parsed by [DiscoveryResponse::unpack].
//!
//! Since this is a low-level library, it does not deal with issues like talking to the network,
//! or waiting for replies.  This is done by the `h806sb` crate.
//!
//! # Serial numbers
//!
//! Devices are addressed by a 4 byte serial number.  Humans (and the device's own name) write it
//! as a big-endian hex string such as `0c3951`, but on the wire it is left-padded to 4 bytes and
//! sent in little-endian order: `51 39 0c 00`.  [SerialNumber] always holds the wire form.

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr};
use std::{fmt, io};
use thiserror::Error;

/// UDP port the controller listens on, for control, liveness and discovery alike.
pub const DEVICE_PORT: u16 = 4626;

/// Local port clients prefer to receive replies on.
pub const LISTEN_PORT: u16 = 4882;

/// First two bytes of every [ControlPacket].
pub const CONTROL_HEADER: [u8; 2] = [0xFB, 0xC1];

/// First two bytes of every reply sent by a device (liveness and discovery).
pub const RESPONSE_HEADER: [u8; 2] = [0xAB, 0x02];

/// Sent to a single device to check that it is reachable.
pub const LIVENESS_PROBE: [u8; 12] = [
    0xAB, 0x01, 0x00, 0x02, // header
    0x00, 0x00, 0x00, 0x00, // reserved
    0x00, 0x00, 0x00, 0x00, // serial, unused by the device
];

/// Broadcast to find devices.
pub const DISCOVERY_PROBE: [u8; 2] = [0xAB, 0x01];

/// Brightness range accepted by the device.
pub const MAX_BRIGHTNESS: u8 = 31;

/// Playback speed range accepted by the device.
pub const MIN_SPEED: u8 = 1;
pub const MAX_SPEED: u8 = 100;

/// Various packet encoding/decoding errors
#[derive(Error, Debug)]
pub enum Error {
    /// A serial number (or the serial part of a device name) is not a valid hex string.
    #[error("invalid hex string {0:?}")]
    InvalidHex(String),

    /// A serial number decoded to more than 4 bytes.
    #[error("serial number is {0} bytes long, at most 4 are allowed")]
    SerialTooLong(usize),

    /// The datagram doesn't start with the header we were expecting.
    #[error("unexpected packet header {0:02x?}")]
    UnexpectedHeader(Vec<u8>),

    /// One of the packet fields contains an invalid or unsupported value.
    ///
    /// The inner string is a description of the error.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Decodes a hex string into bytes.
///
/// Whitespace is allowed between byte pairs only, so `0c3951` and `0c 39 51` are accepted but
/// `0 c3951` is not.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, Error> {
    let mut bytes = Vec::with_capacity(s.len() / 2);
    for token in s.split_ascii_whitespace() {
        let decoded = hex::decode(token).map_err(|_| Error::InvalidHex(s.to_owned()))?;
        bytes.extend_from_slice(&decoded);
    }
    Ok(bytes)
}

/// Formats bytes as a lowercase hex string, the inverse of [decode_hex].
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// A device serial number, in wire (little-endian) form.
///
/// The all-zero serial is the default, used before a device has been identified.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct SerialNumber(pub [u8; 4]);

impl SerialNumber {
    /// Parses a human-readable hex serial, such as the one in a device name.
    ///
    /// ```
    /// # use h806sb_core::SerialNumber;
    /// let serial = SerialNumber::from_hex("0c3951").unwrap();
    /// assert_eq!(serial.0, [0x51, 0x39, 0x0c, 0x00]);
    /// ```
    pub fn from_hex(s: &str) -> Result<SerialNumber, Error> {
        SerialNumber::from_display_bytes(&decode_hex(s)?)
    }

    /// Builds a serial from its big-endian display bytes, left-padding them to 4 bytes.
    pub fn from_display_bytes(bytes: &[u8]) -> Result<SerialNumber, Error> {
        if bytes.len() > 4 {
            return Err(Error::SerialTooLong(bytes.len()));
        }
        let mut padded = [0; 4];
        padded[4 - bytes.len()..].copy_from_slice(bytes);

        let mut wire = [0; 4];
        LittleEndian::write_u32(&mut wire, BigEndian::read_u32(&padded));
        Ok(SerialNumber(wire))
    }

    /// The big-endian display bytes (always 4 of them, padding included).
    pub fn display_bytes(&self) -> [u8; 4] {
        let mut display = [0; 4];
        BigEndian::write_u32(&mut display, LittleEndian::read_u32(&self.0));
        display
    }

    pub fn is_unset(&self) -> bool {
        self.0 == [0; 4]
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", encode_hex(&self.display_bytes()))
    }
}

/// Sets the power, brightness and playback speed of one device.
///
/// Fields always hold in-range values: construct with [ControlPacket::new], which clamps.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct ControlPacket {
    /// Wrap around command counter.  The device ignores repeated values, so each command should
    /// carry the next one.
    pub counter: u8,
    /// 1 to 100
    pub speed: u8,
    /// 0 to 31
    pub brightness: u8,
    pub on: bool,
    pub serial: SerialNumber,
}

impl ControlPacket {
    /// Builds a packet, clamping `speed` to 1..=100 and `brightness` to 0..=31.
    pub fn new(
        counter: u8,
        speed: i32,
        brightness: i32,
        on: bool,
        serial: SerialNumber,
    ) -> ControlPacket {
        ControlPacket {
            counter,
            speed: speed.clamp(MIN_SPEED as i32, MAX_SPEED as i32) as u8,
            brightness: brightness.clamp(0, MAX_BRIGHTNESS as i32) as u8,
            on,
            serial,
        }
    }

    /// packed size, in bytes
    pub fn packed_size() -> usize {
        17
    }

    /// Validates that this object was constructed correctly.  Panics if not.
    pub fn validate(&self) {
        assert!(self.speed >= MIN_SPEED && self.speed <= MAX_SPEED);
        assert!(self.brightness <= MAX_BRIGHTNESS);
    }

    /// Packs this packet into some bytes that can be sent over the network.
    pub fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(Self::packed_size());
        v.extend_from_slice(&CONTROL_HEADER);
        v.write_u8(self.counter)?;
        v.write_u8(self.speed)?;
        v.write_u8(self.brightness)?;
        v.write_u8(if self.on { 1 } else { 0 })?;
        // reserved, always 00 AE
        v.write_u8(0x00)?;
        v.write_u8(0xAE)?;
        v.write_u32::<LittleEndian>(0)?;
        v.extend_from_slice(&self.serial.0);
        // trailing 00
        v.write_u8(0x00)?;
        Ok(v)
    }

    /// Unpacks a control packet, as a device would see it.
    ///
    /// Out of range speed or brightness values are reported as errors rather than clamped.
    pub fn unpack(v: &[u8]) -> Result<ControlPacket, Error> {
        if v.len() < 2 || v[..2] != CONTROL_HEADER {
            return Err(Error::UnexpectedHeader(v.iter().take(2).cloned().collect()));
        }
        if v.len() != Self::packed_size() {
            return Err(Error::ProtocolError(format!(
                "control packet is {} bytes long, expected {}",
                v.len(),
                Self::packed_size()
            )));
        }

        let mut c = Cursor::new(&v[2..]);
        let counter = c.read_u8()?;
        let speed = c.read_u8()?;
        let brightness = c.read_u8()?;
        let on = match c.read_u8()? {
            0 => false,
            1 => true,
            x => return Err(Error::ProtocolError(format!("Unknown power flag {}", x))),
        };
        let _reserved = c.read_u16::<BigEndian>()?;
        let _zero = c.read_u32::<LittleEndian>()?;
        let mut serial = [0; 4];
        for slot in &mut serial {
            *slot = c.read_u8()?;
        }
        let _trailer = c.read_u8()?;

        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(Error::ProtocolError(format!("Speed {} out of range", speed)));
        }
        if brightness > MAX_BRIGHTNESS {
            return Err(Error::ProtocolError(format!(
                "Brightness {} out of range",
                brightness
            )));
        }

        Ok(ControlPacket {
            counter,
            speed,
            brightness,
            on,
            serial: SerialNumber(serial),
        })
    }
}

/// Any datagram starting with [RESPONSE_HEADER] means the device is alive.  The rest of the
/// payload is ignored.
pub fn is_liveness_response(v: &[u8]) -> bool {
    v.starts_with(&RESPONSE_HEADER)
}

/// A device's answer to a [DISCOVERY_PROBE].
///
/// The payload is the device name as NUL-terminated (or datagram-terminated) ASCII, in the form
/// `<label>_<hex serial>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    /// The full advertised name, e.g. `Strip_0c3951`
    pub name: String,
    /// The serial, exactly as written in the name (big-endian, unpadded)
    pub serial: Vec<u8>,
}

impl DiscoveryResponse {
    pub fn unpack(v: &[u8]) -> Result<DiscoveryResponse, Error> {
        if !v.starts_with(&RESPONSE_HEADER) {
            return Err(Error::UnexpectedHeader(v.iter().take(2).cloned().collect()));
        }

        // Non-ASCII bytes are dropped
        let name: String = v[2..]
            .iter()
            .take_while(|&&b| b != 0)
            .filter(|b| b.is_ascii())
            .map(|&b| b as char)
            .collect();

        let hex_part = match name.split_once('_') {
            Some((_label, hex_part)) => hex_part,
            None => {
                return Err(Error::ProtocolError(format!(
                    "device name {:?} has no serial suffix",
                    name
                )))
            }
        };
        let serial = decode_hex(hex_part)?;

        Ok(DiscoveryResponse { name, serial })
    }

    /// The label part of the name, before the first `_`
    pub fn label(&self) -> &str {
        self.name.split('_').next().unwrap_or("")
    }

    /// The serial in wire form, if it fits in 4 bytes.
    pub fn serial_number(&self) -> Result<SerialNumber, Error> {
        SerialNumber::from_display_bytes(&self.serial)
    }

    /// Packs a response, as a device would send it.
    pub fn pack(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.name.len() + 3);
        v.extend_from_slice(&RESPONSE_HEADER);
        v.extend_from_slice(self.name.as_bytes());
        v.push(0);
        v
    }
}

/// Parses an IP address, also accepting dotted-quad IPv4 with leading zeros (`192.168.001.005`).
fn parse_ip(s: &str) -> Option<IpAddr> {
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Some(ip);
    }

    let octets: Vec<&str> = s.split('.').collect();
    if octets.len() != 4 {
        return None;
    }
    let mut v = [0u8; 4];
    for (slot, octet) in v.iter_mut().zip(octets) {
        if octet.is_empty() || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = octet.parse().ok()?;
    }
    Some(IpAddr::V4(Ipv4Addr::from(v)))
}

/// Compares two host strings.
///
/// If both parse as IP addresses they're compared by value, so differently written forms of the
/// same address are equal.  Otherwise (e.g. hostnames) the strings must match exactly.
pub fn compare_ips(a: &str, b: &str) -> bool {
    match (parse_ip(a), parse_ip(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}
