//!
//! A library for controlling your H806SB LED strip controllers.
//!
//! There are a few levels you can use:
//!
//!  * `h806sb_core` is used to speak the low-level protocol.  You will have to manually
//!  send/receive packets to/from the network.
//!  * `Discovery` broadcasts a probe and returns the first device that answers.
//!  * `LedController` owns a socket for one device, sends it commands and checks that it's
//!  still reachable.
//!  * `Light` keeps track of a device's power/brightness/availability state on top of a
//!  `LedController`.
//!
//! Everything here runs on Tokio.  Network trouble never turns into an error: sending returns
//! `false`, liveness checks return `false` and discovery returns `None`.  Only failing to bind a
//! socket at all, or a malformed serial number, is reported as an [Error].

use std::io;

use thiserror::Error;

mod controller;
pub use controller::{ControllerOptions, LedController, DEFAULT_TIMEOUT};

mod discovery;
pub use discovery::{DiscoveredDevice, Discovery, DISCOVERY_TIMEOUT};

mod light;
pub use light::{scale_brightness, Light, DEFAULT_SPEED, POLL_INTERVAL};

mod socket;

pub use h806sb_core::{compare_ips, SerialNumber, DEVICE_PORT, LISTEN_PORT};

#[derive(Error, Debug)]
pub enum Error {
    /// No local UDP port could be bound, not even an ephemeral one.
    #[error("could not bind a UDP socket: {0}")]
    Bind(#[source] io::Error),

    /// Malformed input, such as a serial number that isn't hex.
    #[error(transparent)]
    Protocol(#[from] h806sb_core::Error),

    /// The last liveness check failed, so no command was sent.
    #[error("device is not available")]
    Unavailable,

    #[error("failed to send command to device")]
    SendFailed,
}
