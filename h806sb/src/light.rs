use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, error};

use crate::controller::{LedController, DEFAULT_TIMEOUT};
use crate::Error;

/// Playback speed used for every command sent by a [Light].
pub const DEFAULT_SPEED: i32 = 20;

/// How often a host application should call [Light::refresh].
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Maps an 8-bit brightness (0-255) onto the device's 0-31 scale, rounding down.
pub fn scale_brightness(brightness: u8) -> i32 {
    brightness as i32 * 31 / 255
}

/// Represents the state of an LED strip.
///
/// Note that the data stored in this struct is not "live".  `available` reflects the last
/// [Light::refresh], and `is_on`/`brightness` reflect the last command that was sent
/// successfully: the device never reports its own state.
#[derive(Debug)]
pub struct Light {
    controller: LedController,
    pub name: String,
    available: bool,
    is_on: bool,
    /// 0-255
    brightness: u8,
    speed: i32,
    last_seen: Option<DateTime<Local>>,
}

impl Light {
    pub fn new(controller: LedController, name: impl Into<String>) -> Light {
        Light {
            controller,
            name: name.into(),
            available: false,
            is_on: false,
            brightness: 255,
            speed: DEFAULT_SPEED,
            last_seen: None,
        }
    }

    /// Overrides the playback speed sent with every command (clamped to 1-100 on the wire).
    pub fn with_speed(mut self, speed: i32) -> Light {
        self.speed = speed;
        self
    }

    pub fn unique_id(&self) -> String {
        format!("h806sb_{}", self.controller.host())
    }

    pub fn controller(&self) -> &LedController {
        &self.controller
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// When the device last answered a liveness check.
    pub fn last_seen(&self) -> Option<DateTime<Local>> {
        self.last_seen
    }

    /// Checks whether the device is reachable, waiting up to `wait` for it to answer.
    ///
    /// Returns the new availability.
    pub async fn refresh_with_timeout(&mut self, wait: Duration) -> bool {
        self.available = self.controller.check_availability(wait).await;
        debug!("{} available: {}", self.name, self.available);
        if self.available {
            self.last_seen = Some(Local::now());
        }
        self.available
    }

    pub async fn refresh(&mut self) -> bool {
        self.refresh_with_timeout(DEFAULT_TIMEOUT).await
    }

    /// Turns the strip on.  Keeps the previous brightness if `brightness` is `None`.
    pub async fn turn_on(&mut self, brightness: Option<u8>) -> Result<(), Error> {
        if !self.available {
            return Err(Error::Unavailable);
        }

        let brightness = brightness.unwrap_or(self.brightness);
        if !self
            .controller
            .send_packet(scale_brightness(brightness), self.speed, true)
            .await
        {
            error!("Error turning on {}", self.name);
            return Err(Error::SendFailed);
        }

        self.is_on = true;
        self.brightness = brightness;
        Ok(())
    }

    /// Turns the strip off.
    ///
    /// The device has no usable "off" command: this sends zero brightness with playback left
    /// running.  The last brightness is kept for the next [Light::turn_on].
    pub async fn turn_off(&mut self) -> Result<(), Error> {
        if !self.available {
            return Err(Error::Unavailable);
        }

        if !self.controller.send_packet(0, self.speed, true).await {
            error!("Error turning off {}", self.name);
            return Err(Error::SendFailed);
        }

        self.is_on = false;
        Ok(())
    }

    pub fn close(&mut self) {
        self.controller.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControllerOptions;
    use h806sb_core::{ControlPacket, LIVENESS_PROBE};
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    async fn fake_device() -> (UdpSocket, Light) {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = device.local_addr().unwrap().port();
        let mut ctrl = LedController::with_options(
            "127.0.0.1",
            ControllerOptions {
                port,
                liveness_port: port,
                local_port: 0,
            },
        );
        ctrl.set_serial_number("0c3951").unwrap();
        (device, Light::new(ctrl, "Strip"))
    }

    /// Answers one liveness probe.
    async fn answer_probe(device: &UdpSocket) {
        let mut buf = [0; 64];
        let (n, src) = device.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &LIVENESS_PROBE[..]);
        device.send_to(&[0xAB, 0x02], src).await.unwrap();
    }

    async fn recv_control(device: &UdpSocket) -> ControlPacket {
        let mut buf = [0; 64];
        let (n, _) = timeout(Duration::from_secs(2), device.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        ControlPacket::unpack(&buf[..n]).unwrap()
    }

    #[test]
    fn test_scale_brightness() {
        assert_eq!(scale_brightness(0), 0);
        assert_eq!(scale_brightness(8), 0);
        assert_eq!(scale_brightness(9), 1);
        assert_eq!(scale_brightness(128), 15);
        assert_eq!(scale_brightness(255), 31);
    }

    #[tokio::test]
    async fn test_unavailable_light_rejects_commands() {
        let (device, mut light) = fake_device().await;
        assert!(!light.available());

        assert!(matches!(light.turn_on(None).await, Err(Error::Unavailable)));
        assert!(matches!(light.turn_off().await, Err(Error::Unavailable)));

        // nothing was sent
        let mut buf = [0; 64];
        assert!(device.try_recv_from(&mut buf).is_err());
        assert_eq!(light.controller().counter(), 0);
    }

    #[tokio::test]
    async fn test_turn_on_and_off() {
        let (device, light) = fake_device().await;
        let mut light = light.with_speed(35);
        assert_eq!(light.unique_id(), "h806sb_127.0.0.1");

        let (available, ()) = tokio::join!(light.refresh(), answer_probe(&device));
        assert!(available);
        assert!(light.last_seen().is_some());

        light.turn_on(Some(128)).await.unwrap();
        let pkt = recv_control(&device).await;
        assert_eq!(pkt.counter, 1);
        assert_eq!(pkt.brightness, 15);
        assert_eq!(pkt.speed, 35);
        assert!(pkt.on);
        assert_eq!(pkt.serial.0, [0x51, 0x39, 0x0c, 0x00]);
        assert!(light.is_on());
        assert_eq!(light.brightness(), 128);

        light.turn_off().await.unwrap();
        let pkt = recv_control(&device).await;
        assert_eq!(pkt.counter, 2);
        assert_eq!(pkt.brightness, 0);
        assert!(pkt.on);
        assert!(!light.is_on());

        // previous brightness is reused
        light.turn_on(None).await.unwrap();
        let pkt = recv_control(&device).await;
        assert_eq!(pkt.brightness, 15);

        light.close();
    }

    #[tokio::test]
    async fn test_refresh_timeout_marks_unavailable() {
        let (_device, mut light) = fake_device().await;
        assert!(!light.refresh_with_timeout(Duration::from_millis(100)).await);
        assert!(!light.available());
        assert!(light.last_seen().is_none());
    }
}
