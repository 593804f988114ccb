use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use h806sb::{DiscoveredDevice, LedController, Light, DEFAULT_SPEED, DEFAULT_TIMEOUT, POLL_INTERVAL};
use serde::{Deserialize, Serialize};

fn default_name() -> String {
    "H806SB".to_owned()
}

fn default_poll_interval() -> u64 {
    POLL_INTERVAL.as_secs()
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT.as_secs_f64()
}

fn default_speed() -> i32 {
    DEFAULT_SPEED
}

/// Converts a number of seconds into a timeout.  Must be positive and fit in a [Duration].
pub fn parse_timeout(secs: f64) -> anyhow::Result<Duration> {
    if secs.is_nan() || secs <= 0.0 {
        anyhow::bail!("timeout must be a positive number of seconds, got {}", secs);
    }
    Duration::try_from_secs_f64(secs).with_context(|| format!("timeout {} is too large", secs))
}

/// One configured device, as stored in a JSON file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default = "default_name")]
    pub name: String,
    /// Seconds between two liveness checks in `monitor`
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Seconds to wait for a liveness reply
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_speed")]
    pub speed: i32,
}

impl DeviceConfig {
    pub fn new(host: String, serial_number: Option<String>, name: Option<String>) -> DeviceConfig {
        DeviceConfig {
            host,
            serial_number,
            name: name.unwrap_or_else(default_name),
            poll_interval: default_poll_interval(),
            timeout: default_timeout(),
            speed: default_speed(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<DeviceConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        DeviceConfig::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<DeviceConfig> {
        let cfg: DeviceConfig = serde_json::from_str(content)?;
        if cfg.poll_interval == 0 {
            anyhow::bail!("poll_interval must be at least 1 second");
        }
        parse_timeout(cfg.timeout)?;
        Ok(cfg)
    }

    /// The entry a user would save after discovering `device`.
    pub fn from_discovered(device: &DiscoveredDevice) -> DeviceConfig {
        DeviceConfig::new(
            device.ip.to_string(),
            Some(device.serial_hex()),
            Some(device.name.clone()),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// The liveness timeout.  Falls back to the default if `timeout` was changed to something
    /// [parse_timeout] rejects after the config was parsed.
    pub fn timeout(&self) -> Duration {
        parse_timeout(self.timeout).unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Builds a light for this device.  Fails if the serial number is malformed.
    pub fn light(&self) -> anyhow::Result<Light> {
        let mut controller = LedController::new(self.host.clone());
        if let Some(ref serial) = self.serial_number {
            controller
                .set_serial_number(serial)
                .with_context(|| format!("Bad serial number for {}", self.host))?;
        }
        Ok(Light::new(controller, self.name.clone()).with_speed(self.speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_parse_minimal() {
        let cfg = DeviceConfig::parse(r#"{"host": "192.168.1.5"}"#).unwrap();
        assert_eq!(cfg.host, "192.168.1.5");
        assert_eq!(cfg.serial_number, None);
        assert_eq!(cfg.name, "H806SB");
        assert_eq!(cfg.poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.timeout(), Duration::from_secs(2));
        assert_eq!(cfg.speed, 20);
    }

    #[test]
    fn test_parse_full() {
        let cfg = DeviceConfig::parse(
            r#"{"host": "strip.lan", "serial_number": "0c3951", "name": "Kitchen",
                "poll_interval": 30, "timeout": 0.5, "speed": 80}"#,
        )
        .unwrap();
        assert_eq!(cfg.serial_number.as_deref(), Some("0c3951"));
        assert_eq!(cfg.timeout(), Duration::from_millis(500));

        let light = cfg.light().unwrap();
        assert_eq!(light.name, "Kitchen");
        assert_eq!(
            light.controller().serial_number().0,
            [0x51, 0x39, 0x0c, 0x00]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(DeviceConfig::parse(r#"{"name": "no host"}"#).is_err());
        assert!(DeviceConfig::parse(r#"{"host": "h", "poll_interval": 0}"#).is_err());
        assert!(DeviceConfig::parse(r#"{"host": "h", "timeout": -1}"#).is_err());
        assert!(DeviceConfig::parse(r#"{"host": "h", "timeout": 0}"#).is_err());
        assert!(DeviceConfig::parse(r#"{"host": "h", "timeout": 1e30}"#).is_err());

        let cfg = DeviceConfig::parse(r#"{"host": "h", "serial_number": "xyz"}"#).unwrap();
        assert!(cfg.light().is_err());
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(0.25).unwrap(), Duration::from_millis(250));
        assert!(parse_timeout(1e30).is_err());
        assert!(parse_timeout(f64::INFINITY).is_err());
        assert!(parse_timeout(f64::NAN).is_err());
        assert!(parse_timeout(-0.5).is_err());

        // a bad value set after parsing doesn't panic
        let mut cfg = DeviceConfig::new("h".to_owned(), None, None);
        cfg.timeout = 1e30;
        assert_eq!(cfg.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_from_discovered() {
        let device = DiscoveredDevice {
            ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)),
            serial: vec![0x0c, 0x39, 0x51],
            name: "Strip_0c3951".to_owned(),
        };
        let cfg = DeviceConfig::from_discovered(&device);
        assert_eq!(cfg.host, "192.168.1.5");
        assert_eq!(cfg.serial_number.as_deref(), Some("0c3951"));
        assert_eq!(cfg.name, "Strip_0c3951");

        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(DeviceConfig::parse(&json).unwrap(), cfg);
    }
}
