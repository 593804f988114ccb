mod config;
mod monitor;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use h806sb::{Discovery, DISCOVERY_TIMEOUT};
use log::{info, warn};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use config::{parse_timeout, DeviceConfig};

const USAGE: &str = "\
Usage: h806sb-ctl [-v] <command>

Commands:
  discover [--timeout SECS] [--target ADDR:PORT]
  status <DEVICE>
  on <DEVICE> [BRIGHTNESS]      brightness is 0-255
  off <DEVICE>
  monitor <DEVICE>

DEVICE is either --config FILE or --host HOST [--serial HEX] [--name NAME]";

fn setup_logger(verbose: bool) {
    let level = std::env::var("H806SB_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });

    let config = ConfigBuilder::new().add_filter_allow_str("h806sb").build();
    TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto).ok();
}

/// Pops the value following a `--flag`.
fn flag_value(args: &mut Vec<String>, flag: &str) -> Result<Option<String>> {
    match args.iter().position(|a| a == flag) {
        Some(idx) => {
            if idx + 1 >= args.len() {
                bail!("{} needs a value", flag);
            }
            let value = args.remove(idx + 1);
            args.remove(idx);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn device_config(args: &mut Vec<String>) -> Result<DeviceConfig> {
    if let Some(path) = flag_value(args, "--config")? {
        return DeviceConfig::load(&PathBuf::from(path));
    }
    let host = flag_value(args, "--host")?
        .ok_or_else(|| anyhow!("either --config or --host is required\n\n{}", USAGE))?;
    let serial = flag_value(args, "--serial")?;
    let name = flag_value(args, "--name")?;
    Ok(DeviceConfig::new(host, serial, name))
}

fn ensure_no_extra_args(args: &[String]) -> Result<()> {
    if !args.is_empty() {
        bail!("unexpected arguments: {}\n\n{}", args.join(" "), USAGE);
    }
    Ok(())
}

fn discovery_timeout(args: &mut Vec<String>) -> Result<Duration> {
    match flag_value(args, "--timeout")? {
        Some(secs) => parse_timeout(
            secs.parse::<f64>()
                .with_context(|| format!("bad timeout {:?}", secs))?,
        ),
        None => Ok(DISCOVERY_TIMEOUT),
    }
}

async fn discover(mut args: Vec<String>) -> Result<()> {
    let timeout = discovery_timeout(&mut args)?;
    let target: Option<SocketAddr> = flag_value(&mut args, "--target")?
        .map(|t| t.parse::<SocketAddr>().with_context(|| format!("bad target address {:?}", t)))
        .transpose()?;
    ensure_no_extra_args(&args)?;

    let mut discovery = Discovery::new()?;
    if let Some(target) = target {
        discovery = discovery.with_target(target);
    }
    let found = discovery.discover_device(timeout).await;
    discovery.close();

    match found {
        Some(device) => {
            info!("Device found: {} (IP: {})", device.name, device.ip);
            if let Err(e) = device.serial_number() {
                warn!("{} advertises a serial this tool can't address: {}", device.name, e);
            }
            let cfg = DeviceConfig::from_discovered(&device);
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(())
        }
        None => bail!("No device found during discovery"),
    }
}

async fn status(mut args: Vec<String>) -> Result<()> {
    let cfg = device_config(&mut args)?;
    ensure_no_extra_args(&args)?;

    let mut light = cfg.light()?;
    let available = light.refresh_with_timeout(cfg.timeout()).await;
    light.close();

    if light.controller().serial_number().is_unset() {
        warn!("No serial number configured for {}", cfg.host);
    }
    println!("{} ({}) is {}", light.name, cfg.host, monitor::describe(available));
    if !available {
        std::process::exit(1);
    }
    Ok(())
}

async fn power(mut args: Vec<String>, on: bool) -> Result<()> {
    let cfg = device_config(&mut args)?;
    let brightness = if on && !args.is_empty() {
        let raw = args.remove(0);
        Some(
            raw.parse::<u8>()
                .with_context(|| format!("brightness must be 0-255, got {:?}", raw))?,
        )
    } else {
        None
    };
    ensure_no_extra_args(&args)?;

    let mut light = cfg.light()?;
    light.refresh_with_timeout(cfg.timeout()).await;
    let result = if on {
        light.turn_on(brightness).await
    } else {
        light.turn_off().await
    };
    light.close();

    result.with_context(|| format!("Error controlling {}", cfg.host))?;
    println!("{} turned {}", light.name, if on { "on" } else { "off" });
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let verbose = match args.iter().position(|a| a == "-v" || a == "--verbose") {
        Some(idx) => {
            args.remove(idx);
            true
        }
        None => false,
    };
    setup_logger(verbose);

    if args.is_empty() {
        bail!("missing command\n\n{}", USAGE);
    }
    let command = args.remove(0);

    match command.as_str() {
        "discover" => discover(args).await,
        "status" => status(args).await,
        "on" => power(args, true).await,
        "off" => power(args, false).await,
        "monitor" => {
            let cfg = device_config(&mut args)?;
            ensure_no_extra_args(&args)?;
            let light = cfg.light()?;
            monitor::run(&cfg, light).await
        }
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("unknown command {:?}\n\n{}", other, USAGE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flag_value() {
        let mut a = args(&["--host", "10.0.0.2", "200"]);
        assert_eq!(flag_value(&mut a, "--host").unwrap().as_deref(), Some("10.0.0.2"));
        assert_eq!(a, args(&["200"]));
        assert_eq!(flag_value(&mut a, "--serial").unwrap(), None);

        let mut a = args(&["--host"]);
        assert!(flag_value(&mut a, "--host").is_err());
    }

    #[test]
    fn test_device_config_from_flags() {
        let mut a = args(&["--name", "Desk", "--host", "10.0.0.2", "--serial", "0c3951"]);
        let cfg = device_config(&mut a).unwrap();
        assert!(a.is_empty());
        assert_eq!(cfg.host, "10.0.0.2");
        assert_eq!(cfg.serial_number.as_deref(), Some("0c3951"));
        assert_eq!(cfg.name, "Desk");

        let mut a = args(&["--serial", "0c3951"]);
        assert!(device_config(&mut a).is_err());
    }

    #[test]
    fn test_discovery_timeout() {
        assert_eq!(discovery_timeout(&mut args(&[])).unwrap(), DISCOVERY_TIMEOUT);
        assert_eq!(
            discovery_timeout(&mut args(&["--timeout", "1.5"])).unwrap(),
            Duration::from_millis(1500)
        );
        assert!(discovery_timeout(&mut args(&["--timeout", "1e30"])).is_err());
        assert!(discovery_timeout(&mut args(&["--timeout", "inf"])).is_err());
        assert!(discovery_timeout(&mut args(&["--timeout", "0"])).is_err());
        assert!(discovery_timeout(&mut args(&["--timeout", "soon"])).is_err());
    }
}
