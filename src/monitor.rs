use std::future::Future;

use chrono::Local;
use h806sb::Light;
use log::info;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::DeviceConfig;

/// Polls the device every `poll_interval` and prints availability changes, until Ctrl-C.
pub async fn run(cfg: &DeviceConfig, light: Light) -> anyhow::Result<()> {
    run_until(cfg, light, tokio::signal::ctrl_c()).await
}

/// Like [run], but stops once `shutdown` completes, even if that happens during a check.
async fn run_until<F: Future>(
    cfg: &DeviceConfig,
    mut light: Light,
    shutdown: F,
) -> anyhow::Result<()> {
    let mut tick = interval(cfg.poll_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Monitoring {} ({}) every {}s",
        light.name,
        light.unique_id(),
        cfg.poll_interval
    );

    tokio::pin!(shutdown);

    let mut previous = None;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tick.tick() => {
                let available = light.refresh_with_timeout(cfg.timeout()).await;
                if previous != Some(available) {
                    println!(
                        "{} {} is {}",
                        Local::now().format("%Y-%m-%d %H:%M:%S"),
                        light.name,
                        describe(available)
                    );
                    previous = Some(available);
                }
            }
        }
    }

    light.close();
    Ok(())
}

pub fn describe(available: bool) -> &'static str {
    if available {
        "available"
    } else {
        "unavailable"
    }
}
