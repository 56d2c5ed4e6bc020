mod config;
mod controller;
mod cycle;
mod db;
#[cfg(any(feature = "gpio", test))]
mod dht;
mod hw;
mod notify;
mod outlet;
mod sensor;

use anyhow::{Context, Result};
use chrono::DateTime;
use std::env;
use std::fs::{File, OpenOptions};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use controller::Controller;
use cycle::ControlLoop;
use db::Db;
use hw::Hardware;
use notify::{CommandNotifier, LogOnlyNotifier, Notifier};
use outlet::Outlet;
use sensor::DhtSensor;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    init_logging(cfg.log.file.as_deref())?;
    info!(config = %config_path, "growbox controller starting");

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&cfg.database.url).await?;
    db.ensure_schema().await?;

    // ── Data probe (no hardware, no loop) ───────────────────────────
    let args: Vec<String> = env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--dump") {
        let start = args.get(1).and_then(|s| s.parse().ok());
        let end = args.get(2).and_then(|s| s.parse().ok());
        return dump(&db, start, end).await;
    }

    // ── Hardware ────────────────────────────────────────────────────
    let hw = Hardware::probe()?;
    let active_low = cfg.actuators.active_low;
    let heater = Outlet::new(&hw, "heater", cfg.actuators.heater_pin as u8, active_low)?;
    let fan = Outlet::new(&hw, "fan", cfg.actuators.fan_pin as u8, active_low)?;

    let settle = Duration::from_secs(cfg.poll.settle_sec);
    let mut sensors = Vec::with_capacity(cfg.sensors.len());
    for s in &cfg.sensors {
        sensors.push(DhtSensor::new(
            &hw,
            &s.sensor_id,
            s.data_pin as u8,
            s.power_pin as u8,
            settle,
            active_low,
        )?);
    }
    info!(
        sensors = sensors.len(),
        heater_pin = cfg.actuators.heater_pin,
        fan_pin = cfg.actuators.fan_pin,
        "rig ready"
    );

    // ── Control loop ────────────────────────────────────────────────
    let environment = Controller::new(
        cfg.schedule()?,
        cfg.bands.day.band(),
        cfg.bands.night.band(),
        cfg.bands.min_humidity,
    );

    let notifier: Box<dyn Notifier> = match &cfg.notify {
        Some(n) => {
            info!(recipient = %n.recipient, "reporting to mailer hook");
            Box::new(CommandNotifier::from_config(n))
        }
        None => Box::new(LogOnlyNotifier),
    };

    let mut control = ControlLoop::new(
        sensors,
        heater,
        fan,
        environment,
        cfg.calibration(),
        db,
        Duration::from_secs(cfg.poll.wait_sec),
        Duration::from_secs(cfg.poll.read_gap_sec),
    );

    let result = tokio::select! {
        res = control.run() => res,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    // Fail-safe on every exit path: never leave a relay latched.
    control.all_off();

    if let Err(fatal) = result {
        cycle::report_fatal(notifier.as_ref(), &fatal, cfg.log.file.as_deref());
        return Err(fatal.into());
    }

    info!("clean shutdown");
    Ok(())
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Shared append-only logfile handle for the fmt subscriber.
struct FileWriter(Arc<Mutex<File>>);

impl io::Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).flush()
    }
}

fn init_logging(logfile: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open logfile: {path}"))?;
            let file = Arc::new(Mutex::new(file));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(move || FileWriter(Arc::clone(&file)))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Data probe
// ---------------------------------------------------------------------------

/// Print stored observations, oldest first, optionally bounded by unix
/// timestamps: `growbox-controller --dump [START] [END]`.
async fn dump(db: &Db, start: Option<i64>, end: Option<i64>) -> Result<()> {
    let rows = db.query(start, end).await?;
    for o in &rows {
        let when = DateTime::from_timestamp(o.ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| o.ts.to_string());
        println!(
            "{when} | temp {:6.1} | rh {:5.1}% | lights {:>3} | heater {:>3} | fan {:>3}",
            o.temperature,
            o.humidity,
            on_off(o.lights_on),
            on_off(o.heater_on),
            on_off(o.fan_on),
        );
    }
    eprintln!("{} observation(s)", rows.len());
    Ok(())
}

fn on_off(on: bool) -> &'static str {
    if on {
        "On"
    } else {
        "Off"
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_off_formats() {
        assert_eq!(on_off(true), "On");
        assert_eq!(on_off(false), "Off");
    }

    #[tokio::test]
    async fn dump_handles_empty_store() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.ensure_schema().await.unwrap();
        dump(&db, None, None).await.unwrap();
    }
}
