//! TOML config file loading and validation.
//!
//! Everything the deployment decides lives here: schedule, threshold bands,
//! calibration, sensor and relay wiring, poll timing, and the fatal-report
//! hook. Nothing is hard-coded in the pipeline; the loop is parameterized
//! entirely by this file.
//!
//! ```toml
//! [database]
//! url = "sqlite:growbox.db?mode=rwc"
//!
//! [log]
//! file = "growbox.log"
//!
//! [notify]
//! recipient = "grower@example.com"
//! command = "/usr/local/bin/growbox-mailer"
//! credential_env = "GROWBOX_MAIL_CREDENTIAL"
//!
//! [schedule]
//! lights_on = "07:30"
//! lights_off = "22:00"
//!
//! [bands]
//! min_humidity = 40.0
//!
//! [bands.day]
//! min_temp = 76.0
//! max_temp = 81.0
//! max_humidity = 60.0
//!
//! [bands.night]
//! min_temp = 73.0
//! max_temp = 78.0
//! max_humidity = 60.0
//!
//! [calibration]
//! humidity_offset = -4.0
//! temperature_offset = 0.0
//! fahrenheit = true
//!
//! [[sensors]]
//! sensor_id = "dht-a"
//! data_pin = 27
//! power_pin = 17
//!
//! [[sensors]]
//! sensor_id = "dht-b"
//! data_pin = 22
//! power_pin = 23
//!
//! [actuators]
//! heater_pin = 26
//! fan_pin = 24
//! active_low = false
//!
//! [poll]
//! wait_sec = 30
//! settle_sec = 1
//! read_gap_sec = 1
//! ```

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::collections::HashSet;

use crate::controller::{Band, Calibration, Schedule};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub log: LogSection,
    pub notify: Option<NotifySection>,
    pub schedule: ScheduleSection,
    pub bands: BandsSection,
    #[serde(default)]
    pub calibration: CalibrationSection,
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
    pub actuators: ActuatorsSection,
    #[serde(default)]
    pub poll: PollSection,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_url")]
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

fn default_db_url() -> String {
    "sqlite:growbox.db?mode=rwc".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct LogSection {
    /// Append-only logfile. Attached to fatal reports; stderr when absent.
    pub file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotifySection {
    pub recipient: String,
    /// External mailer hook; see `notify` module docs for the contract.
    pub command: String,
    /// Env var holding the mailer credential. Never stored in this file.
    pub credential_env: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleSection {
    pub lights_on: String,
    pub lights_off: String,
}

#[derive(Debug, Deserialize)]
pub struct BandsSection {
    /// Fan-off threshold, shared by both bands.
    pub min_humidity: f64,
    pub day: BandEntry,
    pub night: BandEntry,
}

#[derive(Debug, Deserialize)]
pub struct BandEntry {
    pub min_temp: f64,
    pub max_temp: f64,
    pub max_humidity: f64,
}

impl BandEntry {
    pub fn band(&self) -> Band {
        Band {
            min_temp: self.min_temp,
            max_temp: self.max_temp,
            max_humidity: self.max_humidity,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CalibrationSection {
    #[serde(default)]
    pub humidity_offset: f64,
    #[serde(default)]
    pub temperature_offset: f64,
    #[serde(default)]
    pub fahrenheit: bool,
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            humidity_offset: 0.0,
            temperature_offset: 0.0,
            fahrenheit: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SensorEntry {
    pub sensor_id: String,
    pub data_pin: i64,
    /// Control pin of the relay on the sensor's power circuit, used for the
    /// power-cycle recovery.
    pub power_pin: i64,
}

#[derive(Debug, Deserialize)]
pub struct ActuatorsSection {
    pub heater_pin: i64,
    pub fan_pin: i64,
    /// Relay polarity for every relay in the rig.
    #[serde(default)]
    pub active_low: bool,
}

#[derive(Debug, Deserialize)]
pub struct PollSection {
    #[serde(default = "default_wait_sec")]
    pub wait_sec: u64,
    /// How long the power relay holds during a sensor power cycle.
    #[serde(default = "default_settle_sec")]
    pub settle_sec: u64,
    /// Pause after each sensor read within a cycle.
    #[serde(default = "default_read_gap_sec")]
    pub read_gap_sec: u64,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            wait_sec: default_wait_sec(),
            settle_sec: default_settle_sec(),
            read_gap_sec: default_read_gap_sec(),
        }
    }
}

fn default_wait_sec() -> u64 {
    30
}

fn default_settle_sec() -> u64 {
    1
}

fn default_read_gap_sec() -> u64 {
    1
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_schedule(&mut errors);
        self.validate_bands(&mut errors);
        self.validate_pins(&mut errors);
        self.validate_poll(&mut errors);
        self.validate_notify(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        let on = parse_time(&self.schedule.lights_on);
        let off = parse_time(&self.schedule.lights_off);

        if let Err(e) = &on {
            errors.push(format!("schedule: lights_on: {e}"));
        }
        if let Err(e) = &off {
            errors.push(format!("schedule: lights_off: {e}"));
        }
        if let (Ok(on), Ok(off)) = (on, off) {
            if on >= off {
                errors.push(format!(
                    "schedule: lights_on ({on}) must be earlier than lights_off ({off})"
                ));
            }
        }
    }

    fn validate_bands(&self, errors: &mut Vec<String>) {
        for (name, band) in [("day", &self.bands.day), ("night", &self.bands.night)] {
            if !(0.0..=100.0).contains(&band.min_temp) || !(0.0..=100.0).contains(&band.max_temp) {
                errors.push(format!(
                    "bands.{name}: temperature thresholds ({}, {}) out of range [0, 100]",
                    band.min_temp, band.max_temp
                ));
            }
            if band.min_temp >= band.max_temp {
                errors.push(format!(
                    "bands.{name}: min_temp ({}) must be less than max_temp ({})",
                    band.min_temp, band.max_temp
                ));
            }
            if !(0.0..=100.0).contains(&band.max_humidity) {
                errors.push(format!(
                    "bands.{name}: max_humidity {} out of range [0, 100]",
                    band.max_humidity
                ));
            }
            if self.bands.min_humidity >= band.max_humidity {
                errors.push(format!(
                    "bands.{name}: min_humidity ({}) must be less than max_humidity ({})",
                    self.bands.min_humidity, band.max_humidity
                ));
            }
        }
        if !(0.0..=100.0).contains(&self.bands.min_humidity) {
            errors.push(format!(
                "bands: min_humidity {} out of range [0, 100]",
                self.bands.min_humidity
            ));
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_pins: HashSet<i64> = HashSet::new();
        let mut check_pin = |pin: i64, what: String, errors: &mut Vec<String>| {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{what}: gpio {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen_pins.insert(pin) {
                errors.push(format!("{what}: gpio {pin} is already in use"));
            }
        };

        if self.sensors.is_empty() {
            errors.push("sensors: at least one sensor is required".to_string());
        }

        for (i, s) in self.sensors.iter().enumerate() {
            let ctx = if s.sensor_id.is_empty() {
                format!("sensors[{i}]")
            } else {
                format!("sensor '{}'", s.sensor_id)
            };

            if s.sensor_id.trim().is_empty() {
                errors.push(format!("{ctx}: sensor_id is empty"));
            } else if !seen_ids.insert(&s.sensor_id) {
                errors.push(format!("{ctx}: duplicate sensor_id"));
            }

            check_pin(s.data_pin, format!("{ctx}: data_pin"), errors);
            check_pin(s.power_pin, format!("{ctx}: power_pin"), errors);
        }

        check_pin(
            self.actuators.heater_pin,
            "actuators: heater_pin".to_string(),
            errors,
        );
        check_pin(
            self.actuators.fan_pin,
            "actuators: fan_pin".to_string(),
            errors,
        );
    }

    fn validate_poll(&self, errors: &mut Vec<String>) {
        if self.poll.wait_sec == 0 {
            errors.push("poll: wait_sec must be positive".to_string());
        }
        if self.poll.settle_sec == 0 {
            errors.push("poll: settle_sec must be positive".to_string());
        }
    }

    fn validate_notify(&self, errors: &mut Vec<String>) {
        if let Some(n) = &self.notify {
            if n.recipient.trim().is_empty() {
                errors.push("notify: recipient is empty".to_string());
            }
            if n.command.trim().is_empty() {
                errors.push("notify: command is empty".to_string());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Typed accessors
// ---------------------------------------------------------------------------

impl Config {
    pub fn schedule(&self) -> Result<Schedule> {
        Ok(Schedule {
            lights_on: parse_time(&self.schedule.lights_on)?,
            lights_off: parse_time(&self.schedule.lights_off)?,
        })
    }

    pub fn calibration(&self) -> Calibration {
        Calibration {
            humidity_offset: self.calibration.humidity_offset,
            temperature_offset: self.calibration.temperature_offset,
            fahrenheit: self.calibration.fahrenheit,
        }
    }
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .with_context(|| format!("invalid time-of-day '{s}' (expected HH:MM)"))
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"
        [schedule]
        lights_on = "07:30"
        lights_off = "22:00"

        [bands]
        min_humidity = 40.0

        [bands.day]
        min_temp = 76.0
        max_temp = 81.0
        max_humidity = 60.0

        [bands.night]
        min_temp = 73.0
        max_temp = 78.0
        max_humidity = 60.0

        [calibration]
        humidity_offset = -4.0
        fahrenheit = true

        [[sensors]]
        sensor_id = "dht-a"
        data_pin = 27
        power_pin = 17

        [[sensors]]
        sensor_id = "dht-b"
        data_pin = 22
        power_pin = 23

        [actuators]
        heater_pin = 26
        fan_pin = 24
    "#;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    // -- Happy path ----------------------------------------------------------

    #[test]
    fn good_config_validates() {
        let cfg = parse(GOOD);
        cfg.validate().unwrap();
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = parse(GOOD);
        assert_eq!(cfg.poll.wait_sec, 30);
        assert_eq!(cfg.poll.settle_sec, 1);
        assert_eq!(cfg.poll.read_gap_sec, 1);
        assert_eq!(cfg.database.url, "sqlite:growbox.db?mode=rwc");
        assert!(cfg.log.file.is_none());
        assert!(cfg.notify.is_none());
        assert!((cfg.calibration.temperature_offset - 0.0).abs() < 1e-9);
    }

    #[test]
    fn schedule_accessor_parses_times() {
        let s = parse(GOOD).schedule().unwrap();
        assert_eq!(s.lights_on, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(s.lights_off, NaiveTime::from_hms_opt(22, 0, 0).unwrap());
    }

    #[test]
    fn calibration_accessor_carries_flags() {
        let c = parse(GOOD).calibration();
        assert!(c.fahrenheit);
        assert!((c.humidity_offset - (-4.0)).abs() < 1e-9);
    }

    // -- Violations ----------------------------------------------------------

    fn expect_violation(mutate: impl Fn(&str) -> String, needle: &str) {
        let cfg = parse(&mutate(GOOD));
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains(needle), "expected '{needle}' in: {err}");
    }

    #[test]
    fn unparseable_lights_on_is_rejected() {
        expect_violation(|s| s.replace("\"07:30\"", "\"7h30\""), "lights_on");
    }

    #[test]
    fn inverted_schedule_is_rejected() {
        expect_violation(
            |s| s.replace("\"22:00\"", "\"06:00\""),
            "must be earlier than",
        );
    }

    #[test]
    fn inverted_band_is_rejected() {
        expect_violation(
            |s| s.replace("min_temp = 76.0", "min_temp = 90.0"),
            "must be less than max_temp",
        );
    }

    #[test]
    fn min_humidity_above_max_is_rejected() {
        expect_violation(
            |s| s.replace("min_humidity = 40.0", "min_humidity = 70.0"),
            "min_humidity",
        );
    }

    #[test]
    fn duplicate_pin_is_rejected() {
        expect_violation(|s| s.replace("fan_pin = 24", "fan_pin = 26"), "already in use");
    }

    #[test]
    fn out_of_range_pin_is_rejected() {
        expect_violation(
            |s| s.replace("data_pin = 27", "data_pin = 99"),
            "not a valid BCM GPIO pin",
        );
    }

    #[test]
    fn duplicate_sensor_id_is_rejected() {
        expect_violation(
            |s| s.replace("sensor_id = \"dht-b\"", "sensor_id = \"dht-a\""),
            "duplicate sensor_id",
        );
    }

    #[test]
    fn missing_sensors_are_rejected() {
        let stripped: String = GOOD
            .lines()
            .filter(|l| {
                !l.contains("[[sensors]]")
                    && !l.contains("sensor_id")
                    && !l.contains("data_pin")
                    && !l.contains("power_pin")
            })
            .collect::<Vec<_>>()
            .join("\n");
        let cfg = parse(&stripped);
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("at least one sensor"), "{err}");
    }

    #[test]
    fn zero_wait_is_rejected() {
        let with_poll = format!("{GOOD}\n[poll]\nwait_sec = 0\n");
        let cfg = parse(&with_poll);
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("wait_sec"), "{err}");
    }

    #[test]
    fn empty_notify_command_is_rejected() {
        let with_notify = format!("{GOOD}\n[notify]\nrecipient = \"x@y\"\ncommand = \"\"\n");
        let cfg = parse(&with_notify);
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("notify: command"), "{err}");
    }

    #[test]
    fn all_violations_are_reported_together() {
        let broken = GOOD
            .replace("\"07:30\"", "\"late\"")
            .replace("fan_pin = 24", "fan_pin = 1");
        let err = parse(&broken).validate().unwrap_err().to_string();
        assert!(err.contains("lights_on"), "{err}");
        assert!(err.contains("fan_pin"), "{err}");
        assert!(err.contains("2 errors"), "{err}");
    }
}
