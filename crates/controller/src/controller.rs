//! Hysteresis decision engine for the grow environment.
//!
//! Each actuator has a dead zone between its two thresholds: the heater
//! turns on below `min_temp` and off at or above `max_temp`; the fan turns
//! on at or above the band's `max_humidity` and off below the configured
//! lower humidity bound. Inside a dead zone nothing changes, which keeps the
//! relays from chattering when a reading hovers near a boundary.
//!
//! The controller owns the logical actuator states; ports only mirror them.

use chrono::NaiveTime;

use crate::sensor::AggregatedReading;

// ---------------------------------------------------------------------------
// Configuration values (injected, never hard-coded)
// ---------------------------------------------------------------------------

/// Day/night window. Lights themselves are on a separate mechanical timer;
/// the schedule only selects which threshold band applies.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub lights_on: NaiveTime,
    pub lights_off: NaiveTime,
}

impl Schedule {
    /// Day is the half-open window `lights_on ≤ now < lights_off`.
    pub fn is_day(&self, now: NaiveTime) -> bool {
        self.lights_on <= now && now < self.lights_off
    }
}

/// Threshold band, in calibrated units (°F when conversion is configured).
#[derive(Debug, Clone, Copy)]
pub struct Band {
    pub min_temp: f64,
    pub max_temp: f64,
    pub max_humidity: f64,
}

/// Fixed additive corrections plus the output unit. Offsets apply in the
/// sensor's native units, before any conversion.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub humidity_offset: f64,
    pub temperature_offset: f64,
    pub fahrenheit: bool,
}

impl Calibration {
    pub fn calibrate(&self, reading: &AggregatedReading) -> CalibratedReading {
        let humidity = reading.humidity + self.humidity_offset;
        let mut temperature = reading.temperature + self.temperature_offset;
        if self.fahrenheit {
            temperature = temperature * 1.8 + 32.0;
        }
        CalibratedReading {
            humidity,
            temperature,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CalibratedReading {
    pub humidity: f64,
    pub temperature: f64,
}

// ---------------------------------------------------------------------------
// Actuator commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Heater,
    Fan,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heater => write!(f, "heater"),
            Self::Fan => write!(f, "fan"),
        }
    }
}

/// One actuator state change. Emitted only when the logical state actually
/// flips, so a command always implies a hardware write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub device: Device,
    pub on: bool,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller {
    schedule: Schedule,
    day: Band,
    night: Band,
    min_humidity: f64,
    heater_on: bool,
    fan_on: bool,
}

impl Controller {
    /// Both actuators start logically Off, matching the fail-safe state the
    /// outlets power up in.
    pub fn new(schedule: Schedule, day: Band, night: Band, min_humidity: f64) -> Self {
        Self {
            schedule,
            day,
            night,
            min_humidity,
            heater_on: false,
            fan_on: false,
        }
    }

    pub fn is_day(&self, now: NaiveTime) -> bool {
        self.schedule.is_day(now)
    }

    pub fn heater_on(&self) -> bool {
        self.heater_on
    }

    pub fn fan_on(&self) -> bool {
        self.fan_on
    }

    /// Evaluate one calibrated reading against the active band and return
    /// the commands (zero, one, or two) that change actuator state.
    pub fn decide(&mut self, reading: &CalibratedReading, now: NaiveTime) -> Vec<Command> {
        let band = if self.schedule.is_day(now) {
            &self.day
        } else {
            &self.night
        };

        let mut commands = Vec::new();

        if !self.heater_on && reading.temperature < band.min_temp {
            self.heater_on = true;
            commands.push(Command {
                device: Device::Heater,
                on: true,
            });
        } else if self.heater_on && reading.temperature >= band.max_temp {
            self.heater_on = false;
            commands.push(Command {
                device: Device::Heater,
                on: false,
            });
        }

        if !self.fan_on && reading.humidity >= band.max_humidity {
            self.fan_on = true;
            commands.push(Command {
                device: Device::Fan,
                on: true,
            });
        } else if self.fan_on && reading.humidity < self.min_humidity {
            self.fan_on = false;
            commands.push(Command {
                device: Device::Fan,
                on: false,
            });
        }

        commands
    }
}

// ===========================================================================
// Tests
// ===========================================================================
