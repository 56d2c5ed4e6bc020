//! The per-cycle control pipeline and the outer polling loop.
//!
//! One cycle runs start to finish on a single task: read every sensor →
//! aggregate → calibrate → decide → actuate → persist → sleep. Sensor faults
//! are absorbed here (the sensor sits the cycle out); aggregation and
//! persistence failures terminate the process. Recovery from a fatal error
//! is the supervisor's job, via a process restart.

use chrono::{DateTime, Local};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::controller::{Calibration, Controller, Device};
use crate::db::{Db, Observation, PersistenceFault};
use crate::notify::Notifier;
use crate::outlet::Outlet;
use crate::sensor::{aggregate, AggregationFailure, DhtSensor, SensorSample};

/// Subject line of the one report sent on fatal termination.
const FATAL_SUBJECT: &str = "growbox controller: fatal error";

/// A condition the loop does not continue past. Everything else (sensor
/// faults) is absorbed below the aggregation boundary.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Aggregation(#[from] AggregationFailure),
    #[error(transparent)]
    Persistence(#[from] PersistenceFault),
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

pub struct ControlLoop {
    sensors: Vec<DhtSensor>,
    heater: Outlet,
    fan: Outlet,
    controller: Controller,
    calibration: Calibration,
    db: Db,
    wait: Duration,
    read_gap: Duration,
}

impl ControlLoop {
    pub fn new(
        sensors: Vec<DhtSensor>,
        heater: Outlet,
        fan: Outlet,
        controller: Controller,
        calibration: Calibration,
        db: Db,
        wait: Duration,
        read_gap: Duration,
    ) -> Self {
        Self {
            sensors,
            heater,
            fan,
            controller,
            calibration,
            db,
            wait,
            read_gap,
        }
    }

    /// Poll until a fatal error. Never returns `Ok`.
    pub async fn run(&mut self) -> Result<(), FatalError> {
        loop {
            self.cycle(Local::now()).await?;
            sleep(self.wait).await;
        }
    }

    /// One full pipeline pass at the given wall-clock instant.
    pub(crate) async fn cycle(&mut self, now: DateTime<Local>) -> Result<(), FatalError> {
        // Read every sensor; a faulting sensor is dropped for this cycle and
        // never brings it down on its own.
        let mut samples: Vec<SensorSample> = Vec::with_capacity(self.sensors.len());
        for sensor in &mut self.sensors {
            match sensor.read().await {
                Ok(sample) => {
                    tracing::debug!(
                        sensor = %sample.sensor_id,
                        h = sample.humidity,
                        t = sample.temperature,
                        "sample"
                    );
                    samples.push(sample);
                }
                Err(fault) => warn!(sensor = %fault.sensor_id, "dropped for this cycle: {fault}"),
            }
            sleep(self.read_gap).await;
        }

        let raw = aggregate(&samples)?;
        let reading = self.calibration.calibrate(&raw);

        let lights_on = self.controller.is_day(now.time());
        for command in self.controller.decide(&reading, now.time()) {
            info!(device = %command.device, on = command.on, "switching");
            match command.device {
                Device::Heater => self.heater.set(command.on),
                Device::Fan => self.fan.set(command.on),
            }
        }

        // The record reflects what the ports actually hold, not what the
        // controller intended.
        let observation = Observation {
            ts: now.timestamp(),
            temperature: reading.temperature,
            humidity: reading.humidity,
            lights_on,
            heater_on: self.heater.is_on(),
            fan_on: self.fan.is_on(),
        };
        self.db.append(&observation).await?;

        info!(
            temp = format!("{:.1}", reading.temperature),
            rh = format!("{:.1}", reading.humidity),
            lights = lights_on,
            heater = observation.heater_on,
            fan = observation.fan_on,
            "cycle complete"
        );
        Ok(())
    }

    /// Fail-safe for shutdown paths: both actuators off, idempotently.
    pub fn all_off(&mut self) {
        self.heater.power_off();
        self.fan.power_off();
    }
}

// ---------------------------------------------------------------------------
// Fatal reporting
// ---------------------------------------------------------------------------

/// Log a fatal error and send the one report the operator gets, with the
/// logfile attached when there is one. Report delivery failures can only be
/// logged — there is nobody further to tell.
pub fn report_fatal(notifier: &dyn Notifier, fatal: &FatalError, logfile: Option<&str>) {
    error!("fatal: {fatal}");
    let body = format!(
        "Unhandled error in the control loop:\n\n[{fatal}]\n\nSee the attached logfile for more details."
    );
    let attachments: Vec<&Path> = logfile.iter().map(|p| Path::new(*p)).collect();
    if let Err(e) = notifier.send_report(FATAL_SUBJECT, &body, &attachments) {
        error!("failed to send fatal report: {e}");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
