//! DHT22 sensor ports and per-cycle sample aggregation.
//!
//! DHT22 sensors are prone to hang-ups; each port owns a relay on the
//! sensor's power circuit and recovers from a failed acquisition by
//! power-cycling once (assert, hold a settle delay, deassert) before
//! retrying. A second failure is a `SensorFault` — the sensor sits out the
//! cycle, it never brings the cycle down on its own.
//!
//! The `gpio` feature gates the real driver; without it a mock port produces
//! plausible synthetic readings and supports forced values and failures.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::hw::Hardware;
use crate::outlet::Outlet;

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// One sensor produced no usable reading this cycle, even after a power
/// cycle. Recoverable: the aggregator simply drops the sensor's contribution.
#[derive(Debug, Error)]
#[error("sensor '{sensor_id}' gave no usable reading after a power cycle")]
pub struct SensorFault {
    pub sensor_id: String,
}

/// No valid sample for a quantity across every sensor. Fatal to the cycle
/// and the process.
#[derive(Debug, Error)]
#[error("total sensor failure: no valid {quantity} sample this cycle")]
pub struct AggregationFailure {
    pub quantity: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Humidity,
    Temperature,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Humidity => write!(f, "humidity"),
            Self::Temperature => write!(f, "temperature"),
        }
    }
}

// ---------------------------------------------------------------------------
// Samples and aggregation
// ---------------------------------------------------------------------------

/// One successful acquisition: relative humidity in % and temperature in °C,
/// as reported by the sensor (calibration happens downstream).
#[derive(Debug, Clone)]
pub struct SensorSample {
    pub sensor_id: String,
    pub humidity: f64,
    pub temperature: f64,
}

/// Per-quantity means of the plausible samples in one cycle.
#[derive(Debug, Clone, Copy)]
pub struct AggregatedReading {
    pub humidity: f64,
    pub temperature: f64,
}

/// Plausibility filter: the DHT22 reports 0–100 %RH and −40–80 °C, so a
/// value at or beyond (0, 100) for either quantity is electrical noise.
fn plausible(value: f64) -> bool {
    value > 0.0 && value < 100.0
}

/// Merge the cycle's samples into one reading. Filtering is per quantity:
/// one sensor may contribute humidity while another contributes temperature.
pub fn aggregate(samples: &[SensorSample]) -> Result<AggregatedReading, AggregationFailure> {
    let humidities: Vec<f64> = samples
        .iter()
        .map(|s| s.humidity)
        .filter(|v| plausible(*v))
        .collect();
    let temperatures: Vec<f64> = samples
        .iter()
        .map(|s| s.temperature)
        .filter(|v| plausible(*v))
        .collect();

    if humidities.is_empty() {
        return Err(AggregationFailure {
            quantity: Quantity::Humidity,
        });
    }
    if temperatures.is_empty() {
        return Err(AggregationFailure {
            quantity: Quantity::Temperature,
        });
    }

    Ok(AggregatedReading {
        humidity: mean(&humidities),
        temperature: mean(&temperatures),
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

// ---------------------------------------------------------------------------
// Real sensor port (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub struct DhtSensor {
    sensor_id: String,
    data: rppal::gpio::IoPin,
    power: Outlet,
    settle: Duration,
}

#[cfg(feature = "gpio")]
impl DhtSensor {
    pub fn new(
        hw: &Hardware,
        sensor_id: &str,
        data_pin: u8,
        power_pin: u8,
        settle: Duration,
        active_low: bool,
    ) -> anyhow::Result<Self> {
        let data = hw.io_pin(data_pin)?;
        let power = Outlet::new(hw, &format!("{sensor_id}-power"), power_pin, active_low)?;
        Ok(Self {
            sensor_id: sensor_id.to_string(),
            data,
            power,
            settle,
        })
    }

    /// One acquisition attempt; on failure, exactly one power cycle and one
    /// retry before giving up for the cycle.
    pub async fn read(&mut self) -> Result<SensorSample, SensorFault> {
        match crate::dht::acquire(&mut self.data) {
            Ok((h, t)) => Ok(self.sample(h, t)),
            Err(e) => {
                warn!(sensor = %self.sensor_id, "acquisition failed: {e} — power-cycling");
                self.power_cycle().await;
                match crate::dht::acquire(&mut self.data) {
                    Ok((h, t)) => Ok(self.sample(h, t)),
                    Err(e) => {
                        warn!(sensor = %self.sensor_id, "retry after power cycle failed: {e}");
                        Err(SensorFault {
                            sensor_id: self.sensor_id.clone(),
                        })
                    }
                }
            }
        }
    }

    fn sample(&self, humidity: f64, temperature: f64) -> SensorSample {
        SensorSample {
            sensor_id: self.sensor_id.clone(),
            humidity,
            temperature,
        }
    }

    async fn power_cycle(&mut self) {
        self.power.power_on();
        tokio::time::sleep(self.settle).await;
        self.power.power_off();
    }
}

// ---------------------------------------------------------------------------
// Mock sensor port (development — synthetic readings, forcible for tests)
// ---------------------------------------------------------------------------

#[cfg(not(feature = "gpio"))]
pub struct DhtSensor {
    sensor_id: String,
    power: Outlet,
    settle: Duration,
    sim: SimChannel,
    /// When set, every successful read returns these (humidity, temperature)
    /// values instead of the simulator's.
    pub(crate) forced: Option<(f64, f64)>,
    /// Number of upcoming acquisition attempts that fail. One failed attempt
    /// triggers a power cycle and a retry, two in a row a `SensorFault`.
    pub(crate) fail_reads: u32,
}

#[cfg(not(feature = "gpio"))]
impl DhtSensor {
    pub fn new(
        hw: &Hardware,
        sensor_id: &str,
        data_pin: u8,
        power_pin: u8,
        settle: Duration,
        active_low: bool,
    ) -> anyhow::Result<Self> {
        tracing::debug!(
            "[mock-gpio] registered sensor '{sensor_id}' (data gpio {data_pin}, power gpio {power_pin} — not wired)"
        );
        let power = Outlet::new(hw, &format!("{sensor_id}-power"), power_pin, active_low)?;
        Ok(Self {
            sensor_id: sensor_id.to_string(),
            power,
            settle,
            sim: SimChannel::new(),
            forced: None,
            fail_reads: 0,
        })
    }

    pub async fn read(&mut self) -> Result<SensorSample, SensorFault> {
        if !self.try_acquire() {
            warn!(sensor = %self.sensor_id, "acquisition failed — power-cycling");
            self.power_cycle().await;
            if !self.try_acquire() {
                warn!(sensor = %self.sensor_id, "retry after power cycle failed");
                return Err(SensorFault {
                    sensor_id: self.sensor_id.clone(),
                });
            }
        }

        let (humidity, temperature) = match self.forced {
            Some(values) => values,
            None => self.sim.next(),
        };
        Ok(SensorSample {
            sensor_id: self.sensor_id.clone(),
            humidity,
            temperature,
        })
    }

    fn try_acquire(&mut self) -> bool {
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            return false;
        }
        true
    }

    async fn power_cycle(&mut self) {
        self.power.power_on();
        tokio::time::sleep(self.settle).await;
        self.power.power_off();
    }

    /// Simulated hardware writes to the power relay so far. Each power cycle
    /// contributes two (assert + deassert).
    #[cfg(test)]
    pub(crate) fn power_writes(&self) -> u32 {
        self.power.writes
    }
}

/// Random walk producing plausible grow-tent conditions, in the spirit of
/// the richer soil-moisture simulator this project grew out of.
#[cfg(not(feature = "gpio"))]
struct SimChannel {
    humidity: f64,
    temperature: f64,
}

#[cfg(not(feature = "gpio"))]
impl SimChannel {
    fn new() -> Self {
        // Start near typical tent conditions, jittered so two mock sensors
        // diverge the way two real ones would.
        Self {
            humidity: 50.0 + fastrand::f64() * 8.0,
            temperature: 22.0 + fastrand::f64() * 4.0,
        }
    }

    fn next(&mut self) -> (f64, f64) {
        self.humidity = (self.humidity + (fastrand::f64() - 0.5) * 1.5).clamp(20.0, 90.0);
        self.temperature = (self.temperature + (fastrand::f64() - 0.5) * 0.6).clamp(10.0, 40.0);
        (self.humidity, self.temperature)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
