//! Relay-switched power outlets (heater, fan, sensor power circuits).
//!
//! `power_on`/`power_off` are idempotent: the outlet remembers the last state
//! it was told and skips the hardware write when nothing changes, so the
//! physical relay always mirrors the logical state. The `gpio` feature gates
//! the real rppal driver; without it, a mock implementation tracks state in
//! memory and counts the writes it would have made.

use anyhow::Result;

use crate::hw::Hardware;

#[cfg(feature = "gpio")]
use rppal::gpio::OutputPin;

// ---------------------------------------------------------------------------
// Real outlet (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub struct Outlet {
    name: String,
    pin: OutputPin,
    active_low: bool, // many relay boards are active-low
    on: bool,
}

#[cfg(feature = "gpio")]
impl Outlet {
    pub fn new(hw: &Hardware, name: &str, pin_num: u8, active_low: bool) -> Result<Self> {
        let mut pin = hw.output_pin(pin_num)?;

        // Fail-safe: relay OFF at startup
        if active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }

        Ok(Self {
            name: name.to_string(),
            pin,
            active_low,
            on: false,
        })
    }

    pub fn power_on(&mut self) {
        if self.on {
            return;
        }
        self.write(true);
        self.on = true;
        tracing::info!(outlet = %self.name, "relay ON");
    }

    pub fn power_off(&mut self) {
        if !self.on {
            return;
        }
        self.write(false);
        self.on = false;
        tracing::info!(outlet = %self.name, "relay OFF");
    }

    // active-low relay: LOW = ON, HIGH = OFF
    fn write(&mut self, on: bool) {
        if self.active_low == on {
            self.pin.set_low();
        } else {
            self.pin.set_high();
        }
    }

    pub fn set(&mut self, on: bool) {
        if on {
            self.power_on();
        } else {
            self.power_off();
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

// ---------------------------------------------------------------------------
// Mock outlet (development — no hardware, counts writes)
// ---------------------------------------------------------------------------

#[cfg(not(feature = "gpio"))]
pub struct Outlet {
    name: String,
    on: bool,
    /// Number of simulated hardware writes since construction. Lets tests
    /// assert that repeated identical commands reach the relay only once.
    pub(crate) writes: u32,
}

#[cfg(not(feature = "gpio"))]
impl Outlet {
    pub fn new(_hw: &Hardware, name: &str, pin_num: u8, _active_low: bool) -> Result<Self> {
        tracing::debug!("[mock-gpio] registered outlet '{name}' (gpio {pin_num} — not wired)");
        Ok(Self {
            name: name.to_string(),
            on: false,
            writes: 0,
        })
    }

    pub fn power_on(&mut self) {
        if self.on {
            return;
        }
        self.on = true;
        self.writes += 1;
        tracing::info!(outlet = %self.name, "[mock-gpio] relay ON");
    }

    pub fn power_off(&mut self) {
        if !self.on {
            return;
        }
        self.on = false;
        self.writes += 1;
        tracing::info!(outlet = %self.name, "[mock-gpio] relay OFF");
    }

    pub fn set(&mut self, on: bool) {
        if on {
            self.power_on();
        } else {
            self.power_off();
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

// ===========================================================================
// Tests
// ===========================================================================
