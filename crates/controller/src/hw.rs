//! Process-wide hardware access handle.
//!
//! Constructed once in `main` and passed explicitly to every sensor and
//! outlet; pin ownership stays with the port that requested it. The `gpio`
//! feature gates the real rppal backend; without it the handle is inert and
//! the ports fall back to their mock implementations.

use anyhow::Result;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, IoPin, Mode, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO handle (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub struct Hardware {
    gpio: Gpio,
}

#[cfg(feature = "gpio")]
impl Hardware {
    pub fn probe() -> Result<Self> {
        let gpio = Gpio::new()?;
        tracing::info!("gpio initialised");
        Ok(Self { gpio })
    }

    pub(crate) fn output_pin(&self, pin: u8) -> Result<OutputPin> {
        Ok(self.gpio.get(pin)?.into_output())
    }

    pub(crate) fn io_pin(&self, pin: u8) -> Result<IoPin> {
        Ok(self.gpio.get(pin)?.into_io(Mode::Input))
    }
}

// ---------------------------------------------------------------------------
// Mock handle (development — no hardware)
// ---------------------------------------------------------------------------

#[cfg(not(feature = "gpio"))]
pub struct Hardware;

#[cfg(not(feature = "gpio"))]
impl Hardware {
    pub fn probe() -> Result<Self> {
        tracing::info!("[mock-gpio] hardware handle initialised (no hardware)");
        Ok(Self)
    }
}
