//! Raw DHT22 single-wire protocol driver.
//!
//! The DHT22 has no bus controller: the host pulls the shared data line low
//! to request a conversion, releases it, and the sensor answers with a
//! response preamble followed by 40 data bits, each encoded in the width of
//! a high pulse. Linux scheduling jitter can corrupt a decode; the caller
//! treats any error here as one failed acquisition and recovers by
//! power-cycling the sensor.
//!
//! Frame layout (MSB first):
//!   [0] humidity high byte     ─┐ u16, tenths of %RH
//!   [1] humidity low byte      ─┘
//!   [2] temperature high byte  ─┐ u16 sign-magnitude, tenths of °C,
//!   [3] temperature low byte   ─┘ bit 15 set = negative
//!   [4] checksum — wrapping sum of bytes 0–3

use anyhow::{ensure, Result};
use std::time::Duration;

#[cfg(feature = "gpio")]
use rppal::gpio::{IoPin, Mode};
#[cfg(feature = "gpio")]
use std::time::Instant;

/// Host start signal: hold the line low at least 1 ms (datasheet: 1–10 ms).
const START_LOW: Duration = Duration::from_millis(2);

/// Upper bound for any single protocol phase. The longest legitimate phase
/// (the 80 µs response pulses) fits with a wide margin.
#[cfg(feature = "gpio")]
const PHASE_TIMEOUT: Duration = Duration::from_micros(300);

/// High pulses longer than this decode as a 1 bit (a 0 is ~26 µs high, a 1
/// is ~70 µs).
#[cfg(feature = "gpio")]
const BIT_THRESHOLD: Duration = Duration::from_micros(50);

/// Number of data bits in a frame.
#[cfg(feature = "gpio")]
const FRAME_BITS: usize = 40;

// ---------------------------------------------------------------------------
// Acquisition (hardware)
// ---------------------------------------------------------------------------

/// Perform one conversion, returning `(humidity %RH, temperature °C)`.
#[cfg(feature = "gpio")]
pub(crate) fn acquire(pin: &mut IoPin) -> Result<(f64, f64)> {
    // Start signal: pull the bus low, then release it for the sensor.
    pin.set_mode(Mode::Output);
    pin.set_low();
    std::thread::sleep(START_LOW);
    pin.set_mode(Mode::Input);

    // Response preamble: the sensor pulls low ~80 µs, then high ~80 µs.
    wait_for(pin, false)?;
    wait_for(pin, true)?;
    wait_for(pin, false)?;

    // 40 bits: ~50 µs low preamble, then a high pulse whose width is the bit.
    let mut frame = [0u8; 5];
    for bit in 0..FRAME_BITS {
        wait_for(pin, true)?;
        let high = wait_for(pin, false)?;
        if high > BIT_THRESHOLD {
            frame[bit / 8] |= 1 << (7 - bit % 8);
        }
    }

    decode(&frame)
}

/// Busy-wait until the line reaches `high`, returning how long the previous
/// level lasted. Bit widths are tens of microseconds, far below what a
/// sleeping wakeup can resolve.
#[cfg(feature = "gpio")]
fn wait_for(pin: &IoPin, high: bool) -> Result<Duration> {
    let start = Instant::now();
    while pin.is_high() != high {
        if start.elapsed() > PHASE_TIMEOUT {
            anyhow::bail!(
                "timeout waiting for {} level on the data line",
                if high { "high" } else { "low" }
            );
        }
    }
    Ok(start.elapsed())
}

// ---------------------------------------------------------------------------
// Frame decoding (pure)
// ---------------------------------------------------------------------------

/// Decode a 5-byte frame into `(humidity %RH, temperature °C)`.
pub(crate) fn decode(frame: &[u8; 5]) -> Result<(f64, f64)> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    ensure!(
        sum == frame[4],
        "checksum mismatch: computed {sum:#04x}, frame carries {:#04x}",
        frame[4]
    );

    let raw_h = u16::from_be_bytes([frame[0], frame[1]]);
    let raw_t = u16::from_be_bytes([frame[2], frame[3]]);

    let humidity = raw_h as f64 / 10.0;
    let magnitude = (raw_t & 0x7FFF) as f64 / 10.0;
    let temperature = if raw_t & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    };

    Ok((humidity, temperature))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a frame with a valid checksum from the four payload bytes.
    fn frame(payload: [u8; 4]) -> [u8; 5] {
        let sum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        [payload[0], payload[1], payload[2], payload[3], sum]
    }

    #[test]
    fn decode_typical_reading() {
        // 55.2 %RH, 24.3 °C
        let (h, t) = decode(&frame([0x02, 0x28, 0x00, 0xF3])).unwrap();
        assert!((h - 55.2).abs() < 1e-9, "humidity: {h}");
        assert!((t - 24.3).abs() < 1e-9, "temperature: {t}");
    }

    #[test]
    fn decode_negative_temperature() {
        // Sign-magnitude: 0x8000 | 65 → -6.5 °C
        let (_, t) = decode(&frame([0x01, 0x90, 0x80, 0x41])).unwrap();
        assert!((t - (-6.5)).abs() < 1e-9, "temperature: {t}");
    }

    #[test]
    fn decode_rejects_bad_checksum() {
        let mut f = frame([0x02, 0x28, 0x00, 0xF3]);
        f[4] = f[4].wrapping_add(1);
        assert!(decode(&f).is_err());
    }

    #[test]
    fn decode_checksum_wraps() {
        // Payload sums past 255; the checksum is the wrapped value.
        let f = frame([0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(f[4], 0xFC);
        assert!(decode(&f).is_ok());
    }

    #[test]
    fn start_signal_meets_datasheet_minimum() {
        assert!(START_LOW >= Duration::from_millis(1));
        assert!(START_LOW <= Duration::from_millis(10));
    }
}
