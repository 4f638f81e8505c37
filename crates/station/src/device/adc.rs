//! ADS1115 16-bit ADC over I2C, used to sample the analog soil probe.
//!
//! Single-ended reads at PGA ±4.096 V, 128 SPS, single-shot mode. The
//! register math is always compiled; the bus driver needs the `gpio` feature.

#![cfg_attr(not(feature = "gpio"), allow(dead_code))]

#[cfg(feature = "gpio")]
use std::{thread, time::Duration};

#[cfg(feature = "gpio")]
use rppal::i2c::I2c;

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS      : write 1 to start single-shot conversion
//   [14:12] MUX     : input multiplexer (channel selection)
//   [11:9]  PGA     : programmable gain amplifier
//   [8]     MODE    : 0 = continuous, 1 = single-shot
//   [7:5]   DR      : data rate
//   [4:0]   comparator settings, 00011 = comparator off

/// OS=1, PGA=001 (±4.096 V), MODE=1, DR=100 (128 SPS), COMP_QUE=11.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// MUX values for single-ended reads (AINx vs GND).
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// Highest single-ended channel index.
pub const MAX_CHANNEL: u8 = 3;

/// Full-scale voltage for the PGA setting in `CONFIG_BASE`.
const FULL_SCALE_VOLTS: f64 = 4.096;

/// Conversion takes ~7.8 ms at 128 SPS.
#[cfg(feature = "gpio")]
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Bit 15 of the config register: conversion-ready flag when read.
#[cfg(feature = "gpio")]
const OS_READY_BIT: u16 = 1 << 15;

/// Config register value for a single-ended read on `channel`.
fn config_for_channel(channel: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel as usize] << MUX_SHIFT)
}

/// Convert a raw conversion result to volts. Negative results (bus noise on a
/// single-ended input) clamp to 0.
pub fn raw_to_volts(raw: i16) -> f64 {
    f64::from(raw.max(0)) * FULL_SCALE_VOLTS / 32768.0
}

// ── Driver ──────────────────────────────────────────────────────────────────

#[cfg(feature = "gpio")]
pub struct Ads1115 {
    i2c: I2c,
    channel: u8,
}

#[cfg(feature = "gpio")]
impl Ads1115 {
    /// Open I2C bus 1 and address the converter at `addr`.
    pub fn new(addr: u16, channel: u8) -> anyhow::Result<Self> {
        anyhow::ensure!(
            channel <= MAX_CHANNEL,
            "ADS1115 channel {channel} out of range (0–{MAX_CHANNEL})",
        );

        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;

        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            channel,
            "ads1115 initialised"
        );

        Ok(Self { i2c, channel })
    }

    /// Single-shot read of the configured channel, in volts.
    pub fn read_volts(&mut self) -> anyhow::Result<f64> {
        let config = config_for_channel(self.channel);
        self.i2c.block_write(REG_CONFIG, &config.to_be_bytes())?;

        thread::sleep(CONVERSION_WAIT);

        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(raw_to_volts(i16::from_be_bytes(buf)))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_register_per_channel() {
        assert_eq!(config_for_channel(0), 0xC383);
        assert_eq!(config_for_channel(1), 0xD383);
        assert_eq!(config_for_channel(2), 0xE383);
        assert_eq!(config_for_channel(3), 0xF383);
    }

    #[test]
    fn config_base_has_correct_pga() {
        // PGA bits [11:9] should be 001 for ±4.096 V.
        assert_eq!((CONFIG_BASE >> 9) & 0b111, 0b001);
    }

    #[test]
    fn config_base_is_single_shot_128sps() {
        assert_eq!((CONFIG_BASE >> 8) & 1, 1);
        assert_eq!((CONFIG_BASE >> 5) & 0b111, 0b100);
        assert_eq!((CONFIG_BASE >> 15) & 1, 1);
    }

    #[test]
    fn raw_to_volts_scale() {
        assert_eq!(raw_to_volts(0), 0.0);
        assert!((raw_to_volts(16384) - 2.048).abs() < 1e-9);
        assert!((raw_to_volts(i16::MAX) - 4.096).abs() < 1e-3);
    }

    #[test]
    fn raw_to_volts_clamps_negative() {
        assert_eq!(raw_to_volts(-120), 0.0);
    }
}
