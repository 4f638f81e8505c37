//! Bosch BME280 over I2C: forced-mode measurements with the datasheet's
//! floating-point compensation formulas.

use std::{thread, time::Duration};

use rppal::i2c::I2c;

use super::env::EnvReading;

const REG_CHIP_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CALIB_00: u8 = 0x88; // 0x88..=0xA1
const REG_CALIB_26: u8 = 0xE1; // 0xE1..=0xE7
const REG_CTRL_HUM: u8 = 0xF2;
const REG_STATUS: u8 = 0xF3;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_DATA: u8 = 0xF7; // 0xF7..=0xFE

const CHIP_ID: u8 = 0x60;
const SOFT_RESET: u8 = 0xB6;

/// Oversampling x1 for humidity.
const CTRL_HUM: u8 = 0b001;
/// osrs_t = x1, osrs_p = x1, mode = forced.
const CTRL_MEAS_FORCED: u8 = (0b001 << 5) | (0b001 << 2) | 0b01;
/// Status bit 3: conversion running.
const STATUS_MEASURING: u8 = 1 << 3;

#[derive(Debug, Clone, Copy)]
struct Calibration {
    t1: f64,
    t2: f64,
    t3: f64,
    p1: f64,
    p2: f64,
    p3: f64,
    p4: f64,
    p5: f64,
    p6: f64,
    p7: f64,
    p8: f64,
    p9: f64,
    h1: f64,
    h2: f64,
    h3: f64,
    h4: f64,
    h5: f64,
    h6: f64,
}

impl Calibration {
    fn parse(a: &[u8; 26], b: &[u8; 7]) -> Self {
        let u16_at = |i: usize| f64::from(u16::from_le_bytes([a[i], a[i + 1]]));
        let i16_at = |i: usize| f64::from(i16::from_le_bytes([a[i], a[i + 1]]));

        let h4 = (i16::from(b[3] as i8) << 4) | i16::from(b[4] & 0x0F);
        let h5 = (i16::from(b[5] as i8) << 4) | i16::from(b[4] >> 4);

        Self {
            t1: u16_at(0),
            t2: i16_at(2),
            t3: i16_at(4),
            p1: u16_at(6),
            p2: i16_at(8),
            p3: i16_at(10),
            p4: i16_at(12),
            p5: i16_at(14),
            p6: i16_at(16),
            p7: i16_at(18),
            p8: i16_at(20),
            p9: i16_at(22),
            h1: f64::from(a[25]),
            h2: f64::from(i16::from_le_bytes([b[0], b[1]])),
            h3: f64::from(b[2]),
            h4: f64::from(h4),
            h5: f64::from(h5),
            h6: f64::from(b[6] as i8),
        }
    }

    /// Returns (°C, t_fine).
    fn temperature(&self, adc_t: f64) -> (f64, f64) {
        let var1 = (adc_t / 16384.0 - self.t1 / 1024.0) * self.t2;
        let d = adc_t / 131072.0 - self.t1 / 8192.0;
        let var2 = d * d * self.t3;
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pascals.
    fn pressure(&self, adc_p: f64, t_fine: f64) -> f64 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * self.p6 / 32768.0;
        var2 += var1 * self.p5 * 2.0;
        var2 = var2 / 4.0 + self.p4 * 65536.0;
        var1 = (self.p3 * var1 * var1 / 524288.0 + self.p2 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * self.p1;
        if var1 == 0.0 {
            return 0.0;
        }
        let mut p = 1048576.0 - adc_p;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = self.p9 * p * p / 2147483648.0;
        let var2 = p * self.p8 / 32768.0;
        p + (var1 + var2 + self.p7) / 16.0
    }

    /// %RH, clamped to 0..=100.
    fn humidity(&self, adc_h: f64, t_fine: f64) -> f64 {
        let h = t_fine - 76800.0;
        let h = (adc_h - (self.h4 * 64.0 + self.h5 / 16384.0 * h))
            * (self.h2 / 65536.0
                * (1.0 + self.h6 / 67108864.0 * h * (1.0 + self.h3 / 67108864.0 * h)));
        let h = h * (1.0 - self.h1 * h / 524288.0);
        h.clamp(0.0, 100.0)
    }
}

pub struct Bme280 {
    i2c: I2c,
    calibration: Calibration,
}

impl Bme280 {
    pub fn new(bus: u8, addr: u16) -> anyhow::Result<Self> {
        let mut i2c = I2c::with_bus(bus)?;
        i2c.set_slave_address(addr)?;

        let id = read_u8(&mut i2c, REG_CHIP_ID)?;
        anyhow::ensure!(id == CHIP_ID, "unexpected chip id 0x{id:02x} (want 0x{CHIP_ID:02x})");

        i2c.write(&[REG_RESET, SOFT_RESET])?;
        thread::sleep(Duration::from_millis(5));

        let mut a = [0u8; 26];
        i2c.write_read(&[REG_CALIB_00], &mut a)?;
        let mut b = [0u8; 7];
        i2c.write_read(&[REG_CALIB_26], &mut b)?;

        // ctrl_hum only takes effect after a ctrl_meas write.
        i2c.write(&[REG_CTRL_HUM, CTRL_HUM])?;

        tracing::info!(
            bus,
            addr = format_args!("0x{addr:02x}"),
            "bme280 initialised"
        );

        Ok(Self {
            i2c,
            calibration: Calibration::parse(&a, &b),
        })
    }

    pub fn measure(&mut self) -> anyhow::Result<EnvReading> {
        self.i2c.write(&[REG_CTRL_MEAS, CTRL_MEAS_FORCED])?;

        thread::sleep(Duration::from_millis(10));
        for _ in 0..5 {
            if read_u8(&mut self.i2c, REG_STATUS)? & STATUS_MEASURING == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut d = [0u8; 8];
        self.i2c.write_read(&[REG_DATA], &mut d)?;

        let adc_p = f64::from((u32::from(d[0]) << 12) | (u32::from(d[1]) << 4) | (u32::from(d[2]) >> 4));
        let adc_t = f64::from((u32::from(d[3]) << 12) | (u32::from(d[4]) << 4) | (u32::from(d[5]) >> 4));
        let adc_h = f64::from((u32::from(d[6]) << 8) | u32::from(d[7]));

        let (temperature, t_fine) = self.calibration.temperature(adc_t);
        Ok(EnvReading {
            temperature,
            humidity: self.calibration.humidity(adc_h, t_fine),
            pressure: self.calibration.pressure(adc_p, t_fine) / 100.0,
        })
    }
}

fn read_u8(i2c: &mut I2c, reg: u8) -> anyhow::Result<u8> {
    let mut buf = [0u8; 1];
    i2c.write_read(&[reg], &mut buf)?;
    Ok(buf[0])
}
