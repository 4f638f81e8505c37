//! Temperature / humidity / pressure sensor (BME280 on I2C).

#[cfg(feature = "gpio")]
use std::sync::Mutex;

use serde::Serialize;

#[cfg(feature = "gpio")]
use super::bme280::Bme280;
use super::{Capability, Device, DriverMode, Sensor};
use crate::error::{DeviceError, EncodeError};

/// One environment sample: °C, %RH, hPa.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnvReading {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

impl Default for EnvReading {
    fn default() -> Self {
        Self {
            temperature: 21.0,
            humidity: 45.0,
            pressure: 1013.25,
        }
    }
}

/// JSON document published on `d/env`.
pub fn encode_env(reading: &EnvReading) -> Result<Vec<u8>, EncodeError> {
    for v in [reading.temperature, reading.humidity, reading.pressure] {
        if !v.is_finite() {
            return Err(EncodeError::NonFinite(v));
        }
    }
    Ok(serde_json::to_vec(reading)?)
}

/// I2C location of the sensor.
#[derive(Debug, Clone, Copy)]
pub struct EnvWiring {
    pub i2c_bus: u8,
    pub address: u16,
}

enum Backend {
    Mock(EnvReading),
    #[cfg(feature = "gpio")]
    I2c(Mutex<Bme280>),
}

pub struct EnvSensor {
    name: String,
    backend: Backend,
}

impl EnvSensor {
    pub fn new(name: &str, wiring: EnvWiring, mode: DriverMode) -> Result<Self, DeviceError> {
        let backend = match mode {
            DriverMode::Mock => {
                tracing::info!(device = name, "[mock] environment sensor initialised");
                Backend::Mock(EnvReading::default())
            }
            DriverMode::Hardware => Self::hardware(name, wiring)?,
        };
        Ok(Self {
            name: name.to_string(),
            backend,
        })
    }

    #[cfg(feature = "gpio")]
    fn hardware(name: &str, wiring: EnvWiring) -> Result<Backend, DeviceError> {
        let sensor = Bme280::new(wiring.i2c_bus, wiring.address)
            .map_err(|e| DeviceError::hardware(name, e))?;
        Ok(Backend::I2c(Mutex::new(sensor)))
    }

    #[cfg(not(feature = "gpio"))]
    fn hardware(name: &str, _wiring: EnvWiring) -> Result<Backend, DeviceError> {
        Err(super::hardware_unavailable(name))
    }
}

impl Device for EnvSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Sensor
    }
}

impl Sensor for EnvSensor {
    type Reading = EnvReading;

    fn get(&self) -> Result<EnvReading, DeviceError> {
        match &self.backend {
            Backend::Mock(reading) => Ok(*reading),
            #[cfg(feature = "gpio")]
            Backend::I2c(sensor) => sensor
                .lock()
                .map_err(|_| DeviceError::Poisoned(self.name.clone()))?
                .measure()
                .map_err(|e| DeviceError::hardware(&self.name, e)),
        }
    }
}
