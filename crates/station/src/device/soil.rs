//! VH400 capacitive soil probe, read through the ADS1115.
//!
//! Readings are volumetric water content as a fraction (0.0 – ~0.6). In mock
//! mode the reading is the synthetic line's value verbatim.

use std::sync::Arc;
#[cfg(feature = "gpio")]
use std::sync::Mutex;

#[cfg(feature = "gpio")]
use super::adc::Ads1115;
use super::{Capability, Device, DriverMode, Sensor, SyntheticLine};
use crate::error::{DeviceError, EncodeError};

/// Piecewise VH400 transfer curve (Vegetronix), volts to VWC percent.
const VWC_CURVE: &[(f64, f64, f64)] = &[
    // (upper bound V, slope, intercept)
    (1.1, 10.0, -1.0),
    (1.3, 25.0, -17.5),
    (1.82, 48.08, -47.5),
    (2.2, 26.32, -7.89),
    (f64::INFINITY, 62.5, -87.5),
];

/// Volts to volumetric water content fraction.
pub fn volts_to_vwc(volts: f64) -> f64 {
    let (_, slope, intercept) = VWC_CURVE
        .iter()
        .copied()
        .find(|(upper, _, _)| volts < *upper)
        .unwrap_or((f64::INFINITY, 62.5, -87.5));
    ((slope * volts + intercept) / 100.0).max(0.0)
}

/// Fixed-precision decimal payload, e.g. `0.42` -> `" 0.42"`.
pub fn encode_moisture(value: &f64) -> Result<Vec<u8>, EncodeError> {
    if !value.is_finite() {
        return Err(EncodeError::NonFinite(*value));
    }
    Ok(format!("{value:5.2}").into_bytes())
}

enum Backend {
    Mock(Arc<SyntheticLine>),
    #[cfg(feature = "gpio")]
    Adc(Mutex<Ads1115>),
}

pub struct SoilSensor {
    name: String,
    backend: Backend,
}

/// Hardware wiring for the probe.
#[derive(Debug, Clone, Copy)]
pub struct SoilWiring {
    pub adc_address: u16,
    pub adc_channel: u8,
}

impl SoilSensor {
    /// `initial` seeds the synthetic value in mock mode; ignored otherwise.
    pub fn new(
        name: &str,
        wiring: SoilWiring,
        mode: DriverMode,
        initial: f64,
    ) -> Result<Self, DeviceError> {
        let backend = match mode {
            DriverMode::Mock => {
                tracing::info!(device = name, initial, "[mock] soil probe initialised");
                Backend::Mock(Arc::new(SyntheticLine::new(name, initial)))
            }
            DriverMode::Hardware => Self::hardware(name, wiring)?,
        };
        Ok(Self {
            name: name.to_string(),
            backend,
        })
    }

    #[cfg(feature = "gpio")]
    fn hardware(name: &str, wiring: SoilWiring) -> Result<Backend, DeviceError> {
        let adc = Ads1115::new(wiring.adc_address, wiring.adc_channel)
            .map_err(|e| DeviceError::hardware(name, e))?;
        Ok(Backend::Adc(Mutex::new(adc)))
    }

    #[cfg(not(feature = "gpio"))]
    fn hardware(name: &str, _wiring: SoilWiring) -> Result<Backend, DeviceError> {
        Err(super::hardware_unavailable(name))
    }
}

impl Device for SoilSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Sensor
    }

    fn synthetic(&self) -> Option<Arc<SyntheticLine>> {
        match &self.backend {
            Backend::Mock(line) => Some(Arc::clone(line)),
            #[cfg(feature = "gpio")]
            Backend::Adc(_) => None,
        }
    }
}

impl Sensor for SoilSensor {
    type Reading = f64;

    fn get(&self) -> Result<f64, DeviceError> {
        match &self.backend {
            Backend::Mock(line) => line.get(),
            #[cfg(feature = "gpio")]
            Backend::Adc(adc) => {
                let mut adc = adc
                    .lock()
                    .map_err(|_| DeviceError::Poisoned(self.name.clone()))?;
                let volts = adc
                    .read_volts()
                    .map_err(|e| DeviceError::hardware(&self.name, e))?;
                Ok(volts_to_vwc(volts))
            }
        }
    }
}
