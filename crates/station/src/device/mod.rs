//! Device contracts and the station's drivers.
//!
//! Every driver carries two backends: a mock one, always compiled, and a
//! hardware one behind the `gpio` feature (rppal on a Raspberry Pi). Which
//! one a driver uses is decided at construction by [`DriverMode`].

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::DeviceError;

pub mod adc;
pub mod button;
pub mod display;
pub mod env;
pub mod relay;
pub mod soil;

#[cfg(feature = "gpio")]
mod bme280;
#[cfg(feature = "gpio")]
mod lcd;

pub use button::Button;
pub use display::Display;
pub use env::{EnvReading, EnvSensor};
pub use relay::Relay;
pub use soil::SoilSensor;

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Sensor,
    Actuator,
    Display,
    Input,
}

/// Anything the registry can hold.
pub trait Device: Send + Sync {
    /// Unique logical name, e.g. `"soil"`.
    fn name(&self) -> &str;

    fn capability(&self) -> Capability;

    /// The synthetic signal behind a mock sensor, if any.
    fn synthetic(&self) -> Option<Arc<SyntheticLine>> {
        None
    }
}

/// A device that can be sampled.
pub trait Sensor: Device {
    type Reading: Send + 'static;

    /// Take one reading. May block on bus I/O; callers run it off the async
    /// workers.
    fn get(&self) -> Result<Self::Reading, DeviceError>;
}

/// A device driven by inbound message payloads.
pub trait Actuator: Device {
    fn handle_message(&self, payload: &[u8]) -> Result<(), DeviceError>;
}

/// An edge-notifying input.
pub trait Input: Device {
    /// Subscribe to this input's edges, in the order the hardware reports
    /// them. A new subscription replaces the previous one.
    fn edges(&self) -> Result<mpsc::UnboundedReceiver<Edge>, DeviceError>;

    /// Stop reporting edges. No-op when nothing is subscribed.
    fn unsubscribe(&self) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Whether drivers talk to real hardware or to in-memory stand-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMode {
    Mock,
    Hardware,
}

#[cfg(not(feature = "gpio"))]
pub(crate) fn hardware_unavailable(device: &str) -> DeviceError {
    DeviceError::Unsupported {
        device: device.to_string(),
        details: "built without the `gpio` feature; run with --mock".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Synthetic signal
// ---------------------------------------------------------------------------

/// The value a mock sensor reports. The simulation driver nudges it.
#[derive(Debug)]
pub struct SyntheticLine {
    device: String,
    value: Mutex<f64>,
}

impl SyntheticLine {
    pub fn new(device: &str, initial: f64) -> Self {
        Self {
            device: device.to_string(),
            value: Mutex::new(initial),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn get(&self) -> Result<f64, DeviceError> {
        self.value
            .lock()
            .map(|v| *v)
            .map_err(|_| DeviceError::Poisoned(self.device.clone()))
    }

    pub fn set(&self, value: f64) -> Result<(), DeviceError> {
        let mut guard = self
            .value
            .lock()
            .map_err(|_| DeviceError::Poisoned(self.device.clone()))?;
        *guard = value;
        Ok(())
    }
}
