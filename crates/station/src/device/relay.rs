//! Pump relay on a GPIO output. The hardware backend drives an rppal
//! `OutputPin`; the mock backend only tracks state and logs it.

use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "gpio")]
use std::sync::Mutex;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use super::{Actuator, Capability, Device, DriverMode};
use crate::error::DeviceError;
use crate::message::parse_switch_command;

enum Backend {
    Mock,
    #[cfg(feature = "gpio")]
    Gpio {
        pin: Mutex<OutputPin>,
        active_low: bool, // many relay boards are active-low
    },
}

pub struct Relay {
    name: String,
    pin: u8,
    on: AtomicBool,
    backend: Backend,
}

impl Relay {
    /// The relay starts OFF whatever the backend.
    pub fn new(name: &str, pin: u8, active_low: bool, mode: DriverMode) -> Result<Self, DeviceError> {
        let backend = match mode {
            DriverMode::Mock => {
                tracing::info!(device = name, pin, "[mock-gpio] relay registered (not wired)");
                Backend::Mock
            }
            DriverMode::Hardware => Self::hardware(name, pin, active_low)?,
        };
        Ok(Self {
            name: name.to_string(),
            pin,
            on: AtomicBool::new(false),
            backend,
        })
    }

    #[cfg(feature = "gpio")]
    fn hardware(name: &str, pin: u8, active_low: bool) -> Result<Backend, DeviceError> {
        let mut output = Gpio::new()
            .and_then(|gpio| gpio.get(pin))
            .map_err(|e| DeviceError::hardware(name, e))?
            .into_output();

        // Fail-safe: ensure "OFF" at startup
        if active_low {
            output.set_high();
        } else {
            output.set_low();
        }

        tracing::info!(device = name, pin, active_low, "relay initialised");
        Ok(Backend::Gpio {
            pin: Mutex::new(output),
            active_low,
        })
    }

    #[cfg(not(feature = "gpio"))]
    fn hardware(name: &str, _pin: u8, _active_low: bool) -> Result<Backend, DeviceError> {
        Err(super::hardware_unavailable(name))
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    pub fn set(&self, on: bool) -> Result<(), DeviceError> {
        match &self.backend {
            Backend::Mock => {
                tracing::info!(
                    device = %self.name,
                    "[mock-gpio] relay set {}",
                    if on { "ON" } else { "OFF" }
                );
            }
            #[cfg(feature = "gpio")]
            Backend::Gpio { pin, active_low } => {
                let mut pin = pin
                    .lock()
                    .map_err(|_| DeviceError::Poisoned(self.name.clone()))?;
                // active-low relay: LOW = ON, HIGH = OFF
                if on != *active_low {
                    pin.set_high();
                } else {
                    pin.set_low();
                }
                tracing::info!(device = %self.name, "relay set {}", if on { "ON" } else { "OFF" });
            }
        }
        self.on.store(on, Ordering::SeqCst);
        Ok(())
    }
}

impl Device for Relay {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Actuator
    }
}

impl Actuator for Relay {
    fn handle_message(&self, payload: &[u8]) -> Result<(), DeviceError> {
        let on = parse_switch_command(payload).map_err(|payload| DeviceError::InvalidCommand {
            device: self.name.clone(),
            payload,
        })?;
        self.set(on)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
