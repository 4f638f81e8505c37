//! Error types shared across the station.
//!
//! Fatal-at-init failures (`InitError`, `BusError::Connect*`) abort startup.
//! Everything else is per-cycle: logged by the owning activity, never
//! propagated past it.

use std::fmt;

use thiserror::Error;

/// Misuse of the device registry. These are programming errors and surface
/// during construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("device '{0}' is already registered")]
    DuplicateName(String),
    #[error("device '{0}' is not registered")]
    NotFound(String),
}

/// Failure reported by a device driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("{device}: hardware fault: {details}")]
    Hardware { device: String, details: String },
    #[error("{device}: invalid command '{payload}'")]
    InvalidCommand { device: String, payload: String },
    #[error("{device}: {details}")]
    Unsupported { device: String, details: String },
    #[error("{0}: driver state poisoned")]
    Poisoned(String),
}

impl DeviceError {
    pub fn hardware(device: &str, details: impl fmt::Display) -> Self {
        Self::Hardware {
            device: device.to_string(),
            details: details.to_string(),
        }
    }
}

/// A reading could not be turned into a payload.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("reading {0} is not a finite number")]
    NonFinite(f64),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message bus failures.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish to {topic} failed: {details}")]
    Publish { topic: String, details: String },
    #[error("subscribe to {topic} failed: {details}")]
    Subscribe { topic: String, details: String },
    #[error("broker connection failed: {0}")]
    Connect(String),
    #[error("broker did not acknowledge the connection within {0:?}")]
    ConnectTimeout(std::time::Duration),
    #[error("broker refused the connection: {0}")]
    Refused(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("topic '{0}' already has a handler")]
    DuplicateTopic(String),
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    #[error("a simulation is already running for '{0}'")]
    AlreadyRunning(String),
    #[error("device '{0}' has no synthetic signal to drive")]
    NotSynthetic(String),
    #[error("simulation interval for '{0}' must be greater than zero")]
    ZeroInterval(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("polling interval for '{0}' must be greater than zero")]
    ZeroInterval(String),
}

/// Why [`crate::gardener::Gardener::start`] gave up.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("station already started")]
    AlreadyStarted,
    #[error("station is shutting down")]
    Stopped,
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Every failure collected while bringing the station up. Reported once.
#[derive(Debug, Error)]
#[error("{}", render_failures(.failures))]
pub struct InitError {
    pub failures: Vec<InitFailure>,
}

#[derive(Debug, Error)]
pub enum InitFailure {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Poll(#[from] PollError),
}

fn render_failures(failures: &[InitFailure]) -> String {
    let mut out = format!(
        "station init failed ({} error{})",
        failures.len(),
        if failures.len() == 1 { "" } else { "s" },
    );
    for failure in failures {
        out.push_str(&format!("\n  - {failure}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_error_lists_every_failure() {
        let err = InitError {
            failures: vec![
                DeviceError::hardware("env", "no ack at 0x76").into(),
                RegistryError::DuplicateName("on".into()).into(),
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("station init failed (2 errors)"), "{text}");
        assert!(text.contains("env: hardware fault: no ack at 0x76"), "{text}");
        assert!(text.contains("device 'on' is already registered"), "{text}");
    }

    #[test]
    fn init_error_singular() {
        let err = InitError {
            failures: vec![DeviceError::Poisoned("soil".into()).into()],
        };
        assert!(err.to_string().starts_with("station init failed (1 error)"));
    }
}
