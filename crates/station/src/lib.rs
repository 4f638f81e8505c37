//! Event-driven controller for a garden irrigation station.
//!
//! Sensors are polled on a schedule and buttons watched for presses; both
//! end up as MQTT messages under `d/`. Commands arriving under `c/` drive the
//! pump relay and the character display. [`gardener::Gardener`] owns the
//! whole lifecycle.

pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod gardener;
pub mod logging;
pub mod message;
pub mod messenger;
pub mod poller;
pub mod registry;
pub mod router;
pub mod sim;
#[cfg(test)]
mod testing;
pub mod web;
