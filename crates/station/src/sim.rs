//! Drift for mock sensors.
//!
//! In mock mode nothing moves the synthetic soil signal on its own, so a
//! simulation task nudges it by a fixed step on every tick. At most one
//! simulation runs per device.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::{Device, SyntheticLine};
use crate::error::SimulationError;

#[derive(Default, Clone)]
pub struct Simulator {
    running: Arc<Mutex<HashSet<String>>>,
}

/// Handle to a running simulation.
pub struct SimHandle {
    device: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SimHandle {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub async fn stop(self) {
        self.token.cancel();
        self.join().await;
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(device = %self.device, error = %e, "simulation panicked");
        }
    }
}

/// Releases the device claim when the simulation task ends, however it ends.
struct Claim {
    running: Arc<Mutex<HashSet<String>>>,
    device: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        match self.running.lock() {
            Ok(mut running) => {
                running.remove(&self.device);
            }
            Err(_) => warn!(device = %self.device, "simulation registry poisoned"),
        }
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, device: &str) -> bool {
        self.running
            .lock()
            .map(|running| running.contains(device))
            .unwrap_or(false)
    }

    /// Add `delta` to `device`'s synthetic value every `interval` until
    /// `shutdown` fires. `interval` must be non-zero.
    pub fn start(
        &self,
        device: &Arc<dyn Device>,
        interval: Duration,
        delta: f64,
        shutdown: &CancellationToken,
    ) -> Result<SimHandle, SimulationError> {
        let name = device.name().to_string();
        if interval.is_zero() {
            return Err(SimulationError::ZeroInterval(name));
        }
        let line = device
            .synthetic()
            .ok_or_else(|| SimulationError::NotSynthetic(name.clone()))?;

        let claim = {
            let mut running = self
                .running
                .lock()
                .map_err(|_| SimulationError::AlreadyRunning(name.clone()))?;
            if !running.insert(name.clone()) {
                return Err(SimulationError::AlreadyRunning(name));
            }
            Claim {
                running: Arc::clone(&self.running),
                device: name.clone(),
            }
        };

        let token = shutdown.child_token();
        let task = tokio::spawn(drift(line, interval, delta, token.clone(), claim));
        Ok(SimHandle {
            device: name,
            token,
            task,
        })
    }
}

async fn drift(
    line: Arc<SyntheticLine>,
    interval: Duration,
    delta: f64,
    shutdown: CancellationToken,
    _claim: Claim,
) {
    let device = line.device().to_string();
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(%device, interval_ms = interval.as_millis() as u64, delta, "[mock] simulation started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let value = match line.get() {
            Ok(v) => v,
            Err(e) => {
                error!(%device, error = %e, "[mock] simulation read failed");
                continue;
            }
        };
        let next = value + delta;
        match line.set(next) {
            Ok(()) => debug!(%device, value = next, "[mock] drift"),
            Err(e) => error!(%device, error = %e, "[mock] simulation write failed"),
        }
    }

    info!(%device, "[mock] simulation stopped");
}
