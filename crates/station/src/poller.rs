//! Periodic sensor sampling.
//!
//! One task per sensor: wait for the tick, read on the blocking pool, encode,
//! publish to `d/<name>`. A failed read, encode or publish is logged and the
//! cycle skipped; the timer keeps going. Cycles never overlap, and ticks
//! missed while a cycle ran late are delayed rather than bunched up.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::Sensor;
use crate::error::{EncodeError, PollError};
use crate::message::data_topic;
use crate::messenger::Bus;

/// Turns a reading into a payload.
pub type Encoder<R> = fn(&R) -> Result<Vec<u8>, EncodeError>;

/// Handle to a running polling job.
pub struct PollHandle {
    device: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Cancel and wait for the task. Once this returns no further reads
    /// happen; a read already in progress is allowed to finish.
    pub async fn stop(self) {
        self.token.cancel();
        self.join().await;
    }

    /// Wait for the task to exit on its own (after the shutdown signal).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(device = %self.device, error = %e, "poller panicked");
        }
    }
}

/// Start polling `sensor` every `every`. The first read happens one period
/// after the call. A zero period is rejected.
pub fn start_polling<S>(
    sensor: Arc<S>,
    every: Duration,
    encode: Encoder<S::Reading>,
    bus: Arc<dyn Bus>,
    shutdown: &CancellationToken,
) -> Result<PollHandle, PollError>
where
    S: Sensor + 'static,
{
    let device = sensor.name().to_string();
    if every.is_zero() {
        return Err(PollError::ZeroInterval(device));
    }
    let token = shutdown.child_token();
    let task = tokio::spawn(run(sensor, every, encode, bus, token.clone()));
    Ok(PollHandle {
        device,
        token,
        task,
    })
}

async fn run<S>(
    sensor: Arc<S>,
    every: Duration,
    encode: Encoder<S::Reading>,
    bus: Arc<dyn Bus>,
    shutdown: CancellationToken,
) where
    S: Sensor + 'static,
{
    let device = sensor.name().to_string();
    let topic = data_topic(&device);
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(%device, %topic, interval_ms = every.as_millis() as u64, "polling started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let reader = Arc::clone(&sensor);
        let reading = match tokio::task::spawn_blocking(move || reader.get()).await {
            Ok(Ok(reading)) => reading,
            Ok(Err(e)) => {
                error!(%device, error = %e, "sensor read failed");
                continue;
            }
            Err(e) => {
                error!(%device, error = %e, "sensor read panicked");
                continue;
            }
        };

        let payload = match encode(&reading) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%device, error = %e, "sensor reading not encodable");
                continue;
            }
        };

        // The read may have straddled the shutdown signal.
        if shutdown.is_cancelled() {
            break;
        }

        debug!(%device, %topic, payload = %String::from_utf8_lossy(&payload), "publishing reading");
        if let Err(e) = bus.publish(&topic, payload) {
            warn!(%device, error = %e, "publish failed");
        }
    }

    info!(%device, "polling stopped");
}

// ===========================================================================
// Tests
// ===========================================================================
