//! Button edges to outbound messages.
//!
//! Each input's edge stream is drained by its own task. Every rising edge
//! publishes `<name>` on `d/<name>`, one message per edge, in the order the
//! hardware reported them. Falling edges are ignored.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::device::{Edge, Input};
use crate::error::DeviceError;
use crate::message::data_topic;
use crate::messenger::Bus;

/// Handle to a running edge subscription.
pub struct EdgeHandle {
    device: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl EdgeHandle {
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Cancel the subscription and wait for its task.
    pub async fn stop(self) {
        self.token.cancel();
        self.join().await;
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(device = %self.device, error = %e, "dispatcher panicked");
        }
    }
}

/// Subscribe to `input`'s edges and publish on every rising edge.
pub fn start_dispatch<I>(
    input: Arc<I>,
    bus: Arc<dyn Bus>,
    shutdown: &CancellationToken,
) -> Result<EdgeHandle, DeviceError>
where
    I: Input + ?Sized + 'static,
{
    let mut edges = input.edges()?;
    let device = input.name().to_string();
    let topic = data_topic(&device);
    let payload = device.clone().into_bytes();
    let token = shutdown.child_token();

    let task = {
        let device = device.clone();
        let token = token.clone();
        tokio::spawn(async move {
            info!(%device, %topic, "edge subscription active");
            loop {
                let edge = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    edge = edges.recv() => match edge {
                        Some(edge) => edge,
                        None => break,
                    },
                };

                if edge != Edge::Rising {
                    continue;
                }

                info!(button = %device, %topic, "button pressed");
                if let Err(e) = bus.publish(&topic, payload.clone()) {
                    warn!(%device, error = %e, "publish failed");
                }
            }
            drop(edges);
            if let Err(e) = input.unsubscribe() {
                warn!(%device, error = %e, "failed to unregister edge handler");
            }
            info!(%device, "edge subscription stopped");
        })
    };

    Ok(EdgeHandle {
        device,
        token,
        task,
    })
}
