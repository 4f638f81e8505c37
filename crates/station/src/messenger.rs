//! MQTT plumbing. [`Messenger`] is the cloneable publishing/subscribing half
//! (wraps `rumqttc::AsyncClient`); [`Connection`] owns the event loop and feeds
//! inbound publishes to the command router.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::BusError;
use crate::message::Message;
use crate::router::RouterSender;

/// Back-off between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Capacity of the client request queue.
const REQUEST_CAPACITY: usize = 64;

/// Anything the station can publish through. Publishing never waits for the
/// broker: delivery is fire-and-forget and implementations must be safe to
/// call from many activities at once.
pub trait Bus: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Broker settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone)]
pub struct Messenger {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

pub struct Connection {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
}

impl Messenger {
    /// Build the client and its event loop. No network I/O happens until the
    /// connection is polled.
    pub fn new(settings: &MqttSettings) -> (Self, Connection) {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some(username) = settings.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, settings.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        (
            Self {
                client: client.clone(),
                connected: Arc::clone(&connected),
            },
            Connection {
                client,
                eventloop,
                connected,
            },
        )
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::Subscribe {
                topic: topic.to_string(),
                details: e.to_string(),
            })
    }

    /// Shared flag the status server reads.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }
}

impl Bus for Messenger {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                details: e.to_string(),
            })
    }
}

impl Connection {
    /// Poll the event loop until the broker acknowledges the connection.
    pub async fn connect(&mut self, within: Duration) -> Result<(), BusError> {
        let deadline = Instant::now() + within;
        loop {
            let event = timeout(deadline.saturating_duration_since(Instant::now()), self.eventloop.poll())
                .await
                .map_err(|_| BusError::ConnectTimeout(within))?
                .map_err(|e| BusError::Connect(e.to_string()))?;

            if let Event::Incoming(Packet::ConnAck(ack)) = event {
                if ack.code != ConnectReturnCode::Success {
                    return Err(BusError::Refused(format!("{:?}", ack.code)));
                }
                self.connected.store(true, Ordering::SeqCst);
                info!("mqtt connected");
                return Ok(());
            }
        }
    }

    /// Drive the event loop until shutdown: hand every inbound publish to the
    /// router, re-subscribe `topics` after each reconnect, and retry
    /// connection errors.
    pub async fn run(
        mut self,
        router: RouterSender,
        topics: Vec<String>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let msg = Message::new(p.topic.clone(), p.payload.to_vec());
                    debug!(topic = %msg.topic, payload = %msg.payload_lossy(), "mqtt message");
                    router.deliver(msg);
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    self.connected.store(true, Ordering::SeqCst);
                    info!(session_present = ack.session_present, "mqtt reconnected");
                    if !ack.session_present {
                        for topic in &topics {
                            if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                                error!(%topic, error = %e, "re-subscribe failed");
                            }
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    warn!("mqtt disconnected by broker");
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    warn!(error = %e, "mqtt error, reconnecting");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "mqtt disconnect request not queued");
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("mqtt event loop stopped");
    }
}
