//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::{Actuator, Capability, Device, Edge, Input, Sensor};
use crate::error::{BusError, DeviceError};
use crate::message::Message;
use crate::messenger::Bus;

/// Give spawned tasks and blocking-pool work time to run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Minimal broker: accepts one client, answers its CONNECT with a CONNACK
/// and then ignores everything it sends.
pub async fn acking_broker() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 512];
        let mut acked = false;
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) if !acked => {
                    socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
                    acked = true;
                }
                Ok(_) => {}
            }
        }
    });
    (port, task)
}

/// Bus that records every publish.
#[derive(Default)]
pub struct RecordingBus {
    messages: Mutex<Vec<Message>>,
    fail: bool,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A bus whose publishes always fail (and are still recorded).
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Vec<u8>> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload)
            .collect()
    }
}

impl Bus for RecordingBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.messages
            .lock()
            .unwrap()
            .push(Message::new(topic, payload));
        if self.fail {
            return Err(BusError::Publish {
                topic: topic.to_string(),
                details: "broker unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Actuator that records payloads, optionally failing every call.
pub struct RecordingActuator {
    name: String,
    payloads: Mutex<Vec<Vec<u8>>>,
    fail: bool,
}

impl RecordingActuator {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            payloads: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            payloads: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

impl Device for RecordingActuator {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Actuator
    }
}

impl Actuator for RecordingActuator {
    fn handle_message(&self, payload: &[u8]) -> Result<(), DeviceError> {
        self.payloads.lock().unwrap().push(payload.to_vec());
        if self.fail {
            return Err(DeviceError::hardware(&self.name, "relay stuck"));
        }
        Ok(())
    }
}

/// Sensor returning a fixed value, or always failing, and counting reads.
pub struct ScriptedSensor {
    name: String,
    value: Option<f64>,
    reads: AtomicUsize,
}

impl ScriptedSensor {
    pub fn fixed(name: &str, value: f64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            value: Some(value),
            reads: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            value: None,
            reads: AtomicUsize::new(0),
        })
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Device for ScriptedSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Sensor
    }
}

impl Sensor for ScriptedSensor {
    type Reading = f64;

    fn get(&self) -> Result<f64, DeviceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.value
            .ok_or_else(|| DeviceError::hardware(&self.name, "i2c nack"))
    }
}

/// Input that never produces edges and counts unsubscribes.
pub struct ScriptedInput {
    name: String,
    subscriber: Mutex<Option<mpsc::UnboundedSender<Edge>>>,
    unsubscribes: AtomicUsize,
}

impl ScriptedInput {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            subscriber: Mutex::new(None),
            unsubscribes: AtomicUsize::new(0),
        })
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

impl Device for ScriptedInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Input
    }
}

impl Input for ScriptedInput {
    fn edges(&self) -> Result<mpsc::UnboundedReceiver<Edge>, DeviceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn unsubscribe(&self) -> Result<(), DeviceError> {
        self.subscriber.lock().unwrap().take();
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
