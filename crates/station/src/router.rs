//! Inbound command routing.
//!
//! Each topic maps to exactly one actuator. Once spawned, every route gets its
//! own lane (channel + task): messages on one topic are handled in arrival
//! order, different topics never wait on each other, and a failing actuator
//! only costs the message that triggered it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::device::Actuator;
use crate::error::RouteError;
use crate::message::Message;

#[derive(Default)]
pub struct CommandRouter {
    routes: HashMap<String, Arc<dyn Actuator>>,
}

/// Outcome of handing a message to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Routed,
    UnknownTopic,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(
        &mut self,
        topic: &str,
        actuator: Arc<dyn Actuator>,
    ) -> Result<(), RouteError> {
        if self.routes.contains_key(topic) {
            return Err(RouteError::DuplicateTopic(topic.to_string()));
        }
        self.routes.insert(topic.to_string(), actuator);
        Ok(())
    }

    pub fn route(&self, topic: &str) -> Result<&Arc<dyn Actuator>, RouteError> {
        self.routes
            .get(topic)
            .ok_or_else(|| RouteError::UnknownTopic(topic.to_string()))
    }

    /// Routed topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Start one lane per route. Lanes stop when `shutdown` fires; a message
    /// already being handled finishes, queued ones are dropped.
    pub fn spawn(self, shutdown: &CancellationToken) -> RouterHandle {
        let mut lanes = HashMap::new();
        let mut tasks = Vec::new();

        for (topic, actuator) in self.routes {
            let (tx, rx) = mpsc::unbounded_channel();
            tasks.push(tokio::spawn(run_lane(
                topic.clone(),
                actuator,
                rx,
                shutdown.child_token(),
            )));
            lanes.insert(topic, tx);
        }

        RouterHandle {
            sender: RouterSender { lanes },
            tasks,
        }
    }
}

pub struct RouterHandle {
    sender: RouterSender,
    tasks: Vec<JoinHandle<()>>,
}

impl RouterHandle {
    /// Queue `msg` on its topic's lane. Never blocks.
    pub fn deliver(&self, msg: Message) -> Delivery {
        self.sender.deliver(msg)
    }

    /// A cloneable handle that can only deliver, for the messenger's event
    /// loop.
    pub fn sender(&self) -> RouterSender {
        self.sender.clone()
    }

    /// Wait for every lane to exit.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "router lane panicked");
            }
        }
    }
}

/// Delivery-only view of a spawned router.
#[derive(Clone)]
pub struct RouterSender {
    lanes: HashMap<String, mpsc::UnboundedSender<Message>>,
}

impl RouterSender {
    pub fn deliver(&self, msg: Message) -> Delivery {
        match self.lanes.get(&msg.topic) {
            Some(lane) => {
                // A closed lane means shutdown is under way; the message is
                // dropped with it.
                let _ = lane.send(msg);
                Delivery::Routed
            }
            None => {
                warn!(topic = %msg.topic, payload = %msg.payload_lossy(), "unknown topic");
                Delivery::UnknownTopic
            }
        }
    }
}

async fn run_lane(
    topic: String,
    actuator: Arc<dyn Actuator>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    shutdown: CancellationToken,
) {
    info!(%topic, device = actuator.name(), "route active");
    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        info!(%topic, device = actuator.name(), payload = %msg.payload_lossy(), "command");
        let target = Arc::clone(&actuator);
        let result = tokio::task::spawn_blocking(move || target.handle_message(&msg.payload)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(%topic, device = actuator.name(), error = %e, "command failed");
            }
            Err(e) => {
                error!(%topic, device = actuator.name(), error = %e, "command handler panicked");
            }
        }
    }
    info!(%topic, "route stopped");
}
