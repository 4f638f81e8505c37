//! The station itself: builds every device, wires sensors to the bus and
//! commands to actuators, and brings it all down again on shutdown.
//!
//! ```text
//!  on/off buttons ──edges──▶ dispatcher ──▶ d/on, d/off ─┐
//!  env, soil      ──tick───▶ poller     ──▶ d/env, d/soil├─▶ Messenger ─▶ broker
//!                                                        │
//!  broker ─▶ Messenger event loop ─▶ router ─┬─ c/pump ─▶ relay
//!                                            └─ c/lcd  ─▶ display
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::device::env::encode_env;
use crate::device::soil::encode_moisture;
use crate::device::{Button, Device, Display, DriverMode, EnvSensor, Relay, SoilSensor};
use crate::dispatcher::{start_dispatch, EdgeHandle};
use crate::error::{DeviceError, InitError, InitFailure, StartError};
use crate::message::{DISPLAY_COMMAND, PUMP_COMMAND};
use crate::messenger::{Bus, Connection, Messenger};
use crate::poller::{start_polling, PollHandle};
use crate::registry::DeviceRegistry;
use crate::router::{CommandRouter, RouterHandle};
use crate::sim::{SimHandle, Simulator};
use crate::web::{DeviceInfo, StatusHandle};

pub const ON: &str = "on";
pub const OFF: &str = "off";
pub const PUMP: &str = "pump";
pub const ENV: &str = "env";
pub const DISPLAY: &str = "display";
pub const SOIL: &str = "soil";

/// Typed handles to the station's devices. The registry holds the same
/// `Arc`s as trait objects.
#[derive(Clone)]
pub struct Devices {
    pub on: Arc<Button>,
    pub off: Arc<Button>,
    pub pump: Arc<Relay>,
    pub env: Arc<EnvSensor>,
    pub display: Arc<Display>,
    pub soil: Arc<SoilSensor>,
}

pub struct Gardener {
    mode: DriverMode,
    started_at: OffsetDateTime,
    registry: DeviceRegistry,
    devices: Devices,

    shutdown: CancellationToken,
    stopped: AtomicBool,

    // Built at init, spawned by `start`.
    router: Option<CommandRouter>,
    started: bool,

    edges: Vec<EdgeHandle>,
    polls: Vec<PollHandle>,
    sims: Vec<SimHandle>,
    router_handle: Option<RouterHandle>,
    event_loop: Option<JoinHandle<()>>,
}

/// Keep a constructor's device or record why it failed.
fn built<T>(failures: &mut Vec<InitFailure>, result: Result<T, DeviceError>) -> Option<Arc<T>> {
    match result {
        Ok(device) => Some(Arc::new(device)),
        Err(e) => {
            error!(error = %e, "device init failed");
            failures.push(e.into());
            None
        }
    }
}

impl Gardener {
    /// Construct every device, then start polling, button dispatch and (in
    /// mock mode) the soil simulation. Construction failures are collected
    /// and reported together; nothing is started unless every device came
    /// up. Must run inside a tokio runtime.
    pub fn init(config: &Config, bus: Arc<dyn Bus>) -> Result<Self, InitError> {
        let mode = config.mode;
        let hw = &config.hardware;
        let mut failures: Vec<InitFailure> = Vec::new();

        info!(?mode, "initialising station");

        let on = built(&mut failures, Button::new(ON, hw.pins.on, mode));
        let off = built(&mut failures, Button::new(OFF, hw.pins.off, mode));
        let pump = built(
            &mut failures,
            Relay::new(PUMP, hw.pins.pump, hw.relay.active_low, mode),
        );
        let env = built(&mut failures, EnvSensor::new(ENV, hw.env.wiring(), mode));
        let display = built(
            &mut failures,
            Display::new(DISPLAY, hw.display.wiring(), mode).and_then(|d| {
                d.clear()?;
                Ok(d)
            }),
        );
        let soil = built(
            &mut failures,
            SoilSensor::new(SOIL, hw.soil.wiring(), mode, hw.simulation.start),
        );

        let (Some(on), Some(off), Some(pump), Some(env), Some(display), Some(soil)) =
            (on, off, pump, env, display, soil)
        else {
            return Err(InitError { failures });
        };
        let devices = Devices {
            on,
            off,
            pump,
            env,
            display,
            soil,
        };

        let mut registry = DeviceRegistry::new();
        let all: [Arc<dyn Device>; 6] = [
            devices.on.clone(),
            devices.off.clone(),
            devices.pump.clone(),
            devices.env.clone(),
            devices.display.clone(),
            devices.soil.clone(),
        ];
        for device in all {
            if let Err(e) = registry.add(device) {
                failures.push(e.into());
            }
        }
        if !failures.is_empty() {
            return Err(InitError { failures });
        }

        // Activities, in the same order as the devices.
        let shutdown = CancellationToken::new();
        let mut edges = Vec::new();
        let mut polls = Vec::new();
        let mut sims = Vec::new();
        let mut router = CommandRouter::new();

        for button in [&devices.on, &devices.off] {
            match start_dispatch(Arc::clone(button), Arc::clone(&bus), &shutdown) {
                Ok(handle) => edges.push(handle),
                Err(e) => failures.push(e.into()),
            }
        }

        if let Err(e) = router.add_route(PUMP_COMMAND, devices.pump.clone()) {
            failures.push(e.into());
        }

        match start_polling(
            Arc::clone(&devices.env),
            hw.env.interval(),
            encode_env,
            Arc::clone(&bus),
            &shutdown,
        ) {
            Ok(handle) => polls.push(handle),
            Err(e) => failures.push(e.into()),
        }

        if let Err(e) = router.add_route(DISPLAY_COMMAND, devices.display.clone()) {
            failures.push(e.into());
        }

        match start_polling(
            Arc::clone(&devices.soil),
            hw.soil.interval(),
            encode_moisture,
            Arc::clone(&bus),
            &shutdown,
        ) {
            Ok(handle) => polls.push(handle),
            Err(e) => failures.push(e.into()),
        }

        if mode == DriverMode::Mock {
            let simulator = Simulator::new();
            let started = registry.get(SOIL).map_err(InitFailure::from).and_then(|soil| {
                simulator
                    .start(soil, hw.simulation.interval(), hw.simulation.delta, &shutdown)
                    .map_err(InitFailure::from)
            });
            match started {
                Ok(handle) => sims.push(handle),
                Err(e) => failures.push(e),
            }
        }

        if !failures.is_empty() {
            // Whatever did start winds down on its own.
            shutdown.cancel();
            return Err(InitError { failures });
        }

        info!(devices = registry.len(), "station initialised");

        Ok(Self {
            mode,
            started_at: OffsetDateTime::now_utc(),
            registry,
            devices,
            shutdown,
            stopped: AtomicBool::new(false),
            router: Some(router),
            started: false,
            edges,
            polls,
            sims,
            router_handle: None,
            event_loop: None,
        })
    }

    /// Connect to the broker, start routing commands and subscribe to every
    /// routed topic. A failed connection is fatal; calling this twice is an
    /// error.
    pub async fn start(
        &mut self,
        messenger: &Messenger,
        mut connection: Connection,
        connect_timeout: Duration,
    ) -> Result<(), StartError> {
        if self.started {
            return Err(StartError::AlreadyStarted);
        }
        self.started = true;
        if self.shutdown.is_cancelled() {
            return Err(StartError::Stopped);
        }
        let router = self.router.take().ok_or(StartError::AlreadyStarted)?;

        connection.connect(connect_timeout).await?;

        let topics = router.topics();
        let handle = router.spawn(&self.shutdown);
        let sender = handle.sender();
        // Stored before subscribing so `join` waits for the lanes either way.
        self.router_handle = Some(handle);
        for topic in &topics {
            messenger.subscribe(topic).await?;
            info!(%topic, "subscribed");
        }

        self.event_loop = Some(tokio::spawn(connection.run(
            sender,
            topics,
            self.shutdown.child_token(),
        )));

        info!("station started");
        Ok(())
    }

    /// Signal every activity to stop. Only the first call does anything; it
    /// returns whether this call delivered the signal. Does not wait; see
    /// [`Gardener::join`].
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("shutdown requested");
        self.shutdown.cancel();
        true
    }

    /// Wait for every activity to finish. Only returns after [`Gardener::stop`].
    pub async fn join(self) {
        for handle in self.edges {
            handle.join().await;
        }
        for handle in self.polls {
            handle.join().await;
        }
        for handle in self.sims {
            handle.join().await;
        }
        if let Some(handle) = self.router_handle {
            handle.join().await;
        }
        if let Some(task) = self.event_loop {
            if let Err(e) = task.await {
                error!(error = %e, "mqtt event loop panicked");
            }
        }
        info!("station stopped");
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn devices(&self) -> &Devices {
        &self.devices
    }

    /// Snapshot for the status server.
    pub fn status(&self, station: &str, connected: Arc<AtomicBool>) -> StatusHandle {
        StatusHandle {
            station: station.to_string(),
            mock: self.mode == DriverMode::Mock,
            started_at: self.started_at,
            devices: self
                .registry
                .iter()
                .map(|d| DeviceInfo {
                    name: d.name().to_string(),
                    capability: d.capability(),
                })
                .collect(),
            connected,
        }
    }

    /// A token that fires once [`Gardener::stop`] has been called.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Capability;
    use crate::error::BusError;
    use crate::message::Message;
    use crate::messenger::MqttSettings;
    use crate::router::Delivery;
    use crate::testing::{acking_broker, settle, RecordingBus};
    use tokio::time::sleep;

    /// Soil every 7s, env every 10s, drift every 5s: soil ticks never
    /// coincide with a drift tick in the first 30 seconds.
    fn mock_config() -> Config {
        let mut config = Config::mock();
        config.hardware.soil.interval_secs = 7;
        config.hardware.env.interval_secs = 10;
        config.hardware.simulation.interval_secs = 5;
        config
    }

    #[tokio::test]
    async fn init_registers_devices_in_order() {
        let bus = RecordingBus::new();
        let gardener = Gardener::init(&mock_config(), bus).unwrap();

        let names: Vec<&str> = gardener.registry().iter().map(|d| d.name()).collect();
        assert_eq!(names, ["on", "off", "pump", "env", "display", "soil"]);
        assert_eq!(
            gardener.registry().get("display").unwrap().capability(),
            Capability::Display
        );
        assert_eq!(gardener.devices().pump.pin(), 5);
        assert!(!gardener.devices().pump.is_on());
        assert_eq!(gardener.devices().display.lines(), Some(vec![]));

        gardener.stop();
        gardener.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sensors_publish_on_their_intervals() {
        let bus = RecordingBus::new();
        let gardener = Gardener::init(&mock_config(), bus.clone()).unwrap();

        sleep(Duration::from_millis(14_500)).await;

        // Drift ticks at 5s and 10s land before the soil reads at 7s and 14s.
        assert_eq!(bus.on_topic("d/soil"), vec![b" 0.27".to_vec(), b" 0.29".to_vec()]);
        let env = bus.on_topic("d/env");
        assert_eq!(env.len(), 1);
        let json: serde_json::Value = serde_json::from_slice(&env[0]).unwrap();
        assert_eq!(json["temperature"], 21.0);
        assert_eq!(json["pressure"], 1013.25);

        gardener.stop();
        gardener.join().await;
    }

    #[tokio::test]
    async fn button_press_publishes_its_name() {
        let bus = RecordingBus::new();
        let gardener = Gardener::init(&mock_config(), bus.clone()).unwrap();

        gardener.devices().on.press().unwrap();
        gardener.devices().off.press().unwrap();
        gardener.devices().on.press().unwrap();
        settle().await;

        assert_eq!(bus.on_topic("d/on"), vec![b"on".to_vec(), b"on".to_vec()]);
        assert_eq!(bus.on_topic("d/off"), vec![b"off".to_vec()]);

        gardener.stop();
        gardener.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_published_after_stop() {
        let bus = RecordingBus::new();
        let gardener = Gardener::init(&mock_config(), bus.clone()).unwrap();
        let soil = gardener.devices().soil.synthetic().unwrap();
        let on = Arc::clone(&gardener.devices().on);

        sleep(Duration::from_millis(10_500)).await;
        assert!(gardener.stop());
        assert!(!gardener.stop());
        gardener.join().await;

        let published = bus.messages().len();
        let value = soil.get().unwrap();
        on.press().unwrap();
        sleep(Duration::from_secs(60)).await;

        assert_eq!(bus.messages().len(), published);
        assert_eq!(soil.get().unwrap(), value);
    }

    #[tokio::test]
    async fn commands_reach_their_own_actuator() {
        let mut gardener = Gardener::init(&mock_config(), RecordingBus::new()).unwrap();
        let router = gardener.router.take().unwrap();
        assert_eq!(router.topics(), ["c/lcd", "c/pump"]);
        let handle = router.spawn(&gardener.shutdown);

        assert_eq!(handle.deliver(Message::new("c/pump", b"on".to_vec())), Delivery::Routed);
        assert_eq!(handle.deliver(Message::new("c/lcd", b"hi".to_vec())), Delivery::Routed);
        settle().await;

        assert!(gardener.devices().pump.is_on());
        assert_eq!(gardener.devices().display.lines(), Some(vec!["hi".to_string()]));

        assert_eq!(
            handle.deliver(Message::new("c/valve", b"off".to_vec())),
            Delivery::UnknownTopic
        );
        settle().await;
        assert!(gardener.devices().pump.is_on());
        assert_eq!(gardener.devices().display.lines(), Some(vec!["hi".to_string()]));

        gardener.stop();
        handle.join().await;
        gardener.join().await;
    }

    #[tokio::test]
    async fn router_lanes_joined_when_subscribe_fails() {
        let mut gardener = Gardener::init(&mock_config(), RecordingBus::new()).unwrap();
        let pump = Arc::clone(&gardener.devices().pump);
        let (port, broker) = acking_broker().await;
        let settings = MqttSettings {
            host: "127.0.0.1".into(),
            port,
            client_id: "test-station".into(),
            username: None,
            password: None,
        };

        // The first client's event loop is gone, so its subscribes fail once
        // the second one has connected.
        let (dead, _) = Messenger::new(&settings);
        let (_, connection) = Messenger::new(&settings);
        let result = gardener
            .start(&dead, connection, Duration::from_secs(5))
            .await;
        assert!(
            matches!(result, Err(StartError::Bus(BusError::Subscribe { .. }))),
            "{result:?}"
        );
        assert!(gardener.router_handle.is_some());

        gardener.stop();
        gardener.join().await;
        // Every lane has exited and released its actuator.
        assert_eq!(Arc::strong_count(&pump), 1);
        broker.abort();
    }

    #[tokio::test]
    async fn stop_is_idempotent_across_tasks() {
        let gardener = Arc::new(Gardener::init(&mock_config(), RecordingBus::new()).unwrap());
        let delivered: Vec<bool> = stop_concurrently(&gardener).await;
        assert_eq!(delivered.iter().filter(|d| **d).count(), 1);
        assert!(gardener.shutdown_token().is_cancelled());
    }

    async fn stop_concurrently(gardener: &Arc<Gardener>) -> Vec<bool> {
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let g = Arc::clone(gardener);
                tokio::spawn(async move { g.stop() })
            })
            .collect();
        let mut out = Vec::new();
        for task in tasks {
            out.push(task.await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let mut gardener = Gardener::init(&mock_config(), RecordingBus::new()).unwrap();
        let settings = MqttSettings {
            host: "127.0.0.1".into(),
            port: 9,
            client_id: "test-station".into(),
            username: None,
            password: None,
        };

        let (messenger, connection) = Messenger::new(&settings);
        let first = gardener
            .start(&messenger, connection, Duration::from_millis(200))
            .await;
        assert!(matches!(first, Err(StartError::Bus(_))), "{first:?}");

        let (messenger, connection) = Messenger::new(&settings);
        let second = gardener
            .start(&messenger, connection, Duration::from_millis(200))
            .await;
        assert!(matches!(second, Err(StartError::AlreadyStarted)));

        gardener.stop();
        gardener.join().await;
    }

    #[cfg(not(feature = "gpio"))]
    #[tokio::test]
    async fn hardware_mode_without_gpio_reports_every_device() {
        let mut config = mock_config();
        config.mode = DriverMode::Hardware;

        let err = Gardener::init(&config, RecordingBus::new()).err().unwrap();
        assert_eq!(err.failures.len(), 6);
        let text = err.to_string();
        assert!(text.starts_with("station init failed (6 errors)"), "{text}");
        for name in ["on", "off", "pump", "env", "display", "soil"] {
            assert!(text.contains(&format!("\n  - {name}: ")), "{name} missing: {text}");
        }
    }
}
