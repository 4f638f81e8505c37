//! Momentary push button on a GPIO input.
//!
//! The hardware backend registers an rppal interrupt for both edges; the
//! callback only does a non-blocking channel send. The mock backend lets the
//! caller inject edges.

use std::sync::Mutex;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin, Level, Trigger};
use tokio::sync::mpsc;

use super::{Capability, Device, DriverMode, Edge, Input};
use crate::error::DeviceError;

enum Backend {
    Mock(Mutex<Option<mpsc::UnboundedSender<Edge>>>),
    #[cfg(feature = "gpio")]
    Gpio(Mutex<InputPin>),
}

pub struct Button {
    name: String,
    pin: u8,
    backend: Backend,
}

impl Button {
    pub fn new(name: &str, pin: u8, mode: DriverMode) -> Result<Self, DeviceError> {
        let backend = match mode {
            DriverMode::Mock => {
                tracing::info!(device = name, pin, "[mock-gpio] button registered (not wired)");
                Backend::Mock(Mutex::new(None))
            }
            DriverMode::Hardware => Self::hardware(name, pin)?,
        };
        Ok(Self {
            name: name.to_string(),
            pin,
            backend,
        })
    }

    #[cfg(feature = "gpio")]
    fn hardware(name: &str, pin: u8) -> Result<Backend, DeviceError> {
        let input = Gpio::new()
            .and_then(|gpio| gpio.get(pin))
            .map_err(|e| DeviceError::hardware(name, e))?
            .into_input_pulldown();
        tracing::info!(device = name, pin, "button initialised");
        Ok(Backend::Gpio(Mutex::new(input)))
    }

    #[cfg(not(feature = "gpio"))]
    fn hardware(name: &str, _pin: u8) -> Result<Backend, DeviceError> {
        Err(super::hardware_unavailable(name))
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Feed an edge to a mock button as if the hardware reported it.
    /// Edges with no subscriber are dropped.
    pub fn inject(&self, edge: Edge) -> Result<(), DeviceError> {
        match &self.backend {
            Backend::Mock(tx) => {
                let tx = tx
                    .lock()
                    .map_err(|_| DeviceError::Poisoned(self.name.clone()))?;
                if let Some(tx) = tx.as_ref() {
                    let _ = tx.send(edge);
                }
                Ok(())
            }
            #[cfg(feature = "gpio")]
            Backend::Gpio(_) => Err(DeviceError::Unsupported {
                device: self.name.clone(),
                details: "edges come from the pin on real hardware".to_string(),
            }),
        }
    }

    /// One full press: rising then falling edge.
    pub fn press(&self) -> Result<(), DeviceError> {
        self.inject(Edge::Rising)?;
        self.inject(Edge::Falling)
    }
}

impl Device for Button {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Input
    }
}

impl Input for Button {
    fn edges(&self) -> Result<mpsc::UnboundedReceiver<Edge>, DeviceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        match &self.backend {
            Backend::Mock(slot) => {
                *slot
                    .lock()
                    .map_err(|_| DeviceError::Poisoned(self.name.clone()))? = Some(tx);
            }
            #[cfg(feature = "gpio")]
            Backend::Gpio(pin) => {
                let mut pin = pin
                    .lock()
                    .map_err(|_| DeviceError::Poisoned(self.name.clone()))?;
                pin.set_async_interrupt(Trigger::Both, move |level| {
                    let edge = match level {
                        Level::High => Edge::Rising,
                        Level::Low => Edge::Falling,
                    };
                    let _ = tx.send(edge);
                })
                .map_err(|e| DeviceError::hardware(&self.name, e))?;
            }
        }
        Ok(rx)
    }

    fn unsubscribe(&self) -> Result<(), DeviceError> {
        match &self.backend {
            Backend::Mock(slot) => {
                slot.lock()
                    .map_err(|_| DeviceError::Poisoned(self.name.clone()))?
                    .take();
            }
            #[cfg(feature = "gpio")]
            Backend::Gpio(pin) => {
                pin.lock()
                    .map_err(|_| DeviceError::Poisoned(self.name.clone()))?
                    .clear_async_interrupt()
                    .map_err(|e| DeviceError::hardware(&self.name, e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_button_delivers_edges_in_order() {
        let button = Button::new("on", 17, DriverMode::Mock).unwrap();
        let mut rx = button.edges().unwrap();
        button.press().unwrap();
        button.inject(Edge::Rising).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Edge::Rising);
        assert_eq!(rx.try_recv().unwrap(), Edge::Falling);
        assert_eq!(rx.try_recv().unwrap(), Edge::Rising);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn inject_without_subscriber_is_dropped() {
        let button = Button::new("off", 27, DriverMode::Mock).unwrap();
        button.press().unwrap();
        let mut rx = button.edges().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn resubscribing_replaces_previous_stream() {
        let button = Button::new("on", 17, DriverMode::Mock).unwrap();
        let mut first = button.edges().unwrap();
        let mut second = button.edges().unwrap();
        button.inject(Edge::Rising).unwrap();
        assert!(first.try_recv().is_err());
        assert_eq!(second.try_recv().unwrap(), Edge::Rising);
    }

    fn subscribed(button: &Button) -> bool {
        match &button.backend {
            Backend::Mock(slot) => slot.lock().unwrap().is_some(),
            #[cfg(feature = "gpio")]
            Backend::Gpio(_) => unreachable!(),
        }
    }

    #[test]
    fn unsubscribe_clears_the_stream() {
        let button = Button::new("on", 17, DriverMode::Mock).unwrap();
        let mut rx = button.edges().unwrap();
        assert!(subscribed(&button));

        button.unsubscribe().unwrap();
        assert!(!subscribed(&button));
        button.press().unwrap();
        // Sender dropped with the slot: the stream ends with nothing queued.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        // Unsubscribing twice is fine.
        button.unsubscribe().unwrap();
    }

    #[test]
    fn button_metadata() {
        let button = Button::new("on", 17, DriverMode::Mock).unwrap();
        assert_eq!(button.name(), "on");
        assert_eq!(button.pin(), 17);
        assert_eq!(button.capability(), Capability::Input);
    }
}
