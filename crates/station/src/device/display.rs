//! 16x2 character display. Inbound text is split into lines and written
//! from the top-left corner; an empty payload clears the screen.

use std::sync::Mutex;

#[cfg(feature = "gpio")]
use super::lcd::Lcd;
use super::{Actuator, Capability, Device, DriverMode};
use crate::error::DeviceError;

pub const COLUMNS: usize = 16;
pub const ROWS: usize = 2;

/// Split a text payload into at most [`ROWS`] lines of at most [`COLUMNS`]
/// characters.
pub fn layout(text: &str) -> Vec<String> {
    text.lines()
        .take(ROWS)
        .map(|line| line.trim_end_matches('\r').chars().take(COLUMNS).collect())
        .collect()
}

/// I2C location of the display backpack.
#[derive(Debug, Clone, Copy)]
pub struct DisplayWiring {
    pub i2c_bus: u8,
    pub address: u16,
}

enum Backend {
    Mock(Mutex<Vec<String>>),
    #[cfg(feature = "gpio")]
    Lcd(Mutex<Lcd>),
}

pub struct Display {
    name: String,
    backend: Backend,
}

impl Display {
    pub fn new(name: &str, wiring: DisplayWiring, mode: DriverMode) -> Result<Self, DeviceError> {
        let backend = match mode {
            DriverMode::Mock => {
                tracing::info!(device = name, "[mock] display initialised");
                Backend::Mock(Mutex::new(Vec::new()))
            }
            DriverMode::Hardware => Self::hardware(name, wiring)?,
        };
        Ok(Self {
            name: name.to_string(),
            backend,
        })
    }

    #[cfg(feature = "gpio")]
    fn hardware(name: &str, wiring: DisplayWiring) -> Result<Backend, DeviceError> {
        let lcd = Lcd::new(wiring.i2c_bus, wiring.address)
            .map_err(|e| DeviceError::hardware(name, e))?;
        Ok(Backend::Lcd(Mutex::new(lcd)))
    }

    #[cfg(not(feature = "gpio"))]
    fn hardware(name: &str, _wiring: DisplayWiring) -> Result<Backend, DeviceError> {
        Err(super::hardware_unavailable(name))
    }

    pub fn clear(&self) -> Result<(), DeviceError> {
        self.show(&[])
    }

    /// What a mock display currently shows.
    pub fn lines(&self) -> Option<Vec<String>> {
        match &self.backend {
            Backend::Mock(lines) => lines.lock().ok().map(|l| l.clone()),
            #[cfg(feature = "gpio")]
            Backend::Lcd(_) => None,
        }
    }

    fn show(&self, lines: &[String]) -> Result<(), DeviceError> {
        match &self.backend {
            Backend::Mock(current) => {
                *current
                    .lock()
                    .map_err(|_| DeviceError::Poisoned(self.name.clone()))? = lines.to_vec();
                tracing::info!(device = %self.name, ?lines, "[mock] display updated");
                Ok(())
            }
            #[cfg(feature = "gpio")]
            Backend::Lcd(lcd) => {
                let mut lcd = lcd
                    .lock()
                    .map_err(|_| DeviceError::Poisoned(self.name.clone()))?;
                lcd.clear().map_err(|e| DeviceError::hardware(&self.name, e))?;
                for (row, line) in lines.iter().enumerate() {
                    lcd.write_line(row as u8, line)
                        .map_err(|e| DeviceError::hardware(&self.name, e))?;
                }
                Ok(())
            }
        }
    }
}

impl Device for Display {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Display
    }
}

impl Actuator for Display {
    fn handle_message(&self, payload: &[u8]) -> Result<(), DeviceError> {
        let text = std::str::from_utf8(payload).map_err(|_| DeviceError::InvalidCommand {
            device: self.name.clone(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        })?;
        self.show(&layout(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRING: DisplayWiring = DisplayWiring {
        i2c_bus: 1,
        address: 0x27,
    };

    #[test]
    fn layout_truncates_rows_and_columns() {
        let lines = layout("moisture 0.42 and rising\npump off\nignored");
        assert_eq!(lines, ["moisture 0.42 an", "pump off"]);
    }

    #[test]
    fn layout_handles_crlf_and_empty() {
        assert_eq!(layout("a\r\nb"), ["a", "b"]);
        assert!(layout("").is_empty());
    }

    #[test]
    fn mock_display_shows_payload() {
        let display = Display::new("display", WIRING, DriverMode::Mock).unwrap();
        display.handle_message(b"hello\nworld").unwrap();
        assert_eq!(display.lines().unwrap(), ["hello", "world"]);
        display.clear().unwrap();
        assert!(display.lines().unwrap().is_empty());
        assert_eq!(display.capability(), Capability::Display);
    }

    #[test]
    fn non_utf8_payload_is_invalid() {
        let display = Display::new("display", WIRING, DriverMode::Mock).unwrap();
        display.handle_message(b"keep").unwrap();
        let err = display.handle_message(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidCommand { .. }));
        assert_eq!(display.lines().unwrap(), ["keep"]);
    }
}
