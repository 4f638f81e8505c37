//! Command line, environment and the TOML station file.
//!
//! Flags cover everything that differs between deployments (broker, mock
//! mode, ports). The station file describes the wiring; every section is
//! optional and defaults to the stock pin map.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::adc::MAX_CHANNEL;
use crate::device::display::DisplayWiring;
use crate::device::env::EnvWiring;
use crate::device::soil::SoilWiring;
use crate::device::DriverMode;
use crate::logging::LogArgs;
use crate::messenger::MqttSettings;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Irrigation station controller.
#[derive(Debug, Parser)]
#[command(name = "garden-station", version, about, long_about = None)]
pub struct Args {
    /// Use in-memory drivers instead of GPIO/I2C hardware
    #[arg(long, env = "MOCK")]
    pub mock: bool,

    /// MQTT broker host
    #[arg(long, env = "MQTT_HOST", default_value = "otto")]
    pub mqtt_broker: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// Name of this station; also the MQTT client id
    #[arg(long, env = "STATION_NAME", default_value = "gardener")]
    pub station_name: String,

    /// Station file with pin and bus assignments
    #[arg(long, env = "CONFIG_PATH", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Status server port
    #[arg(long, env = "WEB_PORT", default_value_t = 8080)]
    pub web_port: u16,

    /// Seconds to wait for the broker to acknowledge the connection
    #[arg(long, env = "MQTT_CONNECT_TIMEOUT", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    #[command(flatten)]
    pub log: LogArgs,
}

impl Args {
    pub fn mode(&self) -> DriverMode {
        if self.mock {
            DriverMode::Mock
        } else {
            DriverMode::Hardware
        }
    }

    pub fn mqtt(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt_broker.clone(),
            port: self.mqtt_port,
            client_id: self.station_name.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Load the station file (or the defaults) and pair it with the driver
    /// mode.
    pub fn station_config(&self) -> Result<Config> {
        let hardware = match &self.config {
            Some(path) => load(path)?,
            None => {
                let defaults = StationFile::default();
                defaults.validate().context("invalid built-in defaults")?;
                defaults
            }
        };
        Ok(Config {
            mode: self.mode(),
            hardware,
        })
    }
}

/// What the coordinator needs to bring the station up.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: DriverMode,
    pub hardware: StationFile,
}

impl Config {
    pub fn mock() -> Self {
        Self {
            mode: DriverMode::Mock,
            hardware: StationFile::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Station file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationFile {
    pub pins: Pins,
    pub relay: RelaySection,
    pub soil: SoilSection,
    pub env: EnvSection,
    pub display: DisplaySection,
    pub simulation: SimulationSection,
}

/// BCM pin numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Pins {
    pub on: u8,
    pub off: u8,
    pub pump: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            on: 17,
            off: 27,
            pump: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaySection {
    /// Most hobby relay boards energise on a low output.
    pub active_low: bool,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self { active_low: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SoilSection {
    pub adc_address: u16,
    pub adc_channel: u8,
    pub interval_secs: u64,
}

impl Default for SoilSection {
    fn default() -> Self {
        Self {
            adc_address: 0x48,
            adc_channel: 0,
            interval_secs: 10,
        }
    }
}

impl SoilSection {
    pub fn wiring(&self) -> SoilWiring {
        SoilWiring {
            adc_address: self.adc_address,
            adc_channel: self.adc_channel,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvSection {
    pub i2c_bus: u8,
    pub address: u16,
    pub interval_secs: u64,
}

impl Default for EnvSection {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            address: 0x76,
            interval_secs: 10,
        }
    }
}

impl EnvSection {
    pub fn wiring(&self) -> EnvWiring {
        EnvWiring {
            i2c_bus: self.i2c_bus,
            address: self.address,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplaySection {
    pub i2c_bus: u8,
    pub address: u16,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            address: 0x27,
        }
    }
}

impl DisplaySection {
    pub fn wiring(&self) -> DisplayWiring {
        DisplayWiring {
            i2c_bus: self.i2c_bus,
            address: self.address,
        }
    }
}

/// Mock-mode drift of the soil signal.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationSection {
    pub interval_secs: u64,
    pub delta: f64,
    pub start: f64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            delta: 0.02,
            start: 0.25,
        }
    }
}

impl SimulationSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM.
const VALID_GPIO_PINS: &[u8] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// 7-bit I2C addresses outside the reserved blocks.
const I2C_ADDRESSES: std::ops::RangeInclusive<u16> = 0x03..=0x77;

impl StationFile {
    /// Returns `Ok(())` or an error describing every violation found.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_pins(&mut errors);
        self.validate_buses(&mut errors);
        self.validate_timing(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<u8> = HashSet::new();
        for (role, pin) in [
            ("on", self.pins.on),
            ("off", self.pins.off),
            ("pump", self.pins.pump),
        ] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "pins.{role}: {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("pins.{role}: {pin} is already assigned"));
            }
        }
    }

    fn validate_buses(&self, errors: &mut Vec<String>) {
        if self.soil.adc_channel > MAX_CHANNEL {
            errors.push(format!(
                "soil.adc_channel: {} out of range [0, {MAX_CHANNEL}]",
                self.soil.adc_channel
            ));
        }

        for (field, address) in [
            ("soil.adc_address", self.soil.adc_address),
            ("env.address", self.env.address),
            ("display.address", self.display.address),
        ] {
            if !I2C_ADDRESSES.contains(&address) {
                errors.push(format!(
                    "{field}: {address:#04x} is not a usable 7-bit I2C address"
                ));
            }
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        for (field, secs) in [
            ("soil.interval_secs", self.soil.interval_secs),
            ("env.interval_secs", self.env.interval_secs),
            ("simulation.interval_secs", self.simulation.interval_secs),
        ] {
            if secs == 0 {
                errors.push(format!("{field} must be positive"));
            }
        }

        if !self.simulation.delta.is_finite() {
            errors.push(format!(
                "simulation.delta must be finite, got {}",
                self.simulation.delta
            ));
        }
        if !self.simulation.start.is_finite() {
            errors.push(format!(
                "simulation.start must be finite, got {}",
                self.simulation.start
            ));
        }
    }
}

/// Read, parse, and validate a station file.
pub fn load(path: &Path) -> Result<StationFile> {
    let shown = path.display();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {shown}"))?;
    let config: StationFile =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {shown}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {shown}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
