//! [`DeviceRegistry`]: logical device name to driver handle.
//!
//! Populated with `&mut` while the station initialises, then only read. No
//! locking, no I/O.

use std::collections::HashMap;
use std::sync::Arc;

use crate::device::Device;
use crate::error::RegistryError;

#[derive(Default)]
pub struct DeviceRegistry {
    devices: Vec<Arc<dyn Device>>,
    index: HashMap<String, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `device` under its own name.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateName`] if the name is taken; the existing
    /// device is left in place.
    pub fn add(&mut self, device: Arc<dyn Device>) -> Result<(), RegistryError> {
        let name = device.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.index.insert(name, self.devices.len());
        self.devices.push(device);
        Ok(())
    }

    /// Look up a device by name.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if nothing was added under `name`.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Device>, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.devices[i])
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Devices in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Device>> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
