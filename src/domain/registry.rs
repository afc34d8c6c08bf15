//! Last-known-value store for every device ever decoded.
//!
//! The registry is shared by the decoders and the application and outlives
//! scan sessions. Entries are never evicted; callers judge freshness from
//! the record timestamp.

use crate::domain::models::{
    PixelId, ScannedBootloader, ScannedCharger, ScannedDevice, ScannedDie,
    ScannedMultiDeviceCharger,
};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// Lookup key accepted by [`DeviceRegistry::find`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKey {
    Pixel(PixelId),
    System(String),
}

impl From<PixelId> for DeviceKey {
    fn from(id: PixelId) -> Self {
        DeviceKey::Pixel(id)
    }
}

impl From<&str> for DeviceKey {
    fn from(system_id: &str) -> Self {
        DeviceKey::System(system_id.to_string())
    }
}

struct Entry {
    device: ScannedDevice,
    legacy: bool,
}

#[derive(Default)]
struct RegistryState {
    by_pixel_id: HashMap<PixelId, Entry>,
    by_system_id: HashMap<String, PixelId>,
}

#[derive(Default)]
pub struct DeviceRegistry {
    state: RwLock<RegistryState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert `device` by pixel id and record which payload layout it used.
    ///
    /// Returns `false` and leaves the entry untouched when the stored record
    /// is as recent or more recent than `device`.
    pub fn store(&self, device: ScannedDevice, legacy: bool) -> bool {
        let mut state = self.write();
        let pixel_id = device.pixel_id();
        if let Some(entry) = state.by_pixel_id.get(&pixel_id) {
            if entry.device.timestamp() >= device.timestamp() {
                trace!("Registry ignoring stale record for {}", pixel_id);
                return false;
            }
            let old_system_id = entry.device.system_id().to_string();
            if old_system_id != device.system_id() {
                state.by_system_id.remove(&old_system_id);
            }
        }
        state
            .by_system_id
            .insert(device.system_id().to_string(), pixel_id);
        state.by_pixel_id.insert(pixel_id, Entry { device, legacy });
        true
    }

    /// Find a device by pixel id or system id.
    pub fn find(&self, key: impl Into<DeviceKey>) -> Option<ScannedDevice> {
        let state = self.read();
        let pixel_id = match key.into() {
            DeviceKey::Pixel(id) => id,
            DeviceKey::System(system_id) => *state.by_system_id.get(&system_id)?,
        };
        state.by_pixel_id.get(&pixel_id).map(|e| e.device.clone())
    }

    pub fn find_die(&self, key: impl Into<DeviceKey>) -> Option<ScannedDie> {
        match self.find(key)? {
            ScannedDevice::Die(die) => Some(die),
            _ => None,
        }
    }

    pub fn find_charger(&self, key: impl Into<DeviceKey>) -> Option<ScannedCharger> {
        match self.find(key)? {
            ScannedDevice::Charger(charger) => Some(charger),
            _ => None,
        }
    }

    pub fn find_multi_device_charger(
        &self,
        key: impl Into<DeviceKey>,
    ) -> Option<ScannedMultiDeviceCharger> {
        match self.find(key)? {
            ScannedDevice::MultiDeviceCharger(mpc) => Some(mpc),
            _ => None,
        }
    }

    pub fn find_bootloader(&self, key: impl Into<DeviceKey>) -> Option<ScannedBootloader> {
        match self.find(key)? {
            ScannedDevice::Bootloader(bootloader) => Some(bootloader),
            _ => None,
        }
    }

    /// Whether the device was last seen advertising the pre-2022 layout.
    pub fn has_legacy_protocol(&self, pixel_id: PixelId) -> bool {
        self.read()
            .by_pixel_id
            .get(&pixel_id)
            .map(|e| e.legacy)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.read().by_pixel_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The state is always left consistent, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
