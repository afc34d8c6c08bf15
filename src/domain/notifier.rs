//! Identity-stable device wrappers raising per-property change events.
//!
//! A notifier is created the first time a pixel id is seen and then kept
//! and updated for the lifetime of its [`NotifierMap`], so observers can
//! hold on to it across scan sessions. Maps never evict.

use crate::domain::models::{
    DeviceInfo, PixelId, ScanListOperation, ScannedBootloader, ScannedCharger, ScannedDevice,
    ScannedDie, ScannedMultiDeviceCharger,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Tracked property of a scanned device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProperty {
    Timestamp,
    Name,
    LedCount,
    Colorway,
    DieType,
    FirmwareDate,
    Rssi,
    BatteryLevel,
    IsCharging,
    RollState,
    CurrentFace,
    CurrentFaceIndex,
}

/// A device record whose properties can be compared.
pub trait TrackedProperties: Clone + Send + Sync + 'static {
    fn info(&self) -> &DeviceInfo;

    /// Properties differing between `self` and `newer`, in declared order.
    /// The timestamp is handled by [`diff`] and isn't listed here.
    fn changed_properties(&self, newer: &Self) -> Vec<DeviceProperty>;
}

/// Compare two snapshots of the same device.
///
/// Returns `None` when `incoming` isn't strictly newer than `current`,
/// otherwise the changed properties with the timestamp first.
pub fn diff<T: TrackedProperties>(current: &T, incoming: &T) -> Option<Vec<DeviceProperty>> {
    if incoming.info().timestamp <= current.info().timestamp {
        return None;
    }
    let mut changed = vec![DeviceProperty::Timestamp];
    changed.extend(current.changed_properties(incoming));
    Some(changed)
}

macro_rules! push_changed {
    ($changed:ident, $old:expr, $new:expr, $property:expr) => {
        if $old != $new {
            $changed.push($property);
        }
    };
}

impl TrackedProperties for ScannedDie {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn changed_properties(&self, newer: &Self) -> Vec<DeviceProperty> {
        let mut changed = Vec::new();
        push_changed!(changed, self.info.name, newer.info.name, DeviceProperty::Name);
        push_changed!(changed, self.led_count, newer.led_count, DeviceProperty::LedCount);
        push_changed!(changed, self.colorway, newer.colorway, DeviceProperty::Colorway);
        push_changed!(changed, self.die_type, newer.die_type, DeviceProperty::DieType);
        push_changed!(
            changed,
            self.firmware_date,
            newer.firmware_date,
            DeviceProperty::FirmwareDate
        );
        push_changed!(changed, self.info.rssi, newer.info.rssi, DeviceProperty::Rssi);
        push_changed!(
            changed,
            self.battery_level,
            newer.battery_level,
            DeviceProperty::BatteryLevel
        );
        push_changed!(changed, self.is_charging, newer.is_charging, DeviceProperty::IsCharging);
        push_changed!(changed, self.roll_state, newer.roll_state, DeviceProperty::RollState);
        push_changed!(
            changed,
            self.current_face,
            newer.current_face,
            DeviceProperty::CurrentFace
        );
        push_changed!(
            changed,
            self.current_face_index,
            newer.current_face_index,
            DeviceProperty::CurrentFaceIndex
        );
        changed
    }
}

impl TrackedProperties for ScannedCharger {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn changed_properties(&self, newer: &Self) -> Vec<DeviceProperty> {
        let mut changed = Vec::new();
        push_changed!(changed, self.info.name, newer.info.name, DeviceProperty::Name);
        push_changed!(changed, self.led_count, newer.led_count, DeviceProperty::LedCount);
        push_changed!(
            changed,
            self.firmware_date,
            newer.firmware_date,
            DeviceProperty::FirmwareDate
        );
        push_changed!(changed, self.info.rssi, newer.info.rssi, DeviceProperty::Rssi);
        push_changed!(
            changed,
            self.battery_level,
            newer.battery_level,
            DeviceProperty::BatteryLevel
        );
        push_changed!(changed, self.is_charging, newer.is_charging, DeviceProperty::IsCharging);
        changed
    }
}

impl TrackedProperties for ScannedMultiDeviceCharger {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn changed_properties(&self, newer: &Self) -> Vec<DeviceProperty> {
        let mut changed = Vec::new();
        push_changed!(changed, self.info.name, newer.info.name, DeviceProperty::Name);
        push_changed!(changed, self.led_count, newer.led_count, DeviceProperty::LedCount);
        push_changed!(
            changed,
            self.firmware_date,
            newer.firmware_date,
            DeviceProperty::FirmwareDate
        );
        push_changed!(changed, self.info.rssi, newer.info.rssi, DeviceProperty::Rssi);
        push_changed!(
            changed,
            self.battery_level,
            newer.battery_level,
            DeviceProperty::BatteryLevel
        );
        push_changed!(changed, self.is_charging, newer.is_charging, DeviceProperty::IsCharging);
        changed
    }
}

impl TrackedProperties for ScannedBootloader {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn changed_properties(&self, newer: &Self) -> Vec<DeviceProperty> {
        let mut changed = Vec::new();
        push_changed!(changed, self.info.name, newer.info.name, DeviceProperty::Name);
        push_changed!(changed, self.info.rssi, newer.info.rssi, DeviceProperty::Rssi);
        changed
    }
}

/// One property change, with the snapshot it produced.
#[derive(Debug, Clone)]
pub struct PropertyChanged<T> {
    pub property: DeviceProperty,
    pub snapshot: T,
}

/// Wraps the latest snapshot of one device.
pub struct Notifier<T: TrackedProperties> {
    data: Mutex<T>,
    changes: broadcast::Sender<PropertyChanged<T>>,
}

impl<T: TrackedProperties> Notifier<T> {
    fn new(device: T) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            data: Mutex::new(device),
            changes,
        }
    }

    pub fn pixel_id(&self) -> PixelId {
        self.lock().info().pixel_id
    }

    pub fn snapshot(&self) -> T {
        self.lock().clone()
    }

    /// Receive one event per changed property.
    pub fn subscribe(&self) -> broadcast::Receiver<PropertyChanged<T>> {
        self.changes.subscribe()
    }

    /// Replace the snapshot with `incoming` if it's strictly newer and
    /// publish the properties that changed. Older or same-time updates are
    /// ignored entirely.
    pub fn update_properties(&self, incoming: &T) -> Vec<DeviceProperty> {
        let mut data = self.lock();
        let Some(changed) = diff(&*data, incoming) else {
            return Vec::new();
        };
        *data = incoming.clone();
        drop(data);
        for property in &changed {
            let _ = self.changes.send(PropertyChanged {
                property: *property,
                snapshot: incoming.clone(),
            });
        }
        changed
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Get-or-create store of notifiers keyed by pixel id.
pub struct NotifierMap<T: TrackedProperties> {
    notifiers: Mutex<HashMap<PixelId, Arc<Notifier<T>>>>,
}

impl<T: TrackedProperties> Default for NotifierMap<T> {
    fn default() -> Self {
        Self {
            notifiers: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: TrackedProperties> NotifierMap<T> {
    pub fn find(&self, pixel_id: PixelId) -> Option<Arc<Notifier<T>>> {
        self.lock().get(&pixel_id).cloned()
    }

    /// Return the notifier for `device`, updated with it, creating it on
    /// first sight.
    pub fn get_or_create(&self, device: &T) -> Arc<Notifier<T>> {
        let pixel_id = device.info().pixel_id;
        let notifier = {
            let mut notifiers = self.lock();
            if let Some(existing) = notifiers.get(&pixel_id) {
                Arc::clone(existing)
            } else {
                let created = Arc::new(Notifier::new(device.clone()));
                notifiers.insert(pixel_id, Arc::clone(&created));
                return created;
            }
        };
        notifier.update_properties(device);
        notifier
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PixelId, Arc<Notifier<T>>>> {
        self.notifiers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Notifier for any device kind.
#[derive(Clone)]
pub enum DeviceNotifier {
    Die(Arc<Notifier<ScannedDie>>),
    Charger(Arc<Notifier<ScannedCharger>>),
    MultiDeviceCharger(Arc<Notifier<ScannedMultiDeviceCharger>>),
    Bootloader(Arc<Notifier<ScannedBootloader>>),
}

/// One notifier map per device kind.
#[derive(Default)]
pub struct Notifiers {
    pub dice: NotifierMap<ScannedDie>,
    pub chargers: NotifierMap<ScannedCharger>,
    pub multi_device_chargers: NotifierMap<ScannedMultiDeviceCharger>,
    pub bootloaders: NotifierMap<ScannedBootloader>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, device: &ScannedDevice) -> DeviceNotifier {
        match device {
            ScannedDevice::Die(d) => DeviceNotifier::Die(self.dice.get_or_create(d)),
            ScannedDevice::Charger(c) => DeviceNotifier::Charger(self.chargers.get_or_create(c)),
            ScannedDevice::MultiDeviceCharger(m) => {
                DeviceNotifier::MultiDeviceCharger(self.multi_device_chargers.get_or_create(m))
            }
            ScannedDevice::Bootloader(b) => {
                DeviceNotifier::Bootloader(self.bootloaders.get_or_create(b))
            }
        }
    }

    /// Feed every scanned device of a batch to its notifier.
    pub fn apply(&self, ops: &[ScanListOperation]) {
        for op in ops {
            if let ScanListOperation::Scanned { device } = op {
                self.get_or_create(device);
            }
        }
    }
}
