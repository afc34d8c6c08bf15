//! Scanned device snapshots and scan events.
//!
//! Every record is an immutable snapshot of one advertisement. A newer
//! advertisement replaces the whole record, records are never patched
//! field by field.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::time::SystemTime;

/// Stable 32-bit application identity of a physical device.
///
/// Zero is not a valid id, so it can't be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PixelId(NonZeroU32);

impl PixelId {
    /// Returns `None` for the invalid id 0.
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PixelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0.get())
    }
}

/// Device family, used to tag records and narrow lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceKind {
    Die,
    Charger,
    MultiDeviceCharger,
    Bootloader,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Die => "die",
            DeviceKind::Charger => "charger",
            DeviceKind::MultiDeviceCharger => "multiDeviceCharger",
            DeviceKind::Bootloader => "bootloader",
        }
    }

    /// Chargers of both sizes.
    pub fn is_charger(&self) -> bool {
        matches!(self, DeviceKind::Charger | DeviceKind::MultiDeviceCharger)
    }
}

/// Physical finish of a die, low nibble of the design byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Colorway {
    Unknown,
    OnyxBlack,
    HematiteGrey,
    MidnightGalaxy,
    AuroraSky,
    Clear,
    WhiteAurora,
    Custom,
}

impl Colorway {
    pub fn from_value(value: u8) -> Self {
        match value {
            1 => Colorway::OnyxBlack,
            2 => Colorway::HematiteGrey,
            3 => Colorway::MidnightGalaxy,
            4 => Colorway::AuroraSky,
            5 => Colorway::Clear,
            6 => Colorway::WhiteAurora,
            0xff => Colorway::Custom,
            _ => Colorway::Unknown,
        }
    }
}

/// Die shape, high nibble of the design byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DieType {
    Unknown,
    D20,
    D12,
    D10,
    D00,
    D8,
    D6,
    D6Fudge,
    D6Pipped,
    D4,
}

impl DieType {
    pub fn from_value(value: u8) -> Self {
        match value {
            1 => DieType::D20,
            2 => DieType::D12,
            3 => DieType::D10,
            4 => DieType::D00,
            5 => DieType::D8,
            6 => DieType::D6,
            7 => DieType::D6Fudge,
            8 => DieType::D6Pipped,
            9 => DieType::D4,
            _ => DieType::Unknown,
        }
    }
}

/// What a die reports it is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RollState {
    Unknown,
    OnFace,
    Handling,
    Rolling,
    Crooked,
}

impl RollState {
    pub fn from_value(value: u8) -> Self {
        match value {
            1 => RollState::OnFace,
            2 => RollState::Handling,
            3 => RollState::Rolling,
            4 => RollState::Crooked,
            _ => RollState::Unknown,
        }
    }
}

/// Which kind of device is stuck in the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BootloaderDeviceType {
    Die,
    Charger,
}

/// Fields shared by every scanned device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// OS-scoped Bluetooth identifier
    pub system_id: String,
    pub pixel_id: PixelId,
    pub name: String,
    /// Signal strength in dBm
    pub rssi: i16,
    /// 48-bit MAC address, not available on every platform
    pub mac_address: Option<u64>,
    /// Receipt time of the advertisement that produced the record
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedDie {
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub led_count: u8,
    pub colorway: Colorway,
    pub die_type: DieType,
    pub firmware_date: SystemTime,
    /// Battery level in percent
    pub battery_level: u8,
    pub is_charging: bool,
    pub roll_state: RollState,
    /// Face up, 0 when unknown
    pub current_face: u8,
    /// Raw face index as advertised
    pub current_face_index: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedCharger {
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub led_count: u8,
    pub firmware_date: SystemTime,
    pub battery_level: u8,
    pub is_charging: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedMultiDeviceCharger {
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub led_count: u8,
    pub firmware_date: SystemTime,
    pub battery_level: u8,
    pub is_charging: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedBootloader {
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub device_type: BootloaderDeviceType,
}

/// A device decoded from one advertisement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScannedDevice {
    Die(ScannedDie),
    Charger(ScannedCharger),
    MultiDeviceCharger(ScannedMultiDeviceCharger),
    Bootloader(ScannedBootloader),
}

impl ScannedDevice {
    pub fn info(&self) -> &DeviceInfo {
        match self {
            ScannedDevice::Die(d) => &d.info,
            ScannedDevice::Charger(c) => &c.info,
            ScannedDevice::MultiDeviceCharger(m) => &m.info,
            ScannedDevice::Bootloader(b) => &b.info,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            ScannedDevice::Die(_) => DeviceKind::Die,
            ScannedDevice::Charger(_) => DeviceKind::Charger,
            ScannedDevice::MultiDeviceCharger(_) => DeviceKind::MultiDeviceCharger,
            ScannedDevice::Bootloader(_) => DeviceKind::Bootloader,
        }
    }

    pub fn pixel_id(&self) -> PixelId {
        self.info().pixel_id
    }

    pub fn system_id(&self) -> &str {
        &self.info().system_id
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn timestamp(&self) -> SystemTime {
        self.info().timestamp
    }

    pub fn as_die(&self) -> Option<&ScannedDie> {
        match self {
            ScannedDevice::Die(d) => Some(d),
            _ => None,
        }
    }
}

/// Scan lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanStatus {
    Stopped,
    Starting,
    Scanning,
}

/// Why a scan reached the stopped state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// Stopped on request
    Success,
    FailedToStart,
    RadioOff,
    RadioUnavailable,
    Unauthorized,
    RadioResetting,
}

impl StopReason {
    /// Anything but a requested stop.
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, StopReason::Success)
    }
}

/// One entry of a batched list update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScanListOperation {
    /// Device was added or refreshed
    Scanned { device: ScannedDevice },
    /// Device is no longer held
    Removed { pixel_id: PixelId },
    /// The whole list was emptied
    Cleared,
}

/// Events published by the scanner to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Status {
        status: ScanStatus,
        stop_reason: Option<StopReason>,
    },
    /// Radio availability
    IsReady(bool),
    /// All held dice, sent when a batch touched at least one die
    ScannedDice(Vec<ScannedDie>),
    /// All held chargers of both sizes, sent when a batch touched one
    ScannedChargers(Vec<ScannedDevice>),
    ScanListOperations(Vec<ScanListOperation>),
}
