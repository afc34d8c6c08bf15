//! Pixels advertising protocol
//!
//! Service ids, the raw advertisement handed over by the radio adapter and
//! the payload layouts broadcast by each kind of device.
//!
//! # Die, current layout (since July 2022)
//!
//! ```text
//! Service data (>= 8 bytes)
//! [0-3]   : Pixel id (u32 little-endian)
//! [4-7]   : Firmware build date (u32 little-endian, seconds since epoch)
//!
//! Manufacturer data (>= 5 bytes)
//! [0]     : LED count
//! [1]     : Design, low nibble colorway, high nibble die type
//! [2]     : Roll state
//! [3]     : Face index
//! [4]     : Battery, bits 0-6 level in percent, bit 7 charging
//! ```
//!
//! # Die, legacy layout
//!
//! ```text
//! No service data
//! Company id : high byte LED count, low byte design (no longer decoded)
//!
//! Manufacturer data (exactly 7 bytes)
//! [0-3]   : Pixel id (u32 little-endian)
//! [4]     : Roll state
//! [5]     : Face index
//! [6]     : Battery level, 0-255 scale
//! ```
//!
//! # Charger and multi-device charger
//!
//! ```text
//! Service data (>= 8 bytes): same as die
//!
//! Charger manufacturer data (>= 1 byte)
//! [0]     : Battery, bits 0-6 level in percent, bit 7 charging
//!
//! Multi-device charger manufacturer data (>= 2 bytes)
//! [0]     : LED count
//! [1]     : Battery, bits 0-6 level in percent, bit 7 charging
//! ```
//!
//! # Bootloader
//!
//! No payload. The advertised name is `PXL-BL-XXXXXXXX` for a die and
//! `CHG-BL-XXXXXXXX` for a charger, `XXXXXXXX` being the pixel id in hex.

use crate::domain::models::{BootloaderDeviceType, PixelId};
use std::time::SystemTime;
use uuid::Uuid;

/// Pixels die GATT service
pub const DIE_SERVICE_UUID: Uuid = Uuid::from_u128(0xa6b90001_7a5a_43f2_a962_350c8edc9b5b);

/// Pixels charger GATT service
pub const CHARGER_SERVICE_UUID: Uuid = Uuid::from_u128(0xa6b90002_7a5a_43f2_a962_350c8edc9b5b);

/// Multi-device charger GATT service
pub const MULTI_DEVICE_CHARGER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0xa6b90003_7a5a_43f2_a962_350c8edc9b5b);

/// Nordic secure DFU service (0xFE59), advertised in bootloader mode
pub const DFU_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fe59_0000_1000_8000_00805f9b34fb);

/// Every service id the scanner asks the radio for.
pub const SCAN_SERVICE_UUIDS: [Uuid; 4] = [
    DIE_SERVICE_UUID,
    CHARGER_SERVICE_UUID,
    MULTI_DEVICE_CHARGER_SERVICE_UUID,
    DFU_SERVICE_UUID,
];

/// Payload sizes admitted by the decoders
pub mod layout {
    pub const SERVICE_DATA_MIN_LEN: usize = 8;
    pub const DIE_MANUFACTURER_MIN_LEN: usize = 5;
    pub const LEGACY_DIE_MANUFACTURER_LEN: usize = 7;
    pub const CHARGER_MANUFACTURER_MIN_LEN: usize = 1;
    pub const MULTI_DEVICE_CHARGER_MANUFACTURER_MIN_LEN: usize = 2;

    /// Chargers have a fixed number of LEDs
    pub const CHARGER_LED_COUNT: u8 = 3;

    pub const BATTERY_LEVEL_MASK: u8 = 0x7f;
    pub const BATTERY_CHARGING_BIT: u8 = 0x80;
}

pub const DIE_BOOTLOADER_PREFIX: &str = "PXL-BL-";
pub const CHARGER_BOOTLOADER_PREFIX: &str = "CHG-BL-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerData {
    pub company_id: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceData {
    pub uuid: Uuid,
    pub data: Vec<u8>,
}

/// One advertisement as reported by the radio adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAdvertisement {
    pub system_id: String,
    /// Name known to the OS for this peripheral
    pub name: String,
    /// Name carried by the advertisement itself
    pub local_name: Option<String>,
    pub address: Option<u64>,
    pub rssi: i16,
    /// When the advertisement was received
    pub timestamp: SystemTime,
    pub services: Vec<Uuid>,
    pub manufacturer_data: Vec<ManufacturerData>,
    pub service_data: Vec<ServiceData>,
}

impl RawAdvertisement {
    /// Advertised local name if any, connection name otherwise.
    pub fn display_name(&self) -> &str {
        match &self.local_name {
            Some(name) if !name.is_empty() => name,
            _ => &self.name,
        }
    }

    pub fn has_service(&self, uuid: &Uuid) -> bool {
        self.services.contains(uuid)
    }

    /// Devices only ever advertise one manufacturer record.
    pub fn first_manufacturer_data(&self) -> Option<&ManufacturerData> {
        self.manufacturer_data.first()
    }

    pub fn first_service_data(&self) -> Option<&ServiceData> {
        self.service_data.first()
    }
}

/// Split a battery byte into level and charging flag.
pub fn split_battery(value: u8) -> (u8, bool) {
    (
        value & layout::BATTERY_LEVEL_MASK,
        value & layout::BATTERY_CHARGING_BIT != 0,
    )
}

/// Convert a 0-255 battery reading to a rounded percentage.
pub fn legacy_battery_percent(value: u8) -> u8 {
    ((u32::from(value) * 100 + 127) / 255) as u8
}

/// Parse a bootloader advertised name into its pixel id and device type.
pub fn parse_bootloader_name(name: &str) -> Option<(PixelId, BootloaderDeviceType)> {
    let (hex, device_type) = if let Some(hex) = name.strip_prefix(DIE_BOOTLOADER_PREFIX) {
        (hex, BootloaderDeviceType::Die)
    } else if let Some(hex) = name.strip_prefix(CHARGER_BOOTLOADER_PREFIX) {
        (hex, BootloaderDeviceType::Charger)
    } else {
        return None;
    };
    if hex.len() != 8 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let value = u32::from_str_radix(hex, 16).ok()?;
    Some((PixelId::new(value)?, device_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_byte() {
        assert_eq!(split_battery(0x80 | 42), (42, true));
        assert_eq!(split_battery(100), (100, false));
    }

    #[test]
    fn legacy_battery_rounds() {
        assert_eq!(legacy_battery_percent(0), 0);
        assert_eq!(legacy_battery_percent(255), 100);
        assert_eq!(legacy_battery_percent(128), 50);
        assert_eq!(legacy_battery_percent(1), 0);
        assert_eq!(legacy_battery_percent(2), 1);
    }

    #[test]
    fn bootloader_names() {
        assert_eq!(
            parse_bootloader_name("PXL-BL-00ABCDEF"),
            Some((PixelId::new(0xABCDEF).unwrap(), BootloaderDeviceType::Die))
        );
        assert_eq!(
            parse_bootloader_name("CHG-BL-deadbeef"),
            Some((PixelId::new(0xDEADBEEF).unwrap(), BootloaderDeviceType::Charger))
        );
        assert_eq!(parse_bootloader_name("PXL-BL-00000000"), None);
        assert_eq!(parse_bootloader_name("PXL-BL-+0000001"), None);
        assert_eq!(parse_bootloader_name("PXL-BL-123"), None);
        assert_eq!(parse_bootloader_name("DfuTarg"), None);
    }

    #[test]
    fn local_name_overrides() {
        let mut adv = RawAdvertisement {
            system_id: "sys".to_string(),
            name: "Connected".to_string(),
            local_name: None,
            address: None,
            rssi: -40,
            timestamp: SystemTime::UNIX_EPOCH,
            services: vec![DIE_SERVICE_UUID],
            manufacturer_data: Vec::new(),
            service_data: Vec::new(),
        };
        assert_eq!(adv.display_name(), "Connected");
        adv.local_name = Some("Advertised".to_string());
        assert_eq!(adv.display_name(), "Advertised");
        assert!(adv.has_service(&DIE_SERVICE_UUID));
        assert!(!adv.has_service(&DFU_SERVICE_UUID));
    }
}
