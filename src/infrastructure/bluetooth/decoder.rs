//! Advertisement decoders
//!
//! One decoder per device kind. A decoder only looks at advertisements
//! listing its kind's service id and declines (`Ok(None)`) anything else.
//! Every successful decode goes through [`AdvertisementDecoder`], which
//! stores the record in the [`DeviceRegistry`] before handing it out.

use super::error::DecodeError;
use super::protocol::{
    self, layout, RawAdvertisement, CHARGER_SERVICE_UUID, DFU_SERVICE_UUID, DIE_SERVICE_UUID,
    MULTI_DEVICE_CHARGER_SERVICE_UUID,
};
use super::reader::BinaryReader;
use crate::domain::dice;
use crate::domain::models::{
    Colorway, DeviceInfo, DieType, PixelId, RollState, ScannedBootloader, ScannedCharger,
    ScannedDevice, ScannedDie, ScannedMultiDeviceCharger,
};
use crate::domain::registry::DeviceRegistry;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{trace, warn};

/// A decoded device and whether it used the legacy die layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub device: ScannedDevice,
    pub legacy: bool,
}

/// Decodes advertisements and keeps the registry up to date.
#[derive(Clone)]
pub struct AdvertisementDecoder {
    registry: Arc<DeviceRegistry>,
}

impl AdvertisementDecoder {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Decode `adv`, store the result and return it.
    ///
    /// Failures are logged and yield `None`.
    pub fn decode(&self, adv: &RawAdvertisement, now: SystemTime) -> Option<ScannedDevice> {
        match decode_advertisement(adv, now) {
            Ok(Some(Decoded { device, legacy })) => {
                self.registry.store(device.clone(), legacy);
                Some(device)
            }
            Ok(None) => {
                trace!("Ignoring advertisement from {}", adv.display_name());
                None
            }
            Err(e) => {
                warn!("{}: {}", adv.display_name(), e);
                None
            }
        }
    }
}

/// Run every decoder over `adv`, first match wins.
///
/// `now` stands in for the firmware date of legacy dice, which don't
/// advertise it.
pub fn decode_advertisement(
    adv: &RawAdvertisement,
    now: SystemTime,
) -> Result<Option<Decoded>, DecodeError> {
    if let Some((die, legacy)) = decode_die(adv, now)? {
        return Ok(Some(Decoded {
            device: ScannedDevice::Die(die),
            legacy,
        }));
    }
    let device = if let Some(charger) = decode_charger(adv)? {
        ScannedDevice::Charger(charger)
    } else if let Some(mpc) = decode_multi_device_charger(adv)? {
        ScannedDevice::MultiDeviceCharger(mpc)
    } else if let Some(bootloader) = decode_bootloader(adv)? {
        ScannedDevice::Bootloader(bootloader)
    } else {
        return Ok(None);
    };
    Ok(Some(Decoded {
        device,
        legacy: false,
    }))
}

/// Decode a die advertisement, returning the die and whether it used the
/// legacy layout.
pub fn decode_die(
    adv: &RawAdvertisement,
    now: SystemTime,
) -> Result<Option<(ScannedDie, bool)>, DecodeError> {
    if !adv.has_service(&DIE_SERVICE_UUID) {
        return Ok(None);
    }

    let manufacturer = adv.first_manufacturer_data();
    let service = adv.first_service_data();
    let has_service_data = service.is_some_and(|s| s.data.len() >= layout::SERVICE_DATA_MIN_LEN);
    let is_legacy = service.is_none()
        && manufacturer.is_some_and(|m| m.data.len() == layout::LEGACY_DIE_MANUFACTURER_LEN);

    let manufacturer = match manufacturer {
        Some(m)
            if (is_legacy || has_service_data)
                && m.data.len() >= layout::DIE_MANUFACTURER_MIN_LEN =>
        {
            m
        }
        _ => return Err(unsupported_layout(adv)),
    };
    let mut manuf_reader = BinaryReader::new(&manufacturer.data);

    let die = match service {
        Some(service) if has_service_data => {
            let mut service_reader = BinaryReader::new(&service.data);
            let pixel_id = service_reader.read_u32()?;
            let firmware_date = epoch_seconds(service_reader.read_u32()?);

            let led_count = manuf_reader.read_u8()?;
            let design = manuf_reader.read_u8()?;
            let roll_state = RollState::from_value(manuf_reader.read_u8()?);
            let face_index = manuf_reader.read_u8()?;
            let (battery_level, is_charging) = protocol::split_battery(manuf_reader.read_u8()?);

            let die_type = dice::resolve_die_type(DieType::from_value(design >> 4), led_count);
            ScannedDie {
                info: device_info(adv, pixel_id)?,
                led_count,
                colorway: Colorway::from_value(design & 0x0f),
                die_type,
                firmware_date,
                battery_level,
                is_charging,
                roll_state,
                current_face: dice::face_from_index(face_index, die_type),
                current_face_index: face_index,
            }
        }
        _ => {
            // Pre-July 2022 firmware hides the LED count in the company id
            let led_count = (manufacturer.company_id >> 8) as u8;
            let pixel_id = manuf_reader.read_u32()?;
            let roll_state = RollState::from_value(manuf_reader.read_u8()?);
            let face_index = manuf_reader.read_u8()?;
            let battery_level = protocol::legacy_battery_percent(manuf_reader.read_u8()?);

            let die_type = dice::estimate_die_type(led_count);
            ScannedDie {
                info: device_info(adv, pixel_id)?,
                led_count,
                colorway: Colorway::Unknown,
                die_type,
                firmware_date: now,
                battery_level,
                is_charging: false,
                roll_state,
                current_face: dice::face_from_index(face_index, die_type),
                current_face_index: face_index,
            }
        }
    };
    Ok(Some((die, !has_service_data)))
}

pub fn decode_charger(adv: &RawAdvertisement) -> Result<Option<ScannedCharger>, DecodeError> {
    if !adv.has_service(&CHARGER_SERVICE_UUID) {
        return Ok(None);
    }
    let (info, firmware_date, mut manuf_reader) =
        read_common(adv, layout::CHARGER_MANUFACTURER_MIN_LEN)?;
    let (battery_level, is_charging) = protocol::split_battery(manuf_reader.read_u8()?);
    Ok(Some(ScannedCharger {
        info,
        led_count: layout::CHARGER_LED_COUNT,
        firmware_date,
        battery_level,
        is_charging,
    }))
}

pub fn decode_multi_device_charger(
    adv: &RawAdvertisement,
) -> Result<Option<ScannedMultiDeviceCharger>, DecodeError> {
    if !adv.has_service(&MULTI_DEVICE_CHARGER_SERVICE_UUID) {
        return Ok(None);
    }
    let (info, firmware_date, mut manuf_reader) =
        read_common(adv, layout::MULTI_DEVICE_CHARGER_MANUFACTURER_MIN_LEN)?;
    let led_count = manuf_reader.read_u8()?;
    let (battery_level, is_charging) = protocol::split_battery(manuf_reader.read_u8()?);
    Ok(Some(ScannedMultiDeviceCharger {
        info,
        led_count,
        firmware_date,
        battery_level,
        is_charging,
    }))
}

pub fn decode_bootloader(
    adv: &RawAdvertisement,
) -> Result<Option<ScannedBootloader>, DecodeError> {
    if !adv.has_service(&DFU_SERVICE_UUID) {
        return Ok(None);
    }
    let name = adv.display_name();
    let (pixel_id, device_type) = protocol::parse_bootloader_name(name)
        .ok_or_else(|| DecodeError::BootloaderName(name.to_string()))?;
    Ok(Some(ScannedBootloader {
        info: device_info(adv, pixel_id.get())?,
        device_type,
    }))
}

/// Read the service data shared by chargers and check the manufacturer
/// data is long enough for the kind.
fn read_common<'a>(
    adv: &'a RawAdvertisement,
    manufacturer_min_len: usize,
) -> Result<(DeviceInfo, SystemTime, BinaryReader<'a>), DecodeError> {
    let manufacturer = adv
        .first_manufacturer_data()
        .filter(|m| m.data.len() >= manufacturer_min_len);
    let service = adv
        .first_service_data()
        .filter(|s| s.data.len() >= layout::SERVICE_DATA_MIN_LEN);
    let (Some(manufacturer), Some(service)) = (manufacturer, service) else {
        return Err(unsupported_layout(adv));
    };

    let mut service_reader = BinaryReader::new(&service.data);
    let pixel_id = service_reader.read_u32()?;
    let firmware_date = epoch_seconds(service_reader.read_u32()?);
    Ok((
        device_info(adv, pixel_id)?,
        firmware_date,
        BinaryReader::new(&manufacturer.data),
    ))
}

fn device_info(adv: &RawAdvertisement, pixel_id: u32) -> Result<DeviceInfo, DecodeError> {
    if adv.system_id.is_empty() {
        return Err(DecodeError::MissingSystemId);
    }
    let pixel_id = PixelId::new(pixel_id).ok_or(DecodeError::InvalidPixelId)?;
    Ok(DeviceInfo {
        system_id: adv.system_id.clone(),
        pixel_id,
        name: adv.display_name().to_string(),
        rssi: adv.rssi,
        mac_address: adv.address,
        timestamp: adv.timestamp,
    })
}

fn epoch_seconds(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::from(secs))
}

fn unsupported_layout(adv: &RawAdvertisement) -> DecodeError {
    let len = |len: Option<usize>| len.map_or(-1, |l| l as i32);
    DecodeError::UnsupportedLayout {
        manufacturer: len(adv.first_manufacturer_data().map(|m| m.data.len())),
        service: len(adv.first_service_data().map(|s| s.data.len())),
    }
}
