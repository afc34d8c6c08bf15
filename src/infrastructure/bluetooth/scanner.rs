//! BLE Scanner Module
//!
//! [`Central`] implementation on top of the platform adapter exposed by
//! btleplug. Advertisement events are turned into [`RawAdvertisement`]s and
//! forwarded to the scan service.

use super::central::{Central, CentralEvent, CentralEventReceiver};
use super::error::ScanError;
use super::protocol::{ManufacturerData, RawAdvertisement, ServiceData};
use crate::domain::models::{ScanStatus, StopReason};
use btleplug::api::{
    BDAddr, Central as _, CentralEvent as AdapterEvent, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::StreamExt;
use std::sync::Mutex;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Radio adapter backed by a btleplug [`Adapter`].
pub struct BtleplugCentral {
    adapter: Adapter,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugCentral {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            task: Mutex::new(None),
        }
    }

    /// Use the first adapter reported by the OS.
    pub async fn first_adapter() -> Result<Self, ScanError> {
        let manager = Manager::new().await.map_err(|e| adapter_error(&e))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| adapter_error(&e))?
            .into_iter()
            .next()
            .ok_or(ScanError::RadioUnavailable)?;
        if let Ok(info) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter {}", info);
        }
        Ok(Self::new(adapter))
    }

    fn replace_task(&self, task: Option<JoinHandle<()>>) {
        let previous = std::mem::replace(
            &mut *self.task.lock().unwrap_or_else(|e| e.into_inner()),
            task,
        );
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Central for BtleplugCentral {
    async fn start_scan(&self, services: Vec<Uuid>) -> Result<CentralEventReceiver, ScanError> {
        let mut events = self.adapter.events().await.map_err(|e| start_error(&e))?;
        self.adapter
            .start_scan(ScanFilter { services })
            .await
            .map_err(|e| start_error(&e))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(CentralEvent::Ready(true));

        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    AdapterEvent::DeviceDiscovered(id)
                    | AdapterEvent::DeviceUpdated(id)
                    | AdapterEvent::ManufacturerDataAdvertisement { id, .. }
                    | AdapterEvent::ServiceDataAdvertisement { id, .. }
                    | AdapterEvent::ServicesAdvertisement { id, .. } => id,
                    _ => continue,
                };
                let Some(adv) = read_advertisement(&adapter, &id).await else {
                    continue;
                };
                if sender.send(CentralEvent::Advertisement(adv)).is_err() {
                    break;
                }
            }
            debug!("Adapter event stream ended");
            let _ = sender.send(CentralEvent::Ready(false));
            let _ = sender.send(CentralEvent::Status {
                status: ScanStatus::Stopped,
                stop_reason: Some(StopReason::RadioUnavailable),
            });
        });
        self.replace_task(Some(task));

        Ok(receiver)
    }

    async fn stop_scan(&self) -> Result<(), ScanError> {
        self.replace_task(None);
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| ScanError::StopFailed(e.to_string()))
    }
}

impl Drop for BtleplugCentral {
    fn drop(&mut self) {
        self.replace_task(None);
    }
}

async fn read_advertisement(adapter: &Adapter, id: &PeripheralId) -> Option<RawAdvertisement> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(e) => {
            trace!("Peripheral {:?} is gone: {}", id, e);
            return None;
        }
    };
    match peripheral.properties().await {
        Ok(Some(properties)) => Some(to_advertisement(
            format!("{:?}", id),
            properties,
            SystemTime::now(),
        )),
        Ok(None) => None,
        Err(e) => {
            warn!("Failed to read properties of {:?}: {}", id, e);
            None
        }
    }
}

/// Convert btleplug's view of a peripheral into an advertisement.
pub fn to_advertisement(
    system_id: String,
    properties: PeripheralProperties,
    timestamp: SystemTime,
) -> RawAdvertisement {
    let mut manufacturer_data: Vec<_> = properties
        .manufacturer_data
        .into_iter()
        .map(|(company_id, data)| ManufacturerData { company_id, data })
        .collect();
    manufacturer_data.sort_by_key(|m| m.company_id);

    // Our own service data first, the DFU service advertises none
    let mut service_data: Vec<_> = properties
        .service_data
        .into_iter()
        .map(|(uuid, data)| ServiceData { uuid, data })
        .collect();
    service_data.sort_by_key(|s| !properties.services.contains(&s.uuid));

    RawAdvertisement {
        name: properties.local_name.clone().unwrap_or_default(),
        local_name: properties.local_name,
        address: mac_address(properties.address),
        system_id,
        rssi: properties.rssi.unwrap_or_default(),
        timestamp,
        services: properties.services,
        manufacturer_data,
        service_data,
    }
}

/// Platforms that hide the address report all zeros.
fn mac_address(address: BDAddr) -> Option<u64> {
    let bytes = address.into_inner();
    let value = bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    (value != 0).then_some(value)
}

fn adapter_error(e: &btleplug::Error) -> ScanError {
    match e {
        btleplug::Error::PermissionDenied => ScanError::Unauthorized,
        other => ScanError::Adapter(other.to_string()),
    }
}

fn start_error(e: &btleplug::Error) -> ScanError {
    match e {
        btleplug::Error::PermissionDenied => ScanError::Unauthorized,
        other => ScanError::StartFailed(other.to_string()),
    }
}
