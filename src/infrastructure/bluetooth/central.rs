//! Radio adapter contract.
//!
//! The scanner doesn't talk to the OS Bluetooth stack directly. It asks a
//! [`Central`] to start a scan and consumes the stream of events that
//! comes back until the scan stops.

use super::error::ScanError;
use super::protocol::RawAdvertisement;
use crate::domain::models::{ScanStatus, StopReason};
use std::future::Future;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Event pushed by the radio adapter while scanning.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    Advertisement(RawAdvertisement),
    Status {
        status: ScanStatus,
        /// Set when `status` is stopped
        stop_reason: Option<StopReason>,
    },
    /// Radio availability changed
    Ready(bool),
}

pub type CentralEventReceiver = mpsc::UnboundedReceiver<CentralEvent>;

pub trait Central: Send + Sync + 'static {
    /// Start scanning for peripherals advertising any of `services`.
    ///
    /// Events flow on the returned channel until the scan stops; the
    /// adapter drops its sender once it has reported the stop.
    fn start_scan(
        &self,
        services: Vec<Uuid>,
    ) -> impl Future<Output = Result<CentralEventReceiver, ScanError>> + Send;

    fn stop_scan(&self) -> impl Future<Output = Result<(), ScanError>> + Send;
}
