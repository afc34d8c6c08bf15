//! Scan engine
//!
//! Keeps the list of visible devices, batches change notifications and
//! evicts devices that stopped advertising. The engine is a plain state
//! machine: it never reads the clock or sleeps. Its driver passes `now` to
//! every call, asks [`ScanEngine::next_deadline`] when to wake up and then
//! calls [`ScanEngine::on_timer`].
//!
//! Two timers exist:
//!
//! - notify: fires a batch once `min_notify_interval` has elapsed since the
//!   previous batch
//! - prune: fires when the oldest held device outlives the keep-alive
//!   window, re-armed after each run for the next expiry

use super::decoder::AdvertisementDecoder;
use super::protocol::RawAdvertisement;
use crate::domain::models::{
    DeviceKind, PixelId, ScanEvent, ScanListOperation, ScanStatus, ScannedDevice, StopReason,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace, warn};

/// Devices are pruned once strictly older than the keep-alive window, so
/// the prune timer fires one tick after the exact expiry.
const PRUNE_RESOLUTION: Duration = Duration::from_millis(1);

pub const DEFAULT_MIN_NOTIFY_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_KEEP_ALIVE_DURATION: Duration = Duration::from_millis(5000);

/// Predicate selecting which scanned devices are kept.
pub type ScanFilter = Arc<dyn Fn(&ScannedDevice) -> bool + Send + Sync>;

pub struct ScanEngine {
    decoder: AdvertisementDecoder,
    // First-seen order
    devices: Vec<ScannedDevice>,
    touched: Vec<PixelId>,
    touched_dice: bool,
    touched_chargers: bool,
    cleared: bool,
    filter: Option<ScanFilter>,
    min_notify_interval: Duration,
    keep_alive_duration: Duration,
    last_flush: SystemTime,
    notify_at: Option<SystemTime>,
    prune_at: Option<SystemTime>,
    status: ScanStatus,
    stop_reason: Option<StopReason>,
}

impl fmt::Debug for ScanEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanEngine")
            .field("devices", &self.devices.len())
            .field("touched", &self.touched)
            .field("status", &self.status)
            .field("notify_at", &self.notify_at)
            .field("prune_at", &self.prune_at)
            .finish_non_exhaustive()
    }
}

impl ScanEngine {
    pub fn new(decoder: AdvertisementDecoder) -> Self {
        Self {
            decoder,
            devices: Vec::new(),
            touched: Vec::new(),
            touched_dice: false,
            touched_chargers: false,
            cleared: false,
            filter: None,
            min_notify_interval: DEFAULT_MIN_NOTIFY_INTERVAL,
            keep_alive_duration: DEFAULT_KEEP_ALIVE_DURATION,
            last_flush: UNIX_EPOCH,
            notify_at: None,
            prune_at: None,
            status: ScanStatus::Stopped,
            stop_reason: None,
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn devices(&self) -> &[ScannedDevice] {
        &self.devices
    }

    pub fn min_notify_interval(&self) -> Duration {
        self.min_notify_interval
    }

    pub fn keep_alive_duration(&self) -> Duration {
        self.keep_alive_duration
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.touched.is_empty() || self.cleared
    }

    /// Earliest armed timer.
    pub fn next_deadline(&self) -> Option<SystemTime> {
        match (self.notify_at, self.prune_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Only applies to advertisements received from now on.
    pub fn set_scan_filter(&mut self, filter: Option<ScanFilter>) {
        self.filter = filter;
    }

    /// Change the notify interval, moving a pending notification to the
    /// new deadline.
    pub fn set_min_notify_interval(&mut self, interval: Duration) {
        if self.min_notify_interval == interval {
            return;
        }
        self.min_notify_interval = interval;
        if self.notify_at.is_some() {
            self.notify_at = Some(self.last_flush + interval);
        }
    }

    /// Change the keep-alive window. Zero keeps devices until an abnormal
    /// stop.
    pub fn set_keep_alive_duration(&mut self, duration: Duration) {
        if self.keep_alive_duration == duration {
            return;
        }
        self.keep_alive_duration = duration;
        if self.status == ScanStatus::Stopped {
            self.prune_at = None;
        } else {
            self.arm_prune();
        }
    }

    pub fn cancel_timers(&mut self) {
        self.notify_at = None;
        self.prune_at = None;
    }

    /// Flush what's pending and drop expired devices before a new scan.
    pub fn prepare_start(&mut self, now: SystemTime) -> Vec<ScanEvent> {
        let mut events = self.flush(now);
        if self.prune_expired(now) {
            events.extend(self.flush(now));
        }
        self.prune_at = None;
        events
    }

    /// Empty the list. A cleared operation is always sent, even for an
    /// empty list.
    pub fn clear(&mut self, now: SystemTime) -> Vec<ScanEvent> {
        self.devices.clear();
        self.touched.clear();
        self.cleared = true;
        self.touched_dice = true;
        self.touched_chargers = true;
        self.prune_at = None;
        self.flush(now)
    }

    pub fn on_advertisement(&mut self, adv: &RawAdvertisement, now: SystemTime) -> Vec<ScanEvent> {
        let Some(device) = self.decoder.decode(adv, now) else {
            return Vec::new();
        };
        if let Some(filter) = &self.filter {
            if !filter(&device) {
                return Vec::new();
            }
        }

        let pixel_id = device.pixel_id();
        let kind = device.kind();
        match self.devices.iter().position(|d| d.pixel_id() == pixel_id) {
            Some(index) => {
                if self.devices[index].timestamp() >= device.timestamp() {
                    trace!("Dropping out of date advertisement for {}", pixel_id);
                    return Vec::new();
                }
                self.devices[index] = device;
            }
            None => {
                debug!("New {} {} ({})", kind.as_str(), pixel_id, device.name());
                self.devices.push(device);
            }
        }
        self.touch(pixel_id, kind);

        if self.prune_at.is_none() {
            self.arm_prune();
        }
        self.schedule_notify(now)
    }

    pub fn on_status(
        &mut self,
        status: ScanStatus,
        stop_reason: Option<StopReason>,
        now: SystemTime,
    ) -> Vec<ScanEvent> {
        if self.status == status {
            return Vec::new();
        }
        let stop_reason = match status {
            ScanStatus::Stopped => Some(stop_reason.unwrap_or(StopReason::Success)),
            _ => None,
        };
        match stop_reason {
            Some(reason) => info!(
                "Scan status changed from {:?} to {:?} ({:?})",
                self.status, status, reason
            ),
            None => info!("Scan status changed from {:?} to {:?}", self.status, status),
        }

        self.cancel_timers();
        self.status = status;
        self.stop_reason = stop_reason;
        let mut events = vec![ScanEvent::Status {
            status,
            stop_reason,
        }];

        match status {
            ScanStatus::Starting => {
                if !self.touched.is_empty() {
                    warn!(
                        "Scan starting with {} unreported device changes, discarding them",
                        self.touched.len()
                    );
                    self.touched.clear();
                    self.touched_dice = false;
                    self.touched_chargers = false;
                }
            }
            ScanStatus::Scanning => {
                self.arm_prune();
                if self.has_pending_changes() {
                    events.extend(self.schedule_notify(now));
                }
            }
            ScanStatus::Stopped => {
                let abnormal = stop_reason.is_some_and(|r| r.is_abnormal());
                if abnormal && !self.keep_alive_duration.is_zero() {
                    // Without the radio, presence can't be trusted anymore
                    info!("Evicting {} devices after abnormal stop", self.devices.len());
                    for device in std::mem::take(&mut self.devices) {
                        self.touch(device.pixel_id(), device.kind());
                    }
                }
                events.extend(self.flush(now));
            }
        }
        events
    }

    /// Run the timers that are due.
    pub fn on_timer(&mut self, now: SystemTime) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        if self.prune_at.is_some_and(|at| at <= now) {
            self.prune_at = None;
            self.prune_expired(now);
            self.arm_prune();
            if self.has_pending_changes() {
                events.extend(self.schedule_notify(now));
            }
        }
        if self.notify_at.is_some_and(|at| at <= now) {
            events.extend(self.flush(now));
        }
        events
    }

    fn touch(&mut self, pixel_id: PixelId, kind: DeviceKind) {
        if !self.touched.contains(&pixel_id) {
            self.touched.push(pixel_id);
        }
        match kind {
            DeviceKind::Die => self.touched_dice = true,
            DeviceKind::Charger | DeviceKind::MultiDeviceCharger => self.touched_chargers = true,
            DeviceKind::Bootloader => {}
        }
    }

    fn schedule_notify(&mut self, now: SystemTime) -> Vec<ScanEvent> {
        let next = self.last_flush + self.min_notify_interval;
        if now >= next {
            self.flush(now)
        } else {
            if self.notify_at.is_none() {
                self.notify_at = Some(next);
            }
            Vec::new()
        }
    }

    /// Remove devices older than the keep-alive window, returns whether any
    /// were removed.
    fn prune_expired(&mut self, now: SystemTime) -> bool {
        if self.keep_alive_duration.is_zero() {
            return false;
        }
        let keep_alive = self.keep_alive_duration;
        let mut expired = Vec::new();
        self.devices.retain(|d| {
            let age = now.duration_since(d.timestamp()).unwrap_or_default();
            let keep = age <= keep_alive;
            if !keep {
                expired.push((d.pixel_id(), d.kind()));
            }
            keep
        });
        for (pixel_id, kind) in &expired {
            debug!("Lost {} {}", kind.as_str(), pixel_id);
            self.touch(*pixel_id, *kind);
        }
        !expired.is_empty()
    }

    fn arm_prune(&mut self) {
        self.prune_at = if self.keep_alive_duration.is_zero() {
            None
        } else {
            self.devices
                .iter()
                .map(|d| d.timestamp())
                .min()
                .map(|oldest| oldest + self.keep_alive_duration + PRUNE_RESOLUTION)
        };
    }

    fn flush(&mut self, now: SystemTime) -> Vec<ScanEvent> {
        self.last_flush = now;
        self.notify_at = None;
        if !self.has_pending_changes() {
            return Vec::new();
        }

        let mut ops = Vec::with_capacity(self.touched.len() + 1);
        if std::mem::take(&mut self.cleared) {
            ops.push(ScanListOperation::Cleared);
        }
        for pixel_id in std::mem::take(&mut self.touched) {
            ops.push(match self.devices.iter().find(|d| d.pixel_id() == pixel_id) {
                Some(device) => ScanListOperation::Scanned {
                    device: device.clone(),
                },
                None => ScanListOperation::Removed { pixel_id },
            });
        }
        trace!("Notifying {} scan list operations", ops.len());

        let mut events = vec![ScanEvent::ScanListOperations(ops)];
        if std::mem::take(&mut self.touched_dice) {
            let dice = self
                .devices
                .iter()
                .filter_map(|d| d.as_die().cloned())
                .collect();
            events.push(ScanEvent::ScannedDice(dice));
        }
        if std::mem::take(&mut self.touched_chargers) {
            let chargers = self
                .devices
                .iter()
                .filter(|d| d.kind().is_charger())
                .cloned()
                .collect();
            events.push(ScanEvent::ScannedChargers(chargers));
        }
        events
    }
}
