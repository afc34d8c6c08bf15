use pixels_scan::domain::models::{
    ScanEvent, ScanListOperation, ScanStatus, ScannedDevice, StopReason,
};
use pixels_scan::domain::registry::DeviceRegistry;
use pixels_scan::infrastructure::bluetooth::central::{
    Central, CentralEvent, CentralEventReceiver,
};
use pixels_scan::infrastructure::bluetooth::decoder::AdvertisementDecoder;
use pixels_scan::infrastructure::bluetooth::error::ScanError;
use pixels_scan::infrastructure::bluetooth::protocol::{
    ManufacturerData, RawAdvertisement, ServiceData, DIE_SERVICE_UUID,
};
use pixels_scan::infrastructure::bluetooth::queue::OperationQueue;
use pixels_scan::infrastructure::bluetooth::ScanService;
use pixels_scan::infrastructure::clock::{Clock, TokioClock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Radio double recording the calls it receives.
#[derive(Default)]
struct FakeCentral {
    sender: Mutex<Option<mpsc::UnboundedSender<CentralEvent>>>,
    calls: Mutex<Vec<&'static str>>,
    fail_start: AtomicBool,
    start_delay: Duration,
    stop_delay: Duration,
}

impl FakeCentral {
    fn slow(start_delay: Duration) -> Self {
        Self {
            start_delay,
            ..Default::default()
        }
    }

    /// Closes the event stream first, then takes a while to stop the radio.
    fn slow_stop(stop_delay: Duration) -> Self {
        Self {
            stop_delay,
            ..Default::default()
        }
    }

    fn emit(&self, event: CentralEvent) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            sender.send(event).unwrap();
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

impl Central for FakeCentral {
    async fn start_scan(&self, services: Vec<Uuid>) -> Result<CentralEventReceiver, ScanError> {
        assert!(services.contains(&DIE_SERVICE_UUID));
        self.calls.lock().unwrap().push("start");
        tokio::time::sleep(self.start_delay).await;
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ScanError::StartFailed("radio busy".to_string()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(sender);
        Ok(receiver)
    }

    async fn stop_scan(&self) -> Result<(), ScanError> {
        self.calls.lock().unwrap().push("stop");
        self.sender.lock().unwrap().take();
        tokio::time::sleep(self.stop_delay).await;
        Ok(())
    }
}

struct Harness {
    central: Arc<FakeCentral>,
    clock: Arc<TokioClock>,
    scanner: ScanService<FakeCentral>,
    events: broadcast::Receiver<ScanEvent>,
}

impl Harness {
    fn new(central: FakeCentral, min_notify_ms: u64, keep_alive_ms: u64) -> Self {
        let central = Arc::new(central);
        let clock = Arc::new(TokioClock::new(
            UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        ));
        let scanner = ScanService::new(
            Arc::clone(&central),
            AdvertisementDecoder::new(Arc::new(DeviceRegistry::new())),
        )
        .with_queue(OperationQueue::new())
        .with_clock(clock.clone());
        scanner.set_min_notify_interval(Duration::from_millis(min_notify_ms));
        scanner.set_keep_alive_duration(Duration::from_millis(keep_alive_ms));
        let events = scanner.subscribe();
        Self {
            central,
            clock,
            scanner,
            events,
        }
    }

    fn advertise(&self, pixel_id: u32, battery: u8) {
        let adv = die_advertisement(pixel_id, self.clock.now(), battery);
        self.central.emit(CentralEvent::Advertisement(adv));
    }

    fn drain(&mut self) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn die_advertisement(pixel_id: u32, at: SystemTime, battery: u8) -> RawAdvertisement {
    let mut service = pixel_id.to_le_bytes().to_vec();
    service.extend_from_slice(&1_690_000_000u32.to_le_bytes());
    RawAdvertisement {
        system_id: format!("device-{}", pixel_id),
        name: "Pixel".to_string(),
        local_name: None,
        address: None,
        rssi: -62,
        timestamp: at,
        services: vec![DIE_SERVICE_UUID],
        manufacturer_data: vec![ManufacturerData {
            company_id: 0xFFFF,
            data: vec![20, 0x11, 1, 0, battery],
        }],
        service_data: vec![ServiceData {
            uuid: DIE_SERVICE_UUID,
            data: service,
        }],
    }
}

fn operations(events: &[ScanEvent]) -> Vec<Vec<ScanListOperation>> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::ScanListOperations(ops) => Some(ops.clone()),
            _ => None,
        })
        .collect()
}

fn statuses(events: &[ScanEvent]) -> Vec<(ScanStatus, Option<StopReason>)> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Status {
                status,
                stop_reason,
            } => Some((*status, *stop_reason)),
            _ => None,
        })
        .collect()
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn advertisements_are_batched_after_start() {
    let mut h = Harness::new(FakeCentral::default(), 200, 0);
    h.scanner.start_async().await.unwrap();
    assert_eq!(h.scanner.status(), ScanStatus::Scanning);

    h.advertise(1, 50);
    settle(20).await;
    h.advertise(2, 60);
    settle(300).await;

    let events = h.drain();
    assert_eq!(
        statuses(&events),
        vec![(ScanStatus::Starting, None), (ScanStatus::Scanning, None)]
    );
    let batches = operations(&events);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert!(events
        .iter()
        .any(|e| matches!(e, ScanEvent::ScannedDice(dice) if dice.len() == 2)));
    assert_eq!(h.scanner.scanned_devices().len(), 2);
    assert_eq!(h.scanner.registry().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_start_returns_error_and_stops() {
    let central = FakeCentral::default();
    central.fail_start.store(true, Ordering::SeqCst);
    let mut h = Harness::new(central, 200, 5000);

    let result = h.scanner.start_async().await;
    assert!(matches!(result, Err(ScanError::StartFailed(_))));
    assert_eq!(h.scanner.status(), ScanStatus::Stopped);
    assert_eq!(h.scanner.stop_reason(), Some(StopReason::FailedToStart));
    assert_eq!(
        statuses(&h.drain()),
        vec![
            (ScanStatus::Starting, None),
            (ScanStatus::Stopped, Some(StopReason::FailedToStart)),
        ]
    );

    // Next attempt goes to the radio again
    h.central.fail_start.store(false, Ordering::SeqCst);
    h.scanner.start_async().await.unwrap();
    assert_eq!(h.central.calls(), vec!["start", "start"]);
}

#[tokio::test(start_paused = true)]
async fn start_while_scanning_is_a_no_op() {
    let h = Harness::new(FakeCentral::default(), 200, 5000);
    h.scanner.start_async().await.unwrap();
    h.scanner.start_async().await.unwrap();
    assert_eq!(h.central.calls(), vec!["start"]);
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_reach_the_radio_in_call_order() {
    let h = Harness::new(FakeCentral::slow(Duration::from_millis(50)), 200, 5000);

    let (first, stop, second) = tokio::join!(
        h.scanner.start_async(),
        h.scanner.stop_async(),
        h.scanner.start_async(),
    );
    first.unwrap();
    stop.unwrap();
    second.unwrap();

    assert_eq!(h.central.calls(), vec!["start", "stop", "start"]);
    assert_eq!(h.scanner.status(), ScanStatus::Scanning);
}

#[tokio::test(start_paused = true)]
async fn stop_keeps_devices_and_flushes_pending_changes() {
    let mut h = Harness::new(FakeCentral::default(), 1000, 5000);
    h.scanner.start_async().await.unwrap();
    h.advertise(1, 50);
    settle(10).await;
    assert!(operations(&h.drain()).is_empty());

    h.scanner.stop_async().await.unwrap();
    let events = h.drain();
    assert_eq!(operations(&events).len(), 1);
    assert_eq!(
        statuses(&events),
        vec![(ScanStatus::Stopped, Some(StopReason::Success))]
    );
    assert_eq!(h.scanner.scanned_devices().len(), 1);

    // Timers are cancelled, nothing gets pruned while stopped
    settle(10_000).await;
    assert!(h.drain().is_empty());
    assert_eq!(h.scanner.scanned_devices().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn requested_stop_is_not_a_radio_loss() {
    let mut h = Harness::new(FakeCentral::slow_stop(Duration::from_millis(1)), 0, 5000);
    h.scanner.start_async().await.unwrap();
    h.advertise(1, 50);
    settle(10).await;
    h.drain();

    h.scanner.stop_async().await.unwrap();
    assert_eq!(h.scanner.status(), ScanStatus::Stopped);
    assert_eq!(h.scanner.stop_reason(), Some(StopReason::Success));
    assert_eq!(h.scanner.scanned_devices().len(), 1);

    let events = h.drain();
    assert_eq!(
        statuses(&events),
        vec![(ScanStatus::Stopped, Some(StopReason::Success))]
    );
    assert!(operations(&events).is_empty());

    // A new scan after the stop still reports radio loss as usual
    h.scanner.start_async().await.unwrap();
    h.central.emit(CentralEvent::Status {
        status: ScanStatus::Stopped,
        stop_reason: Some(StopReason::RadioOff),
    });
    settle(10).await;
    assert_eq!(h.scanner.stop_reason(), Some(StopReason::RadioOff));
    assert!(h.scanner.scanned_devices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_device_is_removed_after_keep_alive() {
    let mut h = Harness::new(FakeCentral::default(), 0, 5000);
    h.scanner.start_async().await.unwrap();
    h.advertise(1, 50);
    settle(4900).await;
    assert_eq!(h.scanner.scanned_devices().len(), 1);

    settle(200).await;
    assert!(h.scanner.scanned_devices().is_empty());
    let batches = operations(&h.drain());
    assert_eq!(
        batches.last().unwrap(),
        &vec![ScanListOperation::Removed {
            pixel_id: pixels_scan::domain::models::PixelId::new(1).unwrap()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn radio_loss_evicts_every_device() {
    let mut h = Harness::new(FakeCentral::default(), 0, 5000);
    h.scanner.start_async().await.unwrap();
    h.advertise(1, 50);
    h.advertise(2, 50);
    settle(10).await;
    h.drain();

    h.central.emit(CentralEvent::Ready(false));
    h.central.emit(CentralEvent::Status {
        status: ScanStatus::Stopped,
        stop_reason: Some(StopReason::RadioOff),
    });
    settle(10).await;

    assert!(h.scanner.scanned_devices().is_empty());
    assert!(!h.scanner.is_ready());
    let events = h.drain();
    assert_eq!(
        statuses(&events),
        vec![(ScanStatus::Stopped, Some(StopReason::RadioOff))]
    );
    let removed = operations(&events).concat();
    assert_eq!(removed.len(), 2);
    assert!(removed
        .iter()
        .all(|op| matches!(op, ScanListOperation::Removed { .. })));
}

#[tokio::test(start_paused = true)]
async fn readiness_is_republished() {
    let mut h = Harness::new(FakeCentral::default(), 200, 5000);
    h.scanner.start_async().await.unwrap();
    assert!(!h.scanner.is_ready());

    h.central.emit(CentralEvent::Ready(true));
    h.central.emit(CentralEvent::Ready(true));
    settle(10).await;

    assert!(h.scanner.is_ready());
    let ready: Vec<_> = h
        .drain()
        .into_iter()
        .filter(|e| matches!(e, ScanEvent::IsReady(_)))
        .collect();
    assert_eq!(ready, vec![ScanEvent::IsReady(true)]);
}

#[tokio::test(start_paused = true)]
async fn interval_change_applies_to_pending_batch() {
    let mut h = Harness::new(FakeCentral::default(), 10_000, 0);
    h.scanner.start_async().await.unwrap();
    h.advertise(1, 50);
    settle(10).await;

    h.scanner.set_min_notify_interval(Duration::from_millis(100));
    settle(150).await;
    assert_eq!(operations(&h.drain()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn filter_applies_to_new_advertisements_only() {
    let mut h = Harness::new(FakeCentral::default(), 0, 0);
    h.scanner.start_async().await.unwrap();
    h.advertise(1, 50);
    settle(10).await;

    h.scanner
        .set_scan_filter(Some(Arc::new(|d: &ScannedDevice| d.pixel_id().get() == 2)));
    h.advertise(1, 40);
    h.advertise(2, 40);
    settle(10).await;

    let devices = h.scanner.scanned_devices();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].as_die().unwrap().battery_level, 50);
    h.drain();
}

#[tokio::test(start_paused = true)]
async fn clear_empties_the_list() {
    let mut h = Harness::new(FakeCentral::default(), 0, 0);
    h.scanner.start_async().await.unwrap();
    h.advertise(1, 50);
    settle(10).await;
    h.drain();

    h.scanner.clear_async().await;
    assert!(h.scanner.scanned_devices().is_empty());
    assert_eq!(
        operations(&h.drain()),
        vec![vec![ScanListOperation::Cleared]]
    );
}
