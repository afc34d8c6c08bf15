//! Scan Service Module
//!
//! Public scanner API. Drives a [`ScanEngine`] from the radio event stream
//! and the engine's own timers, and publishes its events to subscribers.
//!
//! Start and stop requests go through an [`OperationQueue`] so they reach
//! the radio one at a time and in call order.

use super::central::{Central, CentralEvent, CentralEventReceiver};
use super::decoder::AdvertisementDecoder;
use super::engine::{ScanEngine, ScanFilter};
use super::error::ScanError;
use super::protocol::SCAN_SERVICE_UUIDS;
use super::queue::OperationQueue;
use crate::domain::models::{ScanEvent, ScanStatus, ScannedDevice, StopReason};
use crate::domain::registry::DeviceRegistry;
use crate::infrastructure::clock::{Clock, SystemClock};
use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State shared between the service and its event pump task.
struct Shared {
    engine: Mutex<ScanEngine>,
    events: broadcast::Sender<ScanEvent>,
    // Wakes the pump after a timer was re-armed from outside
    wake: Notify,
    ready: AtomicBool,
    // Set while a requested stop is in progress, the radio closing its
    // stream then isn't a radio loss
    stopping: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn engine(&self) -> MutexGuard<'_, ScanEngine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` on the engine and publish what it returns. Publishing under
    /// the lock keeps events in the order the engine produced them.
    fn apply<F>(&self, f: F)
    where
        F: FnOnce(&mut ScanEngine) -> Vec<ScanEvent>,
    {
        let mut engine = self.engine();
        for event in f(&mut engine) {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    fn set_ready(&self, ready: bool) {
        if self.ready.swap(ready, Ordering::SeqCst) != ready {
            info!("Bluetooth radio ready: {}", ready);
            let _ = self.events.send(ScanEvent::IsReady(ready));
        }
    }

    fn abort_pump(&self) {
        let handle = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Scanner for Pixels dice and chargers.
pub struct ScanService<C: Central> {
    central: Arc<C>,
    queue: OperationQueue,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    registry: Arc<DeviceRegistry>,
}

impl<C: Central> ScanService<C> {
    /// Create a scanner using the process-wide operation queue and the wall
    /// clock.
    pub fn new(central: Arc<C>, decoder: AdvertisementDecoder) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::clone(decoder.registry());
        Self {
            central,
            queue: OperationQueue::shared(),
            clock: Arc::new(SystemClock),
            shared: Arc::new(Shared {
                engine: Mutex::new(ScanEngine::new(decoder)),
                events,
                wake: Notify::new(),
                ready: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                pump: Mutex::new(None),
            }),
            registry,
        }
    }

    pub fn with_queue(mut self, queue: OperationQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn status(&self) -> ScanStatus {
        self.shared.engine().status()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shared.engine().stop_reason()
    }

    /// Last radio availability reported by the adapter.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// Devices currently held, in first-seen order.
    pub fn scanned_devices(&self) -> Vec<ScannedDevice> {
        self.shared.engine().devices().to_vec()
    }

    pub fn min_notify_interval(&self) -> Duration {
        self.shared.engine().min_notify_interval()
    }

    pub fn keep_alive_duration(&self) -> Duration {
        self.shared.engine().keep_alive_duration()
    }

    /// Only affects advertisements received after the call.
    pub fn set_scan_filter(&self, filter: Option<ScanFilter>) {
        self.shared.engine().set_scan_filter(filter);
    }

    pub fn set_min_notify_interval(&self, interval: Duration) {
        self.shared.engine().set_min_notify_interval(interval);
        self.shared.wake.notify_one();
    }

    pub fn set_keep_alive_duration(&self, duration: Duration) {
        self.shared.engine().set_keep_alive_duration(duration);
        self.shared.wake.notify_one();
    }

    /// Start scanning. Does nothing if a scan is already running.
    ///
    /// On failure the status goes back to stopped, with
    /// [`StopReason::FailedToStart`] unless the radio is missing or access
    /// was denied, and the error is returned.
    pub async fn start_async(&self) -> Result<(), ScanError> {
        self.queue
            .run(async {
                if self.status() != ScanStatus::Stopped {
                    debug!("Scan already running");
                    return Ok(());
                }

                let now = self.clock.now();
                self.shared.apply(|engine| {
                    let mut events = engine.prepare_start(now);
                    events.extend(engine.on_status(ScanStatus::Starting, None, now));
                    events
                });

                info!("Starting BLE scan");
                match self.central.start_scan(SCAN_SERVICE_UUIDS.to_vec()).await {
                    Ok(receiver) => {
                        let now = self.clock.now();
                        self.shared
                            .apply(|engine| engine.on_status(ScanStatus::Scanning, None, now));
                        self.shared.stopping.store(false, Ordering::SeqCst);
                        self.spawn_pump(receiver);
                        Ok(())
                    }
                    Err(e) => {
                        error!("Failed to start scan: {}", e);
                        let reason = match e {
                            ScanError::Unauthorized => StopReason::Unauthorized,
                            ScanError::RadioUnavailable => StopReason::RadioUnavailable,
                            _ => StopReason::FailedToStart,
                        };
                        let now = self.clock.now();
                        self.shared.apply(|engine| {
                            engine.on_status(ScanStatus::Stopped, Some(reason), now)
                        });
                        Err(e)
                    }
                }
            })
            .await
    }

    /// Stop scanning. Held devices are kept and pending changes are
    /// notified right away.
    pub async fn stop_async(&self) -> Result<(), ScanError> {
        self.queue
            .run(async {
                self.shared.engine().cancel_timers();
                if self.status() == ScanStatus::Stopped {
                    return Ok(());
                }

                info!("Stopping BLE scan");
                self.shared.stopping.store(true, Ordering::SeqCst);
                self.shared.abort_pump();
                let result = self.central.stop_scan().await;
                if let Err(e) = &result {
                    warn!("Failed to stop scan: {}", e);
                }
                let now = self.clock.now();
                self.shared.apply(|engine| {
                    engine.on_status(ScanStatus::Stopped, Some(StopReason::Success), now)
                });
                result
            })
            .await
    }

    /// Forget every held device.
    pub async fn clear_async(&self) {
        self.queue
            .run(async {
                let now = self.clock.now();
                self.shared.apply(|engine| engine.clear(now));
            })
            .await
    }

    fn spawn_pump(&self, receiver: CentralEventReceiver) {
        let handle = tokio::spawn(pump(
            Arc::clone(&self.shared),
            Arc::clone(&self.clock),
            receiver,
        ));
        let previous = self
            .shared
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl<C: Central> Drop for ScanService<C> {
    fn drop(&mut self) {
        self.shared.abort_pump();
    }
}

/// Feed radio events and due timers to the engine until the radio closes
/// its event stream.
async fn pump(shared: Arc<Shared>, clock: Arc<dyn Clock>, mut receiver: CentralEventReceiver) {
    loop {
        let deadline = shared.engine().next_deadline();
        let timer = async {
            match deadline {
                Some(at) => {
                    let wait = at.duration_since(clock.now()).unwrap_or_default();
                    tokio::time::sleep(wait).await;
                }
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = receiver.recv() => match event {
                Some(event) => handle_event(&shared, event, &*clock),
                None => break,
            },
            _ = timer => {
                let now = clock.now();
                shared.apply(|engine| engine.on_timer(now));
            }
            _ = shared.wake.notified() => {}
        }
    }

    debug!("Radio event stream closed");
    if shared.stopping.load(Ordering::SeqCst) {
        return;
    }
    let now = clock.now();
    shared.apply(|engine| {
        if engine.status() == ScanStatus::Stopped {
            return Vec::new();
        }
        warn!("Radio stopped reporting without a stop status");
        engine.on_status(ScanStatus::Stopped, Some(StopReason::RadioUnavailable), now)
    });
}

fn handle_event(shared: &Shared, event: CentralEvent, clock: &dyn Clock) {
    let now = clock.now();
    match event {
        CentralEvent::Advertisement(adv) => {
            shared.apply(|engine| engine.on_advertisement(&adv, now));
        }
        CentralEvent::Status {
            status,
            stop_reason,
        } => {
            if status == ScanStatus::Stopped && shared.stopping.load(Ordering::SeqCst) {
                return;
            }
            shared.apply(|engine| engine.on_status(status, stop_reason, now));
        }
        CentralEvent::Ready(ready) => shared.set_ready(ready),
    }
}
