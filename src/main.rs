use pixels_scan::domain::models::{ScanEvent, ScanListOperation, ScannedDevice};
use pixels_scan::domain::notifier::Notifiers;
use pixels_scan::domain::registry::DeviceRegistry;
use pixels_scan::domain::settings::SettingsService;
use pixels_scan::infrastructure::bluetooth::decoder::AdvertisementDecoder;
use pixels_scan::infrastructure::bluetooth::scanner::BtleplugCentral;
use pixels_scan::infrastructure::bluetooth::ScanService;
use pixels_scan::infrastructure::logging;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _log_guard = logging::init_logger(&settings.log_settings)?;
    info!(
        "Starting Pixels scanner (settings: {})",
        settings_service.path().display()
    );

    let central = Arc::new(BtleplugCentral::first_adapter().await?);
    let registry = Arc::new(DeviceRegistry::new());
    let scanner = ScanService::new(central, AdvertisementDecoder::new(registry));
    scanner.set_min_notify_interval(settings.scan.min_notify_interval());
    scanner.set_keep_alive_duration(settings.scan.keep_alive_duration());
    if !settings.scan.kinds.is_empty() {
        let kinds = settings.scan.kinds.clone();
        scanner.set_scan_filter(Some(Arc::new(move |device: &ScannedDevice| {
            kinds.contains(&device.kind())
        })));
    }

    let notifiers = Notifiers::new();
    let mut events = scanner.subscribe();
    scanner.start_async().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ScanEvent::ScanListOperations(ops)) => {
                    notifiers.apply(&ops);
                    for op in &ops {
                        print_operation(op)?;
                    }
                }
                Ok(ScanEvent::Status { status, stop_reason }) => {
                    info!("Scan status: {:?} {:?}", status, stop_reason);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} scan events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down");
    scanner.stop_async().await?;
    Ok(())
}

/// One JSON line per list operation.
fn print_operation(op: &ScanListOperation) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(op)?);
    Ok(())
}
