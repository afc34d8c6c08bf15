//! Error types for decoding and scanning.

use thiserror::Error;

/// An advertisement that could not be turned into a device record.
///
/// Decode errors are logged and the advertisement dropped, they never end
/// a scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("read of {requested} bytes at offset {offset} exceeds {len} byte payload")]
    OutOfRange {
        offset: usize,
        requested: usize,
        len: usize,
    },

    #[error("unsupported advertising data (manufacturer data: {manufacturer} bytes, service data: {service} bytes)")]
    UnsupportedLayout { manufacturer: i32, service: i32 },

    #[error("invalid pixel id")]
    InvalidPixelId,

    #[error("missing system id")]
    MissingSystemId,

    #[error("unrecognized bootloader name '{0}'")]
    BootloaderName(String),
}

/// Failure reported by the radio adapter when starting or stopping a scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("Bluetooth radio is not available")]
    RadioUnavailable,

    #[error("Bluetooth access was not authorized")]
    Unauthorized,

    #[error("Failed to start scan: {0}")]
    StartFailed(String),

    #[error("Failed to stop scan: {0}")]
    StopFailed(String),

    #[error("Bluetooth adapter error: {0}")]
    Adapter(String),
}
