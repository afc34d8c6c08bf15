//! Bluetooth Module
//!
//! Discovers Pixels dice and chargers from their BLE advertisements.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      ScanService                        │
//! │  (Public scanner API, start/stop queue, event pump)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌───────────┐
//! │  Central  │  │ ScanEngine │  │  Decoder  │
//! │           │  │            │  │           │
//! │ - Radio   │  │ - Device   │  │ - Layouts │
//! │   events  │  │   list     │  │ - Registry│
//! │           │  │ - Timers   │  │           │
//! └───────────┘  └────────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Service ids, advertisement layouts and raw advertisement type
//! - [`reader`] - Bounds checked little endian reader
//! - [`decoder`] - Per kind advertisement decoders
//! - [`central`] - Radio adapter contract
//! - [`scanner`] - btleplug radio adapter
//! - [`engine`] - Device list, debounced notifications and keep-alive
//! - [`queue`] - FIFO queue for start/stop requests
//! - [`service`] - Main scanner service

pub mod central;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod reader;
pub mod scanner;
pub mod service;

// Re-export main service for convenience
pub use service::ScanService;
