//! Core BLE library for ThermSmart temperature/humidity sensors.
//!
//! This crate talks to ThermSmart sensors over Bluetooth Low Energy, either
//! by connecting and issuing the sensor's `0xD2` command or by passively
//! decoding the readings every sensor broadcasts in its advertisements.
//!
//! # Features
//!
//! - **Connected sessions**: indoor/outdoor temperature, humidity and battery
//!   level, with a short-lived payload cache and shared in-flight requests
//! - **Passive monitoring**: readings from advertisements without connecting,
//!   filtered by address and fanned out to subscribers
//! - **Sensor discovery**: list the sensors in range
//! - **Pluggable radio**: a btleplug backend and an in-process mock
//!
//! # Platform Differences
//!
//! - **macOS**: CoreBluetooth hides addresses and reports
//!   `00:00:00:00:00:00`. Sensors embed their own address in the
//!   advertisement, which is used in its place.
//!
//! - **Linux/Windows**: Sensors are identified by their Bluetooth MAC address
//!   (e.g., `AA:BB:CC:DD:EE:FF`).
//!
//! # Quick Start
//!
//! ```no_run
//! use thermsmart_core::{BtleRadio, SensorConfig, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let radio = BtleRadio::new().await?;
//!     let session = Session::new(radio, SensorConfig::default());
//!
//!     println!("Indoor: {:.1} °C", session.get_indoor_temperature().await?);
//!     println!("Humidity: {} %", session.get_relative_humidity().await?);
//!     println!("Outdoor: {:.1} °C", session.get_outdoor_temperature().await?);
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod advertisement;
pub mod btle;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod mock;
pub mod passive;
pub mod radio;
pub mod scan;
pub mod session;
pub mod util;

// Re-export types module and uuid module from thermsmart-types
pub use thermsmart_types::types;
pub use thermsmart_types::uuid;

// Re-export main types
pub use advertisement::{AdvertisementOutcome, Diagnostic, parse_manufacturer_data};
pub use btle::{BtlePeripheral, BtleRadio};
pub use cache::{CachedPayload, PayloadCache};
pub use config::SensorConfig;
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use events::{DisconnectReason, EventReceiver, SessionEvent};
pub use passive::{PassiveReading, PassiveScanner, PassiveScannerOptions};
pub use radio::{
    Advertisement, Characteristic, Notification, PowerState, RadioAdapter, RadioEvent,
    RadioPeripheral,
};
pub use scan::{DiscoveredSensor, ProgressCallback, ScanOptions, ScanProgress, scan_for_sensors};
pub use session::{Session, SessionState};
pub use util::{AddressFilter, normalize_address};

// Re-export from thermsmart-types
pub use thermsmart_types::uuid as uuids;
pub use thermsmart_types::{
    CommandResponse, ParseError, Reading, ReadingKind, ReadingValue, SensorIdentity,
    SensorLocation, Sentinel,
};
