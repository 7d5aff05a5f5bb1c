//! Platform-agnostic types for ThermSmart environmental sensors.
//!
//! This crate provides the data model, protocol constants and payload
//! decoders shared by the BLE implementation in `thermsmart-core`. It does no
//! I/O and has no Bluetooth dependency.
//!
//! # Features
//!
//! - Typed readings with explicit sentinel values
//! - Pure decoders for advertisement bodies and command responses
//! - UUID and command constants for the ThermSmart GATT profile
//! - Error types for payload decoding
//!
//! # Example
//!
//! ```
//! use thermsmart_types::{ReadingKind, SensorLocation, decode};
//!
//! let body = [87, 0x11, 0xAA, 0x31, 0xF4, 0x31, 0x72, 0x31];
//! let readings = decode::decode_advertisement(&body).unwrap();
//! assert_eq!(readings[0].kind, ReadingKind::BatteryLevel);
//! assert_eq!(readings[1].sensor, Some(SensorLocation::Indoor));
//! ```

pub mod decode;
pub mod error;
pub mod types;
pub mod uuid;

pub use decode::{
    DecodedAdvertisement, decode_advertisement, decode_advertisement_fields,
    decode_command_response,
};
pub use error::{ParseError, ParseResult};
pub use types::{
    CommandResponse, Reading, ReadingKind, ReadingValue, SensorIdentity, SensorLocation, Sentinel,
};
pub use uuid as uuids;
