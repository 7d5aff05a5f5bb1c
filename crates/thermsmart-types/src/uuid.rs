//! Bluetooth identifiers and protocol constants for ThermSmart sensors.
//!
//! These values are fixed by the sensor firmware and are not configurable.

use uuid::{Uuid, uuid};

// --- ThermSmart Service UUIDs ---

/// Primary ThermSmart service (16-bit `fff0`), also used as the scan filter.
pub const THERMSMART_SERVICE: Uuid = uuid!("0000fff0-0000-1000-8000-00805f9b34fb");

/// Company identifier carried in the manufacturer-specific advertisement data.
pub const MANUFACTURER_ID: u16 = 0x4842;

// --- ThermSmart Characteristic UUIDs ---

/// Characteristic commands are written to (`fff3`).
pub const WRITE_CHARACTERISTIC: Uuid = uuid!("0000fff3-0000-1000-8000-00805f9b34fb");

/// Characteristic responses are notified on (`fff4`).
pub const NOTIFY_CHARACTERISTIC: Uuid = uuid!("0000fff4-0000-1000-8000-00805f9b34fb");

// --- Standard BLE UUIDs ---

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

/// Battery level characteristic.
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

// --- Commands ---

/// Requests the current sensor data block.
///
/// The sensor answers with a notification whose first byte repeats the
/// command, so this value doubles as the expected response tag.
pub const GET_SENSOR_DATA: u8 = 0xD2;

/// Length of the header preceding the reading body in manufacturer data:
/// the 2-byte company id followed by the 6-byte little-endian device address.
pub const ADVERTISEMENT_HEADER_LEN: usize = 8;
