//! Error types for thermsmart-core.
//!
//! This module defines all error types that can occur when talking to
//! ThermSmart sensors via Bluetooth Low Energy.
//!
//! # Recovery
//!
//! Nothing in this crate retries automatically. The table below lists what a
//! caller can usefully do for each error.
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::RadioUnavailable`] | Wait for the adapter to power on, then retry |
//! | [`Error::DeviceNotFound`] | Check range / address filter, rescan |
//! | [`Error::UnexpectedDisconnect`] | Call the operation again; the session reconnects |
//! | [`Error::ConnectionFailed`] | Retry `connect()`; the session left `Faulted` state cleanly |
//! | [`Error::WriteFailed`] | Retry the read |
//! | [`Error::CharacteristicNotFound`] | Do not retry, firmware mismatch |
//! | [`Error::Decode`] | Do not retry, report the payload |
//! | [`Error::InvalidConfig`] | Fix configuration and restart |
//!
//! [`Error`] is `Clone` so that every caller joining a shared connect or
//! exchange future observes the same failure.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::radio::PowerState;

/// Errors that can occur when communicating with ThermSmart sensors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[source] Arc<btleplug::Error>),

    /// The radio is not powered on (or left the powered-on state).
    #[error("Bluetooth radio unavailable (state: {state})")]
    RadioUnavailable {
        /// The last reported power state.
        state: PowerState,
    },

    /// Device not found during scan.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Characteristic discovery on the connected peripheral failed.
    #[error("Characteristic discovery failed: {0}")]
    CharacteristicDiscoveryFailed(String),

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched {searched} characteristics)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of characteristics that were searched.
        searched: usize,
    },

    /// Enabling notifications failed.
    #[error("Subscribe failed on characteristic {uuid}: {reason}")]
    SubscribeFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Write operation failed.
    #[error("Write failed to characteristic {uuid}: {reason}")]
    WriteFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The link dropped while an operation was in flight.
    #[error("Device disconnected unexpectedly")]
    UnexpectedDisconnect,

    /// Failed to decode data received from device.
    #[error("Invalid data: {0}")]
    Decode(#[from] thermsmart_types::ParseError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Device rejected the connection.
    Rejected,
    /// Generic BLE error.
    BleError(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected => write!(f, "connection rejected by device"),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
        }
    }
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with specified address not found.
    NotFound { identifier: String },
    /// Scan timed out before finding a matching device.
    ScanTimeout { duration: Duration },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::ScanTimeout { duration } => write!(f, "scan timed out after {:?}", duration),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        Error::Bluetooth(Arc::new(err))
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a scan timeout error.
    pub fn scan_timeout(duration: Duration) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::ScanTimeout { duration })
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, searched: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            searched,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Create a write failure.
    pub fn write_failed(uuid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            uuid: uuid.into(),
            reason: reason.into(),
        }
    }

    /// Create a subscribe failure.
    pub fn subscribe_failed(uuid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubscribeFailed {
            uuid: uuid.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using thermsmart-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
