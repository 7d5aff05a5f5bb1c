//! Error types for payload decoding in thermsmart-types.

use thiserror::Error;

/// Errors that can occur when decoding ThermSmart payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in thermsmart-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The buffer is shorter than the layout requires.
    #[error("Insufficient bytes: expected at least {expected}, got {actual}")]
    InsufficientBytes {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes available.
        actual: usize,
    },

    /// The sensor-type code in an advertisement is not one the decoder knows.
    #[error("Unknown sensor type code: {0}")]
    UnknownSensorType(u8),

    /// A command response did not start with the expected tag byte.
    #[error("Unexpected response tag: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedResponseTag {
        /// Tag the decoder was asked to accept.
        expected: u8,
        /// Tag found in the buffer.
        actual: u8,
    },

    /// A field held a value that cannot be interpreted.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using thermsmart-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
