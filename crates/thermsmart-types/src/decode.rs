//! Decoding of ThermSmart binary payloads.
//!
//! Two payload families exist:
//!
//! - **Advertisement body** (compact/legacy format), broadcast without a
//!   connection. Temperatures use a two-stage rounding rule and every field is
//!   preceded by a status check for sentinel codes.
//! - **Command response**, the notification answering
//!   [`GET_SENSOR_DATA`](crate::uuid::GET_SENSOR_DATA). Temperatures use a
//!   single-stage formula and never carry sentinels.
//!
//! The two temperature formulas differ for odd raw deltas and are not
//! interchangeable:
//!
//! ```
//! use thermsmart_types::decode::{command_temperature, legacy_temperature};
//! use thermsmart_types::ReadingValue;
//!
//! let data = (0x3000u16 + 101).to_le_bytes();
//! assert_eq!(legacy_temperature(&data, 0).unwrap(), ReadingValue::Measured(5.0));
//! assert_eq!(command_temperature(&data, 0).unwrap(), 5.05);
//! ```
//!
//! All functions here are pure and total: malformed input yields a
//! [`ParseError`], never a panic.

use bytes::Buf;

use crate::error::{ParseError, ParseResult};
use crate::types::{
    CommandResponse, Reading, ReadingKind, ReadingValue, SensorLocation, Sentinel,
};
use crate::uuid::GET_SENSOR_DATA;

/// Minimum advertisement body length (battery, type, three temperatures).
pub const MIN_ADVERTISEMENT_BYTES: usize = 8;

/// Advertisement body length from which humidity fields are present.
pub const MIN_ADVERTISEMENT_HUMIDITY_BYTES: usize = 11;

/// Minimum command response length.
pub const MIN_COMMAND_RESPONSE_BYTES: usize = 14;

/// Offset of the indoor temperature in a command response.
pub const INDOOR_TEMPERATURE_OFFSET: usize = 3;

/// Offset of the indoor relative humidity in a command response.
pub const RELATIVE_HUMIDITY_OFFSET: usize = 9;

/// Offset of the outdoor temperature in a command response.
pub const OUTDOOR_TEMPERATURE_OFFSET: usize = 12;

/// Raw temperature value corresponding to 0 °C.
const TEMPERATURE_ZERO: u16 = 0x3000;

/// Sensor-type codes (low 3 bits of the type byte) the decoder accepts.
const KNOWN_SENSOR_TYPES: [u8; 4] = [1, 3, 4, 7];

/// Interpret a status byte.
///
/// Returns `None` when the accompanying value is a measurement, including
/// the `0xF0..=0xF9` range which flags a negative reading.
#[must_use]
pub fn sentinel_for_status(status: u8) -> Option<Sentinel> {
    let low = status & 0x0F;
    match status >> 4 {
        0xF => match low {
            0xF => Some(Sentinel::Invalid),
            0xE => Some(Sentinel::SensorError),
            _ => None,
        },
        0xE => match low {
            0x0 => Some(Sentinel::TooHigh),
            0x1 => Some(Sentinel::TooLow),
            _ => Some(Sentinel::OutOfRange),
        },
        _ => None,
    }
}

/// Convert a byte whose hex digits spell a decimal number (`0x42` → 42).
///
/// # Errors
///
/// Returns [`ParseError::InvalidValue`] if either nibble is above 9.
pub fn hex_digits_to_decimal(byte: u8) -> ParseResult<u8> {
    let (high, low) = (byte >> 4, byte & 0x0F);
    if high > 9 || low > 9 {
        return Err(ParseError::InvalidValue(format!(
            "0x{byte:02X} is not a two-digit decimal value"
        )));
    }
    Ok(high * 10 + low)
}

fn read_u16_le(data: &[u8], offset: usize) -> ParseResult<u16> {
    let end = offset + 2;
    if data.len() < end {
        return Err(ParseError::InsufficientBytes {
            expected: end,
            actual: data.len(),
        });
    }
    let mut buf = &data[offset..end];
    Ok(buf.get_u16_le())
}

fn read_u8(data: &[u8], offset: usize) -> ParseResult<u8> {
    data.get(offset)
        .copied()
        .ok_or(ParseError::InsufficientBytes {
            expected: offset + 1,
            actual: data.len(),
        })
}

/// Decode a temperature in the advertisement format.
///
/// The byte after `offset` (the high byte of the value) doubles as a status
/// byte and is checked for sentinels first. Otherwise the value is
/// `round((raw - 0x3000) / 2) / 10` with ties rounded to even. Rounding
/// halves away from zero would differ for odd deltas: `0x3000 + 101` decodes
/// to 5.0 here, not 5.1.
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] if the field runs past the buffer.
pub fn legacy_temperature(data: &[u8], offset: usize) -> ParseResult<ReadingValue> {
    let raw = read_u16_le(data, offset)?;
    if let Some(sentinel) = sentinel_for_status(data[offset + 1]) {
        return Ok(ReadingValue::Sentinel(sentinel));
    }

    let half_tenths = (f64::from(raw) - f64::from(TEMPERATURE_ZERO)) / 2.0;
    Ok(ReadingValue::Measured(half_tenths.round_ties_even() / 10.0))
}

/// Decode a humidity byte in the advertisement format.
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] if `offset` is out of bounds and
/// [`ParseError::InvalidValue`] if the byte is neither a sentinel nor two
/// decimal digits.
pub fn legacy_humidity(data: &[u8], offset: usize) -> ParseResult<ReadingValue> {
    let byte = read_u8(data, offset)?;
    if let Some(sentinel) = sentinel_for_status(byte) {
        return Ok(ReadingValue::Sentinel(sentinel));
    }
    Ok(ReadingValue::Measured(f64::from(hex_digits_to_decimal(byte)?)))
}

/// Decode a temperature in the command-response format: `(raw - 0x3000) / 20`.
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] if the field runs past the buffer.
pub fn command_temperature(data: &[u8], offset: usize) -> ParseResult<f64> {
    let raw = read_u16_le(data, offset)?;
    Ok((f64::from(raw) - f64::from(TEMPERATURE_ZERO)) / 20.0)
}

/// Decode a humidity byte in the command-response format.
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] if `offset` is out of bounds and
/// [`ParseError::InvalidValue`] if the byte is not two decimal digits.
pub fn command_humidity(data: &[u8], offset: usize) -> ParseResult<u8> {
    hex_digits_to_decimal(read_u8(data, offset)?)
}

/// Check the tag byte of a command response.
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] for an empty buffer and
/// [`ParseError::UnexpectedResponseTag`] for any tag other than
/// [`GET_SENSOR_DATA`].
pub fn check_response_tag(data: &[u8]) -> ParseResult<()> {
    let tag = read_u8(data, 0)?;
    if tag != GET_SENSOR_DATA {
        return Err(ParseError::UnexpectedResponseTag {
            expected: GET_SENSOR_DATA,
            actual: tag,
        });
    }
    Ok(())
}

/// Readings decoded from an advertisement body, together with the fields
/// that had to be left out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedAdvertisement {
    /// Readings in body order, battery first.
    pub readings: Vec<Reading>,
    /// Why fields were left out of `readings`.
    pub skipped: Vec<ParseError>,
}

/// Decode an advertisement body (manufacturer data after the 8-byte header).
///
/// Layout:
/// - byte 0: battery level (0-100)
/// - byte 1: bits 4-6 origin (1 indoor, 2 outdoor), bits 0-2 sensor type
/// - bytes 2-3, 4-5, 6-7: current, maximum, minimum temperature
/// - bytes 8, 9, 10: current, maximum, minimum humidity (indoor origin only)
///
/// A sensor type outside `{1, 3, 4, 7}` yields the battery level alone, and a
/// humidity byte with non-decimal digits drops that field only. Both are
/// listed in [`DecodedAdvertisement::skipped`].
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] for bodies shorter than
/// [`MIN_ADVERTISEMENT_BYTES`].
pub fn decode_advertisement_fields(body: &[u8]) -> ParseResult<DecodedAdvertisement> {
    if body.len() < MIN_ADVERTISEMENT_BYTES {
        return Err(ParseError::InsufficientBytes {
            expected: MIN_ADVERTISEMENT_BYTES,
            actual: body.len(),
        });
    }

    let battery = body[0];
    let type_byte = body[1];
    let origin = (type_byte & 0x70) >> 4;
    let sensor_type = type_byte & 0x07;

    let mut decoded = DecodedAdvertisement {
        readings: vec![Reading::new(
            None,
            ReadingKind::BatteryLevel,
            ReadingValue::Measured(f64::from(battery)),
        )],
        skipped: Vec::new(),
    };

    if !KNOWN_SENSOR_TYPES.contains(&sensor_type) {
        decoded
            .skipped
            .push(ParseError::UnknownSensorType(sensor_type));
        return Ok(decoded);
    }

    let location = SensorLocation::from_origin(origin);
    let reading = |kind, value| Reading::new(Some(location), kind, value);

    decoded.readings.extend([
        reading(ReadingKind::Temperature, legacy_temperature(body, 2)?),
        reading(ReadingKind::MaxTemperature, legacy_temperature(body, 4)?),
        reading(ReadingKind::MinTemperature, legacy_temperature(body, 6)?),
    ]);

    if location == SensorLocation::Indoor && body.len() >= MIN_ADVERTISEMENT_HUMIDITY_BYTES {
        let fields = [
            (ReadingKind::Humidity, 8),
            (ReadingKind::MaxHumidity, 9),
            (ReadingKind::MinHumidity, 10),
        ];
        for (kind, offset) in fields {
            match legacy_humidity(body, offset) {
                Ok(value) => decoded.readings.push(reading(kind, value)),
                Err(err) => decoded.skipped.push(err),
            }
        }
    }

    Ok(decoded)
}

/// Decode an advertisement body, keeping only the readings.
///
/// See [`decode_advertisement_fields`] for the layout and for which fields
/// are left out.
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] for bodies shorter than
/// [`MIN_ADVERTISEMENT_BYTES`].
pub fn decode_advertisement(body: &[u8]) -> ParseResult<Vec<Reading>> {
    decode_advertisement_fields(body).map(|decoded| decoded.readings)
}

/// Decode a full command response.
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] for responses shorter than
/// [`MIN_COMMAND_RESPONSE_BYTES`], [`ParseError::UnexpectedResponseTag`] for
/// a foreign tag and [`ParseError::InvalidValue`] for malformed humidity.
pub fn decode_command_response(data: &[u8]) -> ParseResult<CommandResponse> {
    if data.len() < MIN_COMMAND_RESPONSE_BYTES {
        return Err(ParseError::InsufficientBytes {
            expected: MIN_COMMAND_RESPONSE_BYTES,
            actual: data.len(),
        });
    }
    check_response_tag(data)?;

    Ok(CommandResponse {
        indoor_temperature: command_temperature(data, INDOOR_TEMPERATURE_OFFSET)?,
        relative_humidity: command_humidity(data, RELATIVE_HUMIDITY_OFFSET)?,
        outdoor_temperature: command_temperature(data, OUTDOOR_TEMPERATURE_OFFSET)?,
    })
}
