//! ThermSmart advertisement parsing for passive monitoring.
//!
//! ThermSmart sensors broadcast their readings in the manufacturer data of
//! every advertisement, so readings can be collected without connecting.
//! The manufacturer payload (after the `0x4842` company id) carries the
//! sensor's own address, little-endian, followed by the reading body decoded
//! by [`thermsmart_types::decode_advertisement_fields`].
//!
//! Foreign or truncated payloads are not errors here: they produce an
//! [`AdvertisementOutcome`] with no readings and a [`Diagnostic`] explaining
//! why, since a scanner routinely hears advertisements it cannot use.

use std::collections::HashMap;
use std::fmt;

use thermsmart_types::uuid::{ADVERTISEMENT_HEADER_LEN, MANUFACTURER_ID, THERMSMART_SERVICE};
use thermsmart_types::{ParseError, Reading, decode_advertisement_fields};

use crate::radio::Advertisement;
use crate::util::{format_le_address, is_unknown_address, normalize_address};

/// Length of the embedded address.
const ADDRESS_LEN: usize = 6;

/// Bytes of header left in the manufacturer payload once the platform has
/// stripped the 2-byte company id.
const PAYLOAD_HEADER_LEN: usize = ADVERTISEMENT_HEADER_LEN - 2;

/// Why an advertisement produced no readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// No manufacturer data under the ThermSmart company id.
    ForeignManufacturer,
    /// Header present but no body bytes.
    TooShort {
        /// Manufacturer payload length.
        len: usize,
    },
    /// The body was rejected by the decoder.
    Undecodable(ParseError),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::ForeignManufacturer => {
                write!(f, "no manufacturer data for company 0x{MANUFACTURER_ID:04X}")
            }
            Diagnostic::TooShort { len } => {
                write!(f, "manufacturer payload too short ({len} bytes)")
            }
            Diagnostic::Undecodable(err) => write!(f, "undecodable body: {err}"),
        }
    }
}

/// Result of parsing one advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisementOutcome {
    /// Address embedded in the payload, normalized; `None` without a header.
    pub embedded_address: Option<String>,
    /// Decoded readings; empty when `diagnostic` is set.
    pub readings: Vec<Reading>,
    /// Why nothing was decoded.
    pub diagnostic: Option<Diagnostic>,
    /// Fields of a decoded body that were left out of `readings`.
    pub skipped: Vec<ParseError>,
}

impl AdvertisementOutcome {
    fn ignored(embedded_address: Option<String>, diagnostic: Diagnostic) -> Self {
        Self {
            embedded_address,
            readings: Vec::new(),
            diagnostic: Some(diagnostic),
            skipped: Vec::new(),
        }
    }

    /// The address to identify the sensor by: the reported address, or the
    /// embedded one when the platform hides addresses.
    pub fn resolve_address(&self, reported: &str) -> String {
        let reported = normalize_address(reported);
        if is_unknown_address(&reported) {
            self.embedded_address.clone().unwrap_or_default()
        } else {
            reported
        }
    }

    /// Whether the embedded address agrees with the address the radio
    /// reported.
    ///
    /// Platforms that hide addresses report an empty or all-zero address;
    /// the check is skipped for those.
    pub fn address_matches(&self, reported: &str) -> bool {
        let reported = normalize_address(reported);
        if is_unknown_address(&reported) {
            return true;
        }
        self.embedded_address.as_deref() == Some(reported.as_str())
    }
}

/// Whether an advertisement comes from a ThermSmart sensor, judged by the
/// advertised service or the manufacturer id.
pub fn is_thermsmart(advertisement: &Advertisement) -> bool {
    advertisement.services.contains(&THERMSMART_SERVICE)
        || advertisement.manufacturer_data.contains_key(&MANUFACTURER_ID)
}

/// Address of the advertising sensor, falling back to the address embedded
/// in the manufacturer data when the platform hides it.
pub fn sensor_address(advertisement: &Advertisement) -> String {
    let reported = normalize_address(&advertisement.address);
    if !is_unknown_address(&reported) {
        return reported;
    }
    parse_manufacturer_data(&advertisement.manufacturer_data)
        .embedded_address
        .unwrap_or(reported)
}

/// Parse the manufacturer data map of an advertisement.
pub fn parse_manufacturer_data(manufacturer_data: &HashMap<u16, Vec<u8>>) -> AdvertisementOutcome {
    match manufacturer_data.get(&MANUFACTURER_ID) {
        Some(payload) => parse_payload(payload),
        None => AdvertisementOutcome::ignored(None, Diagnostic::ForeignManufacturer),
    }
}

/// Parse a ThermSmart manufacturer payload (company id excluded).
pub fn parse_payload(payload: &[u8]) -> AdvertisementOutcome {
    if payload.len() <= PAYLOAD_HEADER_LEN {
        return AdvertisementOutcome::ignored(
            None,
            Diagnostic::TooShort { len: payload.len() },
        );
    }

    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&payload[..ADDRESS_LEN]);
    let embedded_address = Some(format_le_address(&address));

    match decode_advertisement_fields(&payload[PAYLOAD_HEADER_LEN..]) {
        Ok(decoded) => AdvertisementOutcome {
            embedded_address,
            readings: decoded.readings,
            diagnostic: None,
            skipped: decoded.skipped,
        },
        Err(err) => AdvertisementOutcome::ignored(embedded_address, Diagnostic::Undecodable(err)),
    }
}
