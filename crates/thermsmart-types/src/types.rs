//! Core types for ThermSmart sensor data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which probe a reading originates from.
///
/// Device-level readings such as the battery level carry no location
/// (`Reading::sensor` is `None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SensorLocation {
    /// The probe built into the base station.
    Indoor,
    /// The wireless outdoor probe.
    Outdoor,
    /// The advertisement named an origin the decoder does not recognise.
    Unknown,
}

impl SensorLocation {
    /// Map the origin field (bits 4-6 of the sensor-type byte).
    #[must_use]
    pub fn from_origin(origin: u8) -> Self {
        match origin {
            1 => SensorLocation::Indoor,
            2 => SensorLocation::Outdoor,
            _ => SensorLocation::Unknown,
        }
    }

    /// Lower-case label, as used in reading keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorLocation::Indoor => "indoor",
            SensorLocation::Outdoor => "outdoor",
            SensorLocation::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SensorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The physical quantity a reading describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ReadingKind {
    /// Battery charge in percent.
    BatteryLevel,
    /// Current temperature in °C.
    Temperature,
    /// Minimum recorded temperature in °C.
    #[cfg_attr(feature = "serde", serde(rename = "minimum-temperature"))]
    MinTemperature,
    /// Maximum recorded temperature in °C.
    #[cfg_attr(feature = "serde", serde(rename = "maximum-temperature"))]
    MaxTemperature,
    /// Current relative humidity in percent.
    Humidity,
    /// Minimum recorded relative humidity in percent.
    #[cfg_attr(feature = "serde", serde(rename = "minimum-humidity"))]
    MinHumidity,
    /// Maximum recorded relative humidity in percent.
    #[cfg_attr(feature = "serde", serde(rename = "maximum-humidity"))]
    MaxHumidity,
}

impl ReadingKind {
    /// Lower-case label, as used in reading keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingKind::BatteryLevel => "battery-level",
            ReadingKind::Temperature => "temperature",
            ReadingKind::MinTemperature => "minimum-temperature",
            ReadingKind::MaxTemperature => "maximum-temperature",
            ReadingKind::Humidity => "humidity",
            ReadingKind::MinHumidity => "minimum-humidity",
            ReadingKind::MaxHumidity => "maximum-humidity",
        }
    }

    /// Unit symbol for values of this kind.
    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            ReadingKind::Temperature | ReadingKind::MinTemperature | ReadingKind::MaxTemperature => {
                "°C"
            }
            ReadingKind::BatteryLevel
            | ReadingKind::Humidity
            | ReadingKind::MinHumidity
            | ReadingKind::MaxHumidity => "%",
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reserved codes the sensor substitutes for a measurement.
///
/// Sentinels are legitimate decoded values, not decode failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Sentinel {
    /// No value or no probe attached (status `0xFF`).
    Invalid,
    /// The probe reported an internal error (status `0xFE`).
    SensorError,
    /// The value is above the measurable range (status `0xE0`).
    TooHigh,
    /// The value is below the measurable range (status `0xE1`).
    TooLow,
    /// The probe is out of range (status `0xE2..=0xEF`).
    OutOfRange,
}

impl Sentinel {
    /// Numeric code used by the sensor's legacy interface.
    #[must_use]
    pub fn code(&self) -> f64 {
        match self {
            Sentinel::Invalid | Sentinel::OutOfRange => -999.0,
            Sentinel::SensorError => 254.0,
            Sentinel::TooHigh => 224.0,
            Sentinel::TooLow => 225.0,
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentinel::Invalid => write!(f, "invalid"),
            Sentinel::SensorError => write!(f, "sensor error"),
            Sentinel::TooHigh => write!(f, "too high"),
            Sentinel::TooLow => write!(f, "too low"),
            Sentinel::OutOfRange => write!(f, "out of range"),
        }
    }
}

/// A decoded value: either a measurement or a sentinel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ReadingValue {
    /// A physical measurement.
    Measured(f64),
    /// A reserved status code.
    Sentinel(Sentinel),
}

impl ReadingValue {
    /// The measurement, or `None` for a sentinel.
    #[must_use]
    pub fn measured(&self) -> Option<f64> {
        match self {
            ReadingValue::Measured(v) => Some(*v),
            ReadingValue::Sentinel(_) => None,
        }
    }

    /// The measurement, or the sentinel's numeric code.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            ReadingValue::Measured(v) => *v,
            ReadingValue::Sentinel(s) => s.code(),
        }
    }

    /// Whether this value is a sentinel.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        matches!(self, ReadingValue::Sentinel(_))
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Measured(v) => write!(f, "{v}"),
            ReadingValue::Sentinel(s) => write!(f, "{} ({s})", s.code()),
        }
    }
}

/// A single decoded reading.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Originating probe; `None` for device-level readings.
    pub sensor: Option<SensorLocation>,
    /// The quantity measured.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: ReadingKind,
    /// The decoded value.
    pub value: ReadingValue,
}

impl Reading {
    /// Create a reading.
    #[must_use]
    pub fn new(sensor: Option<SensorLocation>, kind: ReadingKind, value: ReadingValue) -> Self {
        Self {
            sensor,
            kind,
            value,
        }
    }

    /// Key combining location and kind, e.g. `indoor-temperature` or `battery-level`.
    #[must_use]
    pub fn key(&self) -> String {
        match self.sensor {
            Some(sensor) => format!("{}-{}", sensor.as_str(), self.kind.as_str()),
            None => self.kind.as_str().to_string(),
        }
    }

    /// Unit symbol for this reading.
    #[must_use]
    pub fn unit(&self) -> &'static str {
        self.kind.unit()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key(), self.value)?;
        if !self.value.is_sentinel() {
            write!(f, " {}", self.unit())?;
        }
        Ok(())
    }
}

/// Identity of a discovered sensor.
///
/// Assigned once at discovery and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorIdentity {
    /// Platform peripheral identifier.
    pub id: String,
    /// Normalized address (lower-case hex, no separators); empty when the
    /// platform does not expose addresses.
    pub address: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
}

/// Decoded answer to the [`GET_SENSOR_DATA`](crate::uuid::GET_SENSOR_DATA) command.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommandResponse {
    /// Indoor temperature in °C.
    pub indoor_temperature: f64,
    /// Indoor relative humidity in percent.
    pub relative_humidity: u8,
    /// Outdoor temperature in °C.
    pub outdoor_temperature: f64,
}
