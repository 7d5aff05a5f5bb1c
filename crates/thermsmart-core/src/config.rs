//! Sensor session configuration.
//!
//! [`SensorConfig`] can be built in code or loaded from a TOML file:
//!
//! ```toml
//! address = "AA:BB:CC:DD:EE:FF"
//! dataTtl = 15
//! powerOnTimeoutMs = 5000
//! scanTimeoutSecs = 30
//! ```
//!
//! Every key is optional. `snake_case` spellings are accepted as well.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::normalize_address;

/// Default payload cache lifetime in seconds.
pub const DEFAULT_DATA_TTL_SECS: u64 = 15;

/// Default time to wait for the adapter to power on.
pub const DEFAULT_POWER_ON_TIMEOUT_MS: u64 = 5000;

/// Default time to scan for the sensor before giving up.
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 30;

/// Configuration for a sensor [`Session`](crate::Session).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use thermsmart_core::SensorConfig;
///
/// let config = SensorConfig::default()
///     .address("AA:BB:CC:DD:EE:FF")
///     .data_ttl(Duration::from_secs(30));
/// assert_eq!(config.normalized_address().as_deref(), Some("aabbccddeeff"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SensorConfig {
    /// Address of the sensor to connect to; the first ThermSmart sensor
    /// found is used when unset.
    pub address: Option<String>,

    /// Seconds a command-response payload stays cached.
    #[serde(alias = "data_ttl")]
    pub data_ttl: u64,

    /// Milliseconds to wait for the adapter to power on.
    #[serde(alias = "power_on_timeout_ms")]
    pub power_on_timeout_ms: u64,

    /// Seconds to scan for the sensor before failing.
    #[serde(alias = "scan_timeout_secs")]
    pub scan_timeout_secs: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            address: None,
            data_ttl: DEFAULT_DATA_TTL_SECS,
            power_on_timeout_ms: DEFAULT_POWER_ON_TIMEOUT_MS,
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
        }
    }
}

impl SensorConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize to a TOML document.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::invalid_config(format!("failed to serialize config: {e}")))
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<()> {
        if let Some(address) = &self.address
            && normalize_address(address).is_empty()
        {
            return Err(Error::invalid_config("address must not be empty"));
        }
        if self.scan_timeout_secs == 0 {
            return Err(Error::invalid_config("scanTimeoutSecs must be positive"));
        }
        Ok(())
    }

    /// Set the sensor address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the payload cache lifetime (whole seconds).
    #[must_use]
    pub fn data_ttl(mut self, ttl: Duration) -> Self {
        self.data_ttl = ttl.as_secs();
        self
    }

    /// Set the power-on timeout.
    #[must_use]
    pub fn power_on_timeout(mut self, timeout: Duration) -> Self {
        self.power_on_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the scan timeout (whole seconds).
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout_secs = timeout.as_secs();
        self
    }

    /// The configured address, normalized for comparison.
    pub fn normalized_address(&self) -> Option<String> {
        self.address.as_deref().map(normalize_address)
    }

    /// Payload cache lifetime.
    pub fn data_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.data_ttl)
    }

    /// Power-on timeout.
    pub fn power_on_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.power_on_timeout_ms)
    }

    /// Scan timeout.
    pub fn scan_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SensorConfig::default();
        assert_eq!(config.address, None);
        assert_eq!(config.data_ttl_duration(), Duration::from_secs(15));
        assert_eq!(config.power_on_timeout_duration(), Duration::from_secs(5));
        assert_eq!(config.scan_timeout_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_camel_case() {
        let config = SensorConfig::from_toml_str(
            r#"
            address = "AA:BB:CC:DD:EE:FF"
            dataTtl = 60
            powerOnTimeoutMs = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.normalized_address().as_deref(), Some("aabbccddeeff"));
        assert_eq!(config.data_ttl, 60);
        assert_eq!(config.power_on_timeout_ms, 1000);
        assert_eq!(config.scan_timeout_secs, DEFAULT_SCAN_TIMEOUT_SECS);
    }

    #[test]
    fn test_parse_snake_case_alias() {
        let config = SensorConfig::from_toml_str("data_ttl = 5\nscan_timeout_secs = 10").unwrap();
        assert_eq!(config.data_ttl, 5);
        assert_eq!(config.scan_timeout_secs, 10);
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = SensorConfig::from_toml_str("").unwrap();
        assert_eq!(config, SensorConfig::default());
    }

    #[test]
    fn test_parse_invalid() {
        let err = SensorConfig::from_toml_str("dataTtl = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = SensorConfig::from_toml_str("scanTimeoutSecs = 0").unwrap_err();
        assert!(err.to_string().contains("scanTimeoutSecs"));

        let err = SensorConfig::from_toml_str("address = \"::\"").unwrap_err();
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn test_builder() {
        let config = SensorConfig::new()
            .address("aa-bb-cc-dd-ee-ff")
            .data_ttl(Duration::from_secs(2))
            .power_on_timeout(Duration::from_millis(250))
            .scan_timeout(Duration::from_secs(3));
        assert_eq!(config.normalized_address().as_deref(), Some("aabbccddeeff"));
        assert_eq!(config.data_ttl, 2);
        assert_eq!(config.power_on_timeout_ms, 250);
        assert_eq!(config.scan_timeout_secs, 3);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SensorConfig::new().address("aabbccddeeff");
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("dataTtl = 15"));
        assert_eq!(SensorConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = SensorConfig::load("/nonexistent/thermsmart.toml").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
