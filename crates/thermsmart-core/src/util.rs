//! Utility functions for thermsmart-core.
//!
//! This module contains shared utility functions used across the crate.

use std::collections::HashSet;

use btleplug::platform::PeripheralId;

/// Normalize a Bluetooth address for comparison.
///
/// Lower-cases the address and strips `:`/`-` separators and whitespace, so
/// `AA:BB:CC:DD:EE:FF` and `aabbccddeeff` compare equal.
pub fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(|c| !matches!(c, ':' | '-') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether a normalized address carries no information.
///
/// Some platforms (macOS) report `00:00:00:00:00:00` for every peripheral.
pub fn is_unknown_address(normalized: &str) -> bool {
    normalized.is_empty() || normalized.chars().all(|c| c == '0')
}

/// Format a 6-byte little-endian address as 12 lower-case hex digits.
///
/// The most significant byte comes first, matching the usual display order.
pub fn format_le_address(bytes: &[u8; 6]) -> String {
    bytes.iter().rev().map(|b| format!("{b:02x}")).collect()
}

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they may be
/// MAC addresses or other formats. This function extracts the useful
/// identifier string.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// A set of sensor addresses to accept.
///
/// An empty filter accepts every address. Entries are normalized on
/// insertion, so callers can pass addresses in any common notation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressFilter {
    addresses: HashSet<String>,
}

impl AddressFilter {
    /// A filter that accepts every address.
    pub fn any() -> Self {
        Self::default()
    }

    /// Whether no restriction is configured.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Number of accepted addresses.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Add an address to the filter.
    pub fn insert(&mut self, address: &str) {
        self.addresses.insert(normalize_address(address));
    }

    /// Whether `address` passes the filter.
    pub fn matches(&self, address: &str) -> bool {
        self.is_empty() || self.addresses.contains(&normalize_address(address))
    }
}

impl<S: AsRef<str>> FromIterator<S> for AddressFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut filter = Self::default();
        for address in iter {
            filter.insert(address.as_ref());
        }
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("AA:BB:CC:DD:EE:FF"), "aabbccddeeff");
        assert_eq!(normalize_address("aa-bb-cc-dd-ee-ff"), "aabbccddeeff");
        assert_eq!(normalize_address(" aabbccddeeff\n"), "aabbccddeeff");
        assert_eq!(normalize_address(""), "");
    }

    #[test]
    fn test_unknown_address() {
        assert!(is_unknown_address(""));
        assert!(is_unknown_address(&normalize_address("00:00:00:00:00:00")));
        assert!(!is_unknown_address("aabbccddeeff"));
    }

    #[test]
    fn test_format_le_address() {
        let bytes = [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA];
        assert_eq!(format_le_address(&bytes), "aabbccddeeff");

        // Leading zero bytes are kept.
        let bytes = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(format_le_address(&bytes), "000000000001");
    }

    #[test]
    fn test_address_filter_empty_accepts_all() {
        let filter = AddressFilter::any();
        assert!(filter.is_empty());
        assert!(filter.matches("aabbccddeeff"));
        assert!(filter.matches(""));
    }

    #[test]
    fn test_address_filter_normalizes() {
        let filter: AddressFilter = ["AA:BB:CC:DD:EE:FF"].into_iter().collect();
        assert_eq!(filter.len(), 1);
        assert!(filter.matches("aabbccddeeff"));
        assert!(filter.matches("aa:bb:cc:dd:ee:ff"));
        assert!(!filter.matches("112233445566"));
    }
}
