//! # Fingerprint Index
//!
//! Radio observations and the lookup from radio identifiers to rooms.
//!
//! Two modalities are supported:
//! - BLE beacons, identified by service UUID
//! - WiFi access points, identified by BSSID
//!
//! Lookups are case-insensitive on both key types. Keys are normalized to
//! ASCII lowercase on insert and on lookup.

use crate::primitives::{MAX_IDENTIFIER_LENGTH, MAX_OBSERVATIONS};
use crate::{PresenceError, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// OBSERVATION
// =============================================================================

/// A single radio sighting: identifier plus signal strength in dBm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// BLE service UUID or WiFi BSSID, as uploaded.
    pub identifier: String,
    /// Received signal strength, rounded to whole dBm.
    pub signal_strength: i32,
}

impl Observation {
    #[must_use]
    pub fn new(identifier: impl Into<String>, signal_strength: i32) -> Self {
        Self {
            identifier: identifier.into(),
            signal_strength,
        }
    }
}

/// Normalize an identifier for case-insensitive comparison.
#[must_use]
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_ascii_lowercase()
}

// =============================================================================
// FINGERPRINT INDEX TRAIT
// =============================================================================

/// Read-only lookup of rooms by radio identifier.
///
/// A miss is `Ok(None)`. `Err` is reserved for backend failures and must be
/// propagated by callers, never treated as a miss.
pub trait FingerprintIndex {
    /// Room registered for a BLE service UUID.
    fn room_for_beacon(&self, uuid: &str) -> Result<Option<RoomId>, PresenceError>;

    /// Room registered for a WiFi BSSID.
    fn room_for_access_point(&self, bssid: &str) -> Result<Option<RoomId>, PresenceError>;
}

// =============================================================================
// IN-MEMORY TABLE
// =============================================================================

/// In-memory fingerprint index.
#[derive(Debug, Clone, Default)]
pub struct FingerprintTable {
    beacons: BTreeMap<String, RoomId>,
    access_points: BTreeMap<String, RoomId>,
}

impl FingerprintTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a beacon UUID for a room. Re-registering moves it.
    pub fn insert_beacon(&mut self, uuid: &str, room: RoomId) {
        self.beacons.insert(normalize_identifier(uuid), room);
    }

    /// Register an access point BSSID for a room. Re-registering moves it.
    pub fn insert_access_point(&mut self, bssid: &str, room: RoomId) {
        self.access_points.insert(normalize_identifier(bssid), room);
    }

    #[must_use]
    pub fn beacon_count(&self) -> usize {
        self.beacons.len()
    }

    #[must_use]
    pub fn access_point_count(&self) -> usize {
        self.access_points.len()
    }
}

impl FingerprintIndex for FingerprintTable {
    fn room_for_beacon(&self, uuid: &str) -> Result<Option<RoomId>, PresenceError> {
        Ok(self.beacons.get(&normalize_identifier(uuid)).copied())
    }

    fn room_for_access_point(&self, bssid: &str) -> Result<Option<RoomId>, PresenceError> {
        Ok(self.access_points.get(&normalize_identifier(bssid)).copied())
    }
}

// =============================================================================
// CSV PARSING
// =============================================================================

/// Parse a BLE sample CSV: `<name>, <uuid>, <rssi>` per row.
///
/// Rows with fewer than three fields, an empty or oversized identifier, or
/// a non-numeric rssi are skipped. A header row is skipped by the same rule.
#[must_use]
pub fn parse_ble_csv(text: &str) -> Vec<Observation> {
    parse_rows(text)
}

/// Parse a WiFi sample CSV: `<ssid>, <bssid>, <rssi>` per row.
///
/// Same skipping rules as [`parse_ble_csv`].
#[must_use]
pub fn parse_wifi_csv(text: &str) -> Vec<Observation> {
    parse_rows(text)
}

/// Both formats carry the identifier in column 1 and rssi in column 2.
fn parse_rows(text: &str) -> Vec<Observation> {
    text.lines()
        .filter_map(parse_row)
        .take(MAX_OBSERVATIONS)
        .collect()
}

fn parse_row(line: &str) -> Option<Observation> {
    let fields = split_fields(line);
    if fields.len() < 3 {
        return None;
    }

    let identifier = fields[1].trim();
    if identifier.is_empty() || identifier.len() > MAX_IDENTIFIER_LENGTH {
        return None;
    }

    let rssi: f64 = fields[2].trim().parse().ok()?;
    if !rssi.is_finite() {
        return None;
    }

    Some(Observation::new(identifier, rssi.round() as i32))
}

/// Split one CSV record. Double-quoted fields may contain commas, and `""`
/// inside quotes is a literal quote.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' if quoted => quoted = false,
            '"' if field.trim().is_empty() => {
                field.clear();
                quoted = true;
            }
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut table = FingerprintTable::new();
        table.insert_beacon("ABCD-0001", RoomId(7));
        table.insert_access_point("aa:bb:cc:dd:ee:ff", RoomId(3));

        assert_eq!(table.room_for_beacon("abcd-0001").ok().flatten(), Some(RoomId(7)));
        assert_eq!(
            table.room_for_access_point("AA:BB:CC:DD:EE:FF").ok().flatten(),
            Some(RoomId(3))
        );
        assert_eq!(table.room_for_beacon("nope").ok().flatten(), None);
    }

    #[test]
    fn reinsert_moves_fingerprint() {
        let mut table = FingerprintTable::new();
        table.insert_beacon("b", RoomId(1));
        table.insert_beacon("B", RoomId(2));
        assert_eq!(table.beacon_count(), 1);
        assert_eq!(table.room_for_beacon("b").ok().flatten(), Some(RoomId(2)));
    }

    #[test]
    fn parse_ble_rows_in_order() {
        let csv = "name,uuid,rssi\nbeacon-a, UUID-A ,-60.4\nbeacon-b,UUID-B,-71.6\n";
        let parsed = parse_ble_csv(csv);
        assert_eq!(
            parsed,
            vec![Observation::new("UUID-A", -60), Observation::new("UUID-B", -72)]
        );
    }

    #[test]
    fn parse_skips_short_and_malformed_rows() {
        let csv = "only,two\nssid,bssid-1,abc\nssid,,-50\n\"lab\",\"aa:bb\",\"-40\"\n";
        let parsed = parse_wifi_csv(csv);
        assert_eq!(parsed, vec![Observation::new("aa:bb", -40)]);
    }

    #[test]
    fn parse_quoted_field_with_comma() {
        let parsed = parse_wifi_csv("\"My,Net\",aa:bb:cc:dd:ee:ff,-40\n");
        assert_eq!(parsed, vec![Observation::new("aa:bb:cc:dd:ee:ff", -40)]);

        let parsed = parse_wifi_csv("\"say \"\"hi\"\", ok\", \"cc:dd\" ,-55\r\n");
        assert_eq!(parsed, vec![Observation::new("cc:dd", -55)]);
    }

    #[test]
    fn parse_skips_non_finite_rssi() {
        assert!(parse_wifi_csv("x,aa:bb,NaN\nx,cc:dd,inf").is_empty());
    }

    #[test]
    fn parse_empty_input() {
        assert!(parse_ble_csv("").is_empty());
    }
}
