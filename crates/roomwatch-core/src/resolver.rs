//! # Room Resolver
//!
//! Turns one upload's BLE and WiFi observations into a single room.
//!
//! ## Precedence
//!
//! 1. BLE observations, in upload order. The first one that resolves wins.
//! 2. WiFi observations, in upload order, only if no BLE observation resolved.
//!
//! Order is the order fingerprints were parsed, never signal strength. BLE
//! beats WiFi unconditionally, even when the resolving BLE entry comes late
//! in its list.
//!
//! There is no fallback room. Callers must treat an error as "cannot place
//! the user".

use crate::fingerprint::{FingerprintIndex, Observation};
use crate::{PresenceError, RoomId};

/// Resolves rooms against a [`FingerprintIndex`].
pub struct RoomResolver<'a, I: FingerprintIndex + ?Sized> {
    index: &'a I,
}

impl<'a, I: FingerprintIndex + ?Sized> RoomResolver<'a, I> {
    #[must_use]
    pub fn new(index: &'a I) -> Self {
        Self { index }
    }

    /// Resolve the room for one upload.
    ///
    /// # Errors
    ///
    /// - `NoSignalData` if both lists are empty
    /// - `NoMatch` if nothing resolves
    /// - any backend error raised by the index
    pub fn resolve(
        &self,
        ble: &[Observation],
        wifi: &[Observation],
    ) -> Result<RoomId, PresenceError> {
        if ble.is_empty() && wifi.is_empty() {
            return Err(PresenceError::NoSignalData);
        }

        for beacon in ble {
            if let Some(room) = self.index.room_for_beacon(&beacon.identifier)? {
                return Ok(room);
            }
        }

        for access_point in wifi {
            if let Some(room) = self.index.room_for_access_point(&access_point.identifier)? {
                return Ok(room);
            }
        }

        Err(PresenceError::NoMatch)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FingerprintTable;
    use std::cell::RefCell;

    fn obs(ids: &[&str]) -> Vec<Observation> {
        ids.iter().map(|id| Observation::new(*id, -60)).collect()
    }

    fn table() -> FingerprintTable {
        let mut table = FingerprintTable::new();
        table.insert_beacon("B", RoomId(7));
        table.insert_beacon("C", RoomId(8));
        table.insert_access_point("X", RoomId(3));
        table
    }

    #[test]
    fn empty_lists_are_no_signal_data() {
        let table = table();
        let result = RoomResolver::new(&table).resolve(&[], &[]);
        assert!(matches!(result, Err(PresenceError::NoSignalData)));
    }

    #[test]
    fn ble_beats_earlier_resolving_wifi() {
        let table = table();
        let room = RoomResolver::new(&table).resolve(&obs(&["A", "B"]), &obs(&["X"]));
        assert_eq!(room.ok(), Some(RoomId(7)));
    }

    #[test]
    fn first_ble_hit_wins_regardless_of_strength() {
        let table = table();
        let ble = vec![Observation::new("c", -90), Observation::new("b", -30)];
        let room = RoomResolver::new(&table).resolve(&ble, &[]);
        assert_eq!(room.ok(), Some(RoomId(8)));
    }

    #[test]
    fn wifi_used_when_no_beacon_resolves() {
        let table = table();
        let room = RoomResolver::new(&table).resolve(&obs(&["A"]), &obs(&["Q", "x"]));
        assert_eq!(room.ok(), Some(RoomId(3)));
    }

    #[test]
    fn wifi_only_upload_resolves() {
        let table = table();
        let room = RoomResolver::new(&table).resolve(&[], &obs(&["X"]));
        assert_eq!(room.ok(), Some(RoomId(3)));
    }

    #[test]
    fn nothing_resolves_is_no_match() {
        let table = table();
        let result = RoomResolver::new(&table).resolve(&obs(&["A"]), &obs(&["Y"]));
        assert!(matches!(result, Err(PresenceError::NoMatch)));
    }

    struct FailingIndex {
        calls: RefCell<usize>,
    }

    impl FingerprintIndex for FailingIndex {
        fn room_for_beacon(&self, _uuid: &str) -> Result<Option<RoomId>, PresenceError> {
            *self.calls.borrow_mut() += 1;
            Err(PresenceError::Storage("index offline".into()))
        }

        fn room_for_access_point(&self, _bssid: &str) -> Result<Option<RoomId>, PresenceError> {
            *self.calls.borrow_mut() += 1;
            Ok(Some(RoomId(1)))
        }
    }

    #[test]
    fn backend_failure_is_not_a_miss() {
        let index = FailingIndex {
            calls: RefCell::new(0),
        };
        let result = RoomResolver::new(&index).resolve(&obs(&["A"]), &obs(&["X"]));
        assert!(matches!(result, Err(PresenceError::Storage(_))));
        assert_eq!(*index.calls.borrow(), 1);
    }
}
