//! # Scenario Tests
//!
//! Whole-pipeline walks through fusion, resolution, the state machine and
//! the reaper, against the redb store.
//!
//! ## Scenarios
//! - S0: Upload rejection leaves no trace
//! - S1: Presence timeline across heartbeats and the reaper
//! - S2: Room resolution precedence

#![allow(clippy::unwrap_used, clippy::panic)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use roomwatch_core::{
    Disposition, FusionPolicy, Observation, PresenceError, PresenceStateMachine, RedbStore,
    RoomChangePolicy, RoomId, RoomResolver, SessionStore, StaleSessionReaper, Transition, UserId,
    parse_ble_csv, parse_wifi_csv,
};
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().expect("base time")
}

fn seeded_store() -> (TempDir, RedbStore) {
    let temp = tempfile::tempdir().expect("temp dir");
    let store = RedbStore::open(temp.path().join("presence.redb")).expect("open db");
    store.add_user("alice").expect("user");
    store.add_room(RoomId(5), "Seminar").expect("room");
    store.add_room(RoomId(9), "Lab").expect("room");
    store.add_beacon("beacon-5", RoomId(5)).expect("beacon");
    store.add_beacon("beacon-9", RoomId(9)).expect("beacon");
    store.add_access_point("aa:bb:cc:00:00:09", RoomId(9)).expect("ap");
    (temp, store)
}

/// The upload path as the binary runs it, minus transport.
fn upload(
    store: &RedbStore,
    user: UserId,
    estimation: u8,
    inquiry: u8,
    ble: &[Observation],
    wifi: &[Observation],
    at: DateTime<Utc>,
) -> Result<Transition, PresenceError> {
    let disposition =
        FusionPolicy::default().decide(estimation, || Ok::<u8, PresenceError>(inquiry))?;
    let room = if disposition.is_present() {
        Some(RoomResolver::new(store).resolve(ble, wifi)?)
    } else {
        None
    };
    PresenceStateMachine::new(store, RoomChangePolicy::KeepOriginal)
        .apply_disposition(user, disposition, room, at)
}

// =============================================================================
// S0: REJECTION
// =============================================================================

mod s0_rejection {
    use super::*;

    #[test]
    fn present_without_signals_mutates_nothing() {
        let (_temp, store) = seeded_store();
        let result = upload(&store, UserId(1), 90, 0, &[], &[], t0());
        assert!(matches!(result, Err(PresenceError::NoSignalData)));
        assert!(store.all_since(t0() - Duration::days(1)).expect("all").is_empty());
    }

    #[test]
    fn present_with_unknown_fingerprints_mutates_nothing() {
        let (_temp, store) = seeded_store();
        let ble = vec![Observation::new("nobody", -50)];
        let result = upload(&store, UserId(1), 90, 0, &ble, &[], t0());
        assert!(matches!(result, Err(PresenceError::NoMatch)));
        assert!(store.get_open(UserId(1)).expect("get").is_none());
    }

    #[test]
    fn failed_inquiry_mutates_nothing() {
        let (_temp, store) = seeded_store();
        let result: Result<Disposition, PresenceError> = FusionPolicy::default()
            .decide(45, || Err(PresenceError::Dependency("timeout".to_string())));
        assert!(matches!(result, Err(PresenceError::Dependency(_))));
        assert!(store.open_sessions().expect("open").is_empty());
    }
}

// =============================================================================
// S1: TIMELINE
// =============================================================================

mod s1_timeline {
    use super::*;

    #[test]
    fn open_refresh_and_reap() {
        let (_temp, store) = seeded_store();
        let user = UserId(1);

        // Confident presence in room 5
        let ble = parse_ble_csv("b,BEACON-5,-58\n");
        let step = upload(&store, user, 85, 0, &ble, &[], t0()).expect("upload");
        assert!(matches!(step, Transition::Started(_)));

        // Mid-band presence resolving room 9 keeps the session in room 5
        let later = t0() + Duration::minutes(4);
        let ble = parse_ble_csv("b,beacon-9,-61\n");
        let step = upload(&store, user, 50, 40, &ble, &[], later).expect("upload");
        assert_eq!(step, Transition::Refreshed);
        let open = store.get_open(user).expect("get").expect("open");
        assert_eq!(open.room_id, RoomId(5));
        assert_eq!(open.last_seen, later);

        // Silence: the reaper closes it at sweep time, 25 minutes later
        let sweep_at = later + Duration::minutes(25);
        let report = StaleSessionReaper::default()
            .sweep(&store, sweep_at)
            .expect("sweep");
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].end_time, Some(sweep_at));
        assert!(store.get_open(user).expect("get").is_none());
    }

    #[test]
    fn confident_room_change_keeps_original_room() {
        let (_temp, store) = seeded_store();
        let user = UserId(1);

        let ble = parse_ble_csv("b,beacon-5,-58\n");
        let step = upload(&store, user, 80, 0, &ble, &[], t0()).expect("upload");
        let Transition::Started(session_id) = step else {
            panic!("expected a new session, got {step:?}");
        };
        let open = store.get_open(user).expect("get").expect("open");
        assert_eq!(open.room_id, RoomId(5));
        assert_eq!(open.start_time, t0());

        // Ten minutes later, confidently present, now resolving room 9
        let later = t0() + Duration::minutes(10);
        let ble = parse_ble_csv("b,beacon-9,-61\n");
        let step = upload(&store, user, 80, 0, &ble, &[], later).expect("upload");
        assert_eq!(step, Transition::Refreshed);
        let open = store.get_open(user).expect("get").expect("open");
        assert_eq!(open.session_id, session_id);
        assert_eq!(open.room_id, RoomId(5));
        assert_eq!(open.last_seen, later);

        let sweep_at = later + Duration::minutes(25);
        let report = StaleSessionReaper::default()
            .sweep(&store, sweep_at)
            .expect("sweep");
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].session_id, session_id);
        assert_eq!(report.closed[0].end_time, Some(sweep_at));
    }

    #[test]
    fn contradicted_mid_band_sample_closes_session() {
        let (_temp, store) = seeded_store();
        let user = UserId(1);
        let ble = parse_ble_csv("b,beacon-5,-58\n");
        upload(&store, user, 85, 0, &ble, &[], t0()).expect("upload");

        let disposition = FusionPolicy::default()
            .decide(45, || Ok::<u8, PresenceError>(60))
            .expect("decide");
        assert!(disposition.requires_archive());

        let step = upload(&store, user, 45, 60, &ble, &[], t0() + Duration::minutes(1))
            .expect("upload");
        assert_eq!(step, Transition::Ended);
    }

    #[test]
    fn low_estimation_without_session_is_a_noop() {
        let (_temp, store) = seeded_store();
        let step = upload(&store, UserId(1), 10, 0, &[], &[], t0()).expect("upload");
        assert_eq!(step, Transition::NoOpenSession);
    }
}

// =============================================================================
// S2: RESOLUTION
// =============================================================================

mod s2_resolution {
    use super::*;

    #[test]
    fn later_ble_entry_beats_earlier_wifi() {
        let (_temp, store) = seeded_store();
        let ble = parse_ble_csv("x,unknown,-40\nb,beacon-5,-80\n");
        let wifi = parse_wifi_csv("lab,AA:BB:CC:00:00:09,-30\n");
        let room = RoomResolver::new(&store).resolve(&ble, &wifi).expect("resolve");
        assert_eq!(room, RoomId(5));
    }

    #[test]
    fn wifi_resolves_when_ble_misses() {
        let (_temp, store) = seeded_store();
        let ble = parse_ble_csv("x,unknown,-40\n");
        let wifi = parse_wifi_csv("lab,aa:bb:cc:00:00:09,-30\n");
        let room = RoomResolver::new(&store).resolve(&ble, &wifi).expect("resolve");
        assert_eq!(room, RoomId(9));
    }
}
