//! # Property-Based Tests
//!
//! Session invariants under random operation sequences.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::collection::vec;
use proptest::prelude::*;
use roomwatch_core::{
    Disposition, FusionPolicy, MemorySessionStore, PresenceStateMachine, RoomChangePolicy, RoomId,
    SessionStore, StaleSessionReaper, UserId,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Op {
    Present { user: u64, room: u64, minute: i64 },
    Absent { user: u64, minute: i64 },
    Sweep { minute: i64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..4, 1u64..4, 0i64..240).prop_map(|(user, room, minute)| Op::Present {
            user,
            room,
            minute
        }),
        (0u64..4, 0i64..240).prop_map(|(user, minute)| Op::Absent { user, minute }),
        (0i64..240).prop_map(|minute| Op::Sweep { minute }),
    ]
}

fn policy() -> impl Strategy<Value = RoomChangePolicy> {
    prop_oneof![
        Just(RoomChangePolicy::KeepOriginal),
        Just(RoomChangePolicy::SplitOnChange),
    ]
}

fn at(minute: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().expect("base time") + Duration::minutes(minute)
}

fn apply(store: &MemorySessionStore, room_change: RoomChangePolicy, op: &Op) {
    let machine = PresenceStateMachine::new(store, room_change);
    match *op {
        Op::Present { user, room, minute } => {
            machine
                .apply_disposition(
                    UserId(user),
                    Disposition::Present { inquiry: 0 },
                    Some(RoomId(room)),
                    at(minute),
                )
                .expect("present");
        }
        Op::Absent { user, minute } => {
            machine
                .apply_disposition(UserId(user), Disposition::Absent, None, at(minute))
                .expect("absent");
        }
        Op::Sweep { minute } => {
            StaleSessionReaper::default()
                .sweep(store, at(minute))
                .expect("sweep");
        }
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// No sequence of uploads and sweeps leaves a user with two open sessions.
    #[test]
    fn at_most_one_open_session_per_user(
        ops in vec(op(), 1..80),
        room_change in policy(),
    ) {
        let store = MemorySessionStore::new();
        for op in &ops {
            apply(&store, room_change, op);

            let mut open_per_user: BTreeMap<UserId, usize> = BTreeMap::new();
            for session in store.all_since(at(-1)).expect("all") {
                if session.is_open() {
                    *open_per_user.entry(session.user_id).or_default() += 1;
                }
            }
            prop_assert!(open_per_user.values().all(|&count| count <= 1));
        }
    }

    /// While a session stays open, its `last_seen` never decreases.
    #[test]
    fn last_seen_is_monotonic(minutes in vec(0i64..600, 1..50)) {
        let store = MemorySessionStore::new();
        let machine = PresenceStateMachine::new(&store, RoomChangePolicy::KeepOriginal);
        machine.start_session(UserId(1), RoomId(1), at(0)).expect("start");

        let mut previous = at(0);
        for minute in minutes {
            machine.heartbeat(UserId(1), at(minute)).expect("heartbeat");
            let open = store.get_open(UserId(1)).expect("get").expect("open");
            prop_assert!(open.last_seen >= previous);
            prop_assert_eq!(open.room_id, RoomId(1));
            previous = open.last_seen;
        }
    }

    /// Closing a session twice leaves the store exactly as closing once.
    #[test]
    fn end_session_is_idempotent(first in 0i64..100, second in 0i64..100) {
        let store = MemorySessionStore::new();
        let machine = PresenceStateMachine::new(&store, RoomChangePolicy::KeepOriginal);
        machine.start_session(UserId(1), RoomId(1), at(0)).expect("start");

        machine.end_session(UserId(1), at(first)).expect("end");
        let once = store.all_since(at(-1)).expect("all");
        machine.end_session(UserId(1), at(second)).expect("end");
        prop_assert_eq!(store.all_since(at(-1)).expect("all"), once);
    }

    /// The inquiry is fetched exactly for estimations in the mid band.
    #[test]
    fn inquiry_fetched_only_in_mid_band(estimation in 0u8..=100, inquiry in 0u8..=100) {
        let mut fetched = false;
        let disposition = FusionPolicy::default()
            .decide(estimation, || {
                fetched = true;
                Ok::<u8, ()>(inquiry)
            })
            .expect("decide");

        prop_assert_eq!(fetched, (20..=70).contains(&estimation));
        if fetched {
            prop_assert_eq!(disposition.is_present(), estimation >= inquiry);
        }
    }
}
