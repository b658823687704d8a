//! # Presence Reports
//!
//! Read-side views over sessions: history grouped by local calendar day,
//! and the current occupants of every room.
//!
//! Days are computed in a fixed UTC offset supplied by the caller; a
//! session belongs to the day its `start_time` falls on. All output is
//! ordered (days ascending, then user id, then start time).

use crate::{PresenceSession, Room, RoomId, User, UserId};
use chrono::{DateTime, FixedOffset, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One user's sessions on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDay {
    pub date: NaiveDate,
    pub sessions: Vec<PresenceSession>,
}

/// One user's share of a [`DayHistory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSessions {
    pub user_id: UserId,
    pub sessions: Vec<PresenceSession>,
}

/// Every user's sessions on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHistory {
    pub date: NaiveDate,
    pub users: Vec<UserSessions>,
}

/// A user currently holding an open session in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub user_id: UserId,
    /// `None` if the session's user is no longer registered.
    pub username: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// A room and everyone currently in it. Rooms with nobody in them are
/// listed with an empty `occupants`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomOccupancy {
    pub room_id: RoomId,
    pub room_name: String,
    pub occupants: Vec<Occupant>,
}

/// Calendar date of `at` in the given offset.
#[must_use]
pub fn local_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// Local midnight of `date` in the given offset, as a UTC instant.
#[must_use]
pub fn start_of_day(date: NaiveDate, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Default history window start: one calendar month before `now`.
#[must_use]
pub fn one_month_before(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(1)).unwrap_or(now)
}

/// Group sessions (typically one user's) by local day.
#[must_use]
pub fn group_by_day(sessions: Vec<PresenceSession>, offset: FixedOffset) -> Vec<UserDay> {
    let mut days: BTreeMap<NaiveDate, Vec<PresenceSession>> = BTreeMap::new();
    for session in sessions {
        days.entry(local_date(session.start_time, offset))
            .or_default()
            .push(session);
    }

    days.into_iter()
        .map(|(date, mut sessions)| {
            sessions.sort_by_key(|s| (s.start_time, s.session_id));
            UserDay { date, sessions }
        })
        .collect()
}

/// Group sessions by local day, then by user.
#[must_use]
pub fn group_by_day_and_user(
    sessions: Vec<PresenceSession>,
    offset: FixedOffset,
) -> Vec<DayHistory> {
    let mut days: BTreeMap<NaiveDate, BTreeMap<UserId, Vec<PresenceSession>>> = BTreeMap::new();
    for session in sessions {
        days.entry(local_date(session.start_time, offset))
            .or_default()
            .entry(session.user_id)
            .or_default()
            .push(session);
    }

    days.into_iter()
        .map(|(date, users)| DayHistory {
            date,
            users: users
                .into_iter()
                .map(|(user_id, mut sessions)| {
                    sessions.sort_by_key(|s| (s.start_time, s.session_id));
                    UserSessions { user_id, sessions }
                })
                .collect(),
        })
        .collect()
}

/// Join rooms with open sessions. Open sessions in rooms that are not in
/// `rooms` are left out.
#[must_use]
pub fn current_occupants(
    rooms: &[Room],
    open: &[PresenceSession],
    users: &[User],
) -> Vec<RoomOccupancy> {
    let names: BTreeMap<UserId, &str> = users
        .iter()
        .map(|u| (u.user_id, u.username.as_str()))
        .collect();

    let mut by_room: BTreeMap<RoomId, RoomOccupancy> = rooms
        .iter()
        .map(|room| {
            (
                room.room_id,
                RoomOccupancy {
                    room_id: room.room_id,
                    room_name: room.room_name.clone(),
                    occupants: Vec::new(),
                },
            )
        })
        .collect();

    for session in open.iter().filter(|s| s.is_open()) {
        if let Some(room) = by_room.get_mut(&session.room_id) {
            room.occupants.push(Occupant {
                user_id: session.user_id,
                username: names.get(&session.user_id).map(|n| (*n).to_string()),
                last_seen: session.last_seen,
            });
        }
    }

    by_room
        .into_values()
        .map(|mut room| {
            room.occupants.sort_by_key(|o| o.user_id);
            room
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
