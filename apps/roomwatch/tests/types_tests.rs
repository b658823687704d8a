//! Unit tests for API types: JSON shapes, error statuses, query parsing.

#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::StatusCode;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use roomwatch::api::{
    ApiError, CurrentOccupantsResponse, HealthResponse, HistoryQuery, PresenceHistoryResponse,
    UserHistoryResponse, basic_auth_username,
};
use roomwatch_core::{
    DayHistory, Occupant, PresenceError, PresenceSession, RoomId, RoomOccupancy, SessionId,
    UserDay, UserId, UserSessions,
};

fn tokyo() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn session() -> PresenceSession {
    PresenceSession::open(SessionId(1), UserId(7), RoomId(5), utc("2024-05-01T00:00:00Z"))
}

// =============================================================================
// HEALTH RESPONSE TESTS
// =============================================================================

#[test]
fn test_health_response_states() {
    let now = utc("2024-05-01T00:00:00Z").with_timezone(&tokyo());

    let up = HealthResponse::new(true, now);
    assert!(up.is_ok());
    assert_eq!(up.database, "Available");
    assert_eq!(up.timestamp, "2024-05-01T09:00:00+09:00");

    let down = HealthResponse::new(false, now);
    assert!(!down.is_ok());
    assert_eq!(down.status, "error");
    assert_eq!(down.database, "Unavailable");
}

// =============================================================================
// ERROR STATUS TESTS
// =============================================================================

#[test]
fn test_error_statuses() {
    let cases = [
        (PresenceError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
        (PresenceError::NoSignalData, StatusCode::BAD_REQUEST),
        (PresenceError::NoMatch, StatusCode::UNPROCESSABLE_ENTITY),
        (PresenceError::UnknownUser("x".into()), StatusCode::UNAUTHORIZED),
        (PresenceError::Dependency("x".into()), StatusCode::BAD_GATEWAY),
        (PresenceError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        (PresenceError::Io("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (error, status) in cases {
        assert_eq!(ApiError(error).status(), status);
    }
}

// =============================================================================
// HISTORY QUERY TESTS
// =============================================================================

#[test]
fn test_history_query_date_is_local_midnight() {
    let query = HistoryQuery {
        date: Some("2024-05-01".to_string()),
    };
    let since = query.since(utc("2024-06-15T00:00:00Z"), tokyo()).unwrap();
    assert_eq!(since, utc("2024-04-30T15:00:00Z"));
}

#[test]
fn test_history_query_defaults_to_one_month() {
    let since = HistoryQuery::default()
        .since(utc("2024-06-15T12:00:00Z"), tokyo())
        .unwrap();
    assert_eq!(since, utc("2024-05-15T12:00:00Z"));

    let empty = HistoryQuery {
        date: Some(String::new()),
    };
    assert_eq!(
        empty.since(utc("2024-06-15T12:00:00Z"), tokyo()).unwrap(),
        since
    );
}

#[test]
fn test_history_query_rejects_other_formats() {
    for raw in ["2024/05/01", "2024-13-01", "yesterday"] {
        let query = HistoryQuery {
            date: Some(raw.to_string()),
        };
        assert!(matches!(
            query.since(Utc::now(), tokyo()),
            Err(PresenceError::InvalidInput(_))
        ));
    }
}

// =============================================================================
// JSON SHAPE TESTS
// =============================================================================

#[test]
fn test_presence_history_json_shape() {
    let response = PresenceHistoryResponse {
        all_history: vec![DayHistory {
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            users: vec![UserSessions {
                user_id: UserId(7),
                sessions: vec![session()],
            }],
        }],
    };
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["all_history"][0]["date"], "2024-05-01");
    assert_eq!(json["all_history"][0]["users"][0]["user_id"], 7);
    let row = &json["all_history"][0]["users"][0]["sessions"][0];
    assert_eq!(row["room_id"], 5);
    assert!(row["end_time"].is_null());
}

#[test]
fn test_user_history_json_shape() {
    let response = UserHistoryResponse {
        user_id: UserId(7),
        history: vec![UserDay {
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            sessions: vec![session()],
        }],
    };
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["user_id"], 7);
    assert_eq!(json["history"][0]["sessions"][0]["session_id"], 1);
}

#[test]
fn test_current_occupants_json_shape() {
    let response = CurrentOccupantsResponse {
        rooms: vec![RoomOccupancy {
            room_id: RoomId(5),
            room_name: "Seminar".to_string(),
            occupants: vec![Occupant {
                user_id: UserId(7),
                username: Some("alice".to_string()),
                last_seen: utc("2024-05-01T00:00:00Z"),
            }],
        }],
    };
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["rooms"][0]["room_name"], "Seminar");
    assert_eq!(json["rooms"][0]["occupants"][0]["username"], "alice");
}

// =============================================================================
// AUTH HEADER TESTS
// =============================================================================

#[test]
fn test_basic_auth_lowercase_scheme() {
    // "carol:pw"
    assert_eq!(
        basic_auth_username("basic Y2Fyb2w6cHc="),
        Some("carol".to_string())
    );
}
