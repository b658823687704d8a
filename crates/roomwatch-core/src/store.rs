//! # Session Store
//!
//! The durable table of presence sessions.
//!
//! The store is the single source of truth and the sole serialization point
//! for the single-open-session invariant. Every mutation is *conditioned*:
//! it checks and writes inside one critical section (one redb write
//! transaction, or one mutex hold for the in-memory store). Callers never
//! read a row and write back an unconditioned value.
//!
//! | Operation        | Condition                              | Outcome when condition fails |
//! |------------------|----------------------------------------|------------------------------|
//! | `create_open`    | user has no open session               | `Ok(None)`                   |
//! | `close_open`     | user has an open session               | `Ok(None)`                   |
//! | `close_if_idle`  | open session with `last_seen < cutoff` | `Ok(None)`                   |
//! | `touch_open`     | user has an open session               | `Ok(None)`                   |
//! | `move_open`      | open session in another room, `last_seen <= at` | `Ok(None)`          |

use crate::{PresenceError, PresenceSession, RoomId, SessionId, UserId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

// =============================================================================
// SESSION STORE TRAIT
// =============================================================================

/// Conditioned operations over presence sessions, keyed by user.
///
/// Implementations must be safe to share between request tasks and the
/// reaper.
pub trait SessionStore: Send + Sync {
    /// Open a session for `user` in `room` at `at`, unless one is already open.
    ///
    /// Returns the new session, or `None` if an open session already existed.
    fn create_open(
        &self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError>;

    /// Close the user's open session with `end_time = at`.
    ///
    /// Returns the closed session, or `None` if nothing was open.
    fn close_open(
        &self,
        user: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError>;

    /// Close the user's open session only if it has been silent since
    /// before `cutoff`.
    ///
    /// Used by the reaper so that a heartbeat landing between its scan and
    /// its close keeps the session alive.
    fn close_if_idle(
        &self,
        user: UserId,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError>;

    /// Refresh `last_seen` on the user's open session. `last_seen` never
    /// moves backwards.
    ///
    /// Returns the updated session, or `None` if nothing was open.
    fn touch_open(
        &self,
        user: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError>;

    /// Close the user's open session and open a new one in `room`, both at
    /// `at`, as one step. Either both happen or neither does.
    ///
    /// Returns `(closed, opened)`, or `None` if nothing was open, the open
    /// session is already in `room`, or it was refreshed after `at`.
    fn move_open(
        &self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Option<(PresenceSession, PresenceSession)>, PresenceError>;

    /// The user's open session, if any.
    fn get_open(&self, user: UserId) -> Result<Option<PresenceSession>, PresenceError>;

    /// All open sessions with `last_seen < cutoff`.
    fn open_idle_since(&self, cutoff: DateTime<Utc>)
    -> Result<Vec<PresenceSession>, PresenceError>;

    /// All open sessions, ordered by user.
    fn open_sessions(&self) -> Result<Vec<PresenceSession>, PresenceError>;

    /// Sessions that started at or after `since`, ordered by start time.
    fn all_since(&self, since: DateTime<Utc>) -> Result<Vec<PresenceSession>, PresenceError>;

    /// One user's sessions that started at or after `since`, ordered by
    /// start time.
    fn for_user(
        &self,
        user: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PresenceSession>, PresenceError>;
}

/// Order sessions for reporting: start time, then id.
pub(crate) fn sort_by_start(sessions: &mut [PresenceSession]) {
    sessions.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then(a.session_id.cmp(&b.session_id))
    });
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    sessions: BTreeMap<SessionId, PresenceSession>,
    open: BTreeMap<UserId, SessionId>,
    next_session_id: u64,
}

impl MemoryInner {
    fn open_session_mut(&mut self, user: UserId) -> Option<&mut PresenceSession> {
        let id = self.open.get(&user)?;
        self.sessions.get_mut(id)
    }

    fn close(&mut self, user: UserId, at: DateTime<Utc>) -> Option<PresenceSession> {
        let id = self.open.remove(&user)?;
        let session = self.sessions.get_mut(&id)?;
        session.end_time = Some(at);
        Some(session.clone())
    }

    fn create(&mut self, user: UserId, room: RoomId, at: DateTime<Utc>) -> PresenceSession {
        self.next_session_id = self.next_session_id.saturating_add(1);
        let id = SessionId(self.next_session_id);
        let session = PresenceSession::open(id, user, room, at);
        self.sessions.insert(id, session.clone());
        self.open.insert(user, id);
        session
    }
}

/// Volatile session store. Used by tests and by single-process deployments
/// that do not need history to survive restarts.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: Mutex<MemoryInner>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, PresenceError> {
        self.inner
            .lock()
            .map_err(|_| PresenceError::Storage("session store lock poisoned".to_string()))
    }

    /// Number of stored sessions, open or closed.
    pub fn len(&self) -> Result<usize, PresenceError> {
        Ok(self.lock()?.sessions.len())
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> Result<bool, PresenceError> {
        Ok(self.lock()?.sessions.is_empty())
    }
}

impl SessionStore for MemorySessionStore {
    fn create_open(
        &self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError> {
        let mut inner = self.lock()?;
        if inner.open.contains_key(&user) {
            return Ok(None);
        }
        Ok(Some(inner.create(user, room, at)))
    }

    fn close_open(
        &self,
        user: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError> {
        Ok(self.lock()?.close(user, at))
    }

    fn close_if_idle(
        &self,
        user: UserId,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError> {
        let mut inner = self.lock()?;
        let idle = inner
            .open_session_mut(user)
            .is_some_and(|s| s.is_idle_before(cutoff));
        if !idle {
            return Ok(None);
        }
        Ok(inner.close(user, at))
    }

    fn touch_open(
        &self,
        user: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError> {
        let mut inner = self.lock()?;
        Ok(inner.open_session_mut(user).map(|session| {
            session.touch(at);
            session.clone()
        }))
    }

    fn move_open(
        &self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Option<(PresenceSession, PresenceSession)>, PresenceError> {
        let mut inner = self.lock()?;
        let movable = inner
            .open_session_mut(user)
            .is_some_and(|s| s.room_id != room && s.last_seen <= at);
        if !movable {
            return Ok(None);
        }
        let Some(closed) = inner.close(user, at) else {
            return Ok(None);
        };
        let opened = inner.create(user, room, at);
        Ok(Some((closed, opened)))
    }

    fn get_open(&self, user: UserId) -> Result<Option<PresenceSession>, PresenceError> {
        let inner = self.lock()?;
        Ok(inner
            .open
            .get(&user)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    fn open_idle_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PresenceSession>, PresenceError> {
        Ok(self
            .open_sessions()?
            .into_iter()
            .filter(|s| s.is_idle_before(cutoff))
            .collect())
    }

    fn open_sessions(&self) -> Result<Vec<PresenceSession>, PresenceError> {
        let inner = self.lock()?;
        Ok(inner
            .open
            .values()
            .filter_map(|id| inner.sessions.get(id))
            .cloned()
            .collect())
    }

    fn all_since(&self, since: DateTime<Utc>) -> Result<Vec<PresenceSession>, PresenceError> {
        let inner = self.lock()?;
        let mut sessions: Vec<PresenceSession> = inner
            .sessions
            .values()
            .filter(|s| s.start_time >= since)
            .cloned()
            .collect();
        sort_by_start(&mut sessions);
        Ok(sessions)
    }

    fn for_user(
        &self,
        user: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PresenceSession>, PresenceError> {
        Ok(self
            .all_since(since)?
            .into_iter()
            .filter(|s| s.user_id == user)
            .collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("base time") + Duration::minutes(minute)
    }

    #[test]
    fn create_is_refused_while_open() {
        let store = MemorySessionStore::new();
        let first = store.create_open(UserId(1), RoomId(5), t(0)).expect("create");
        assert!(first.is_some());
        let second = store.create_open(UserId(1), RoomId(9), t(1)).expect("create");
        assert!(second.is_none());
        assert_eq!(store.len().expect("len"), 1);
    }

    #[test]
    fn close_twice_is_idempotent() {
        let store = MemorySessionStore::new();
        store.create_open(UserId(1), RoomId(5), t(0)).expect("create");

        let closed = store.close_open(UserId(1), t(3)).expect("close");
        assert_eq!(closed.and_then(|s| s.end_time), Some(t(3)));
        let after_first = store.all_since(t(-1)).expect("all");

        assert!(store.close_open(UserId(1), t(4)).expect("close").is_none());
        assert_eq!(store.all_since(t(-1)).expect("all"), after_first);
    }

    #[test]
    fn touch_without_open_session_is_noop() {
        let store = MemorySessionStore::new();
        assert!(store.touch_open(UserId(1), t(0)).expect("touch").is_none());
        assert!(store.is_empty().expect("empty"));
    }

    #[test]
    fn close_if_idle_respects_fresh_heartbeat() {
        let store = MemorySessionStore::new();
        store.create_open(UserId(1), RoomId(5), t(0)).expect("create");
        store.touch_open(UserId(1), t(30)).expect("touch");

        let reaped = store.close_if_idle(UserId(1), t(20), t(41)).expect("reap");
        assert!(reaped.is_none());
        assert!(store.get_open(UserId(1)).expect("get").is_some());

        let reaped = store.close_if_idle(UserId(1), t(31), t(52)).expect("reap");
        assert_eq!(reaped.and_then(|s| s.end_time), Some(t(52)));
    }

    #[test]
    fn move_closes_and_opens_together() {
        let store = MemorySessionStore::new();
        assert!(store.move_open(UserId(1), RoomId(9), t(1)).expect("move").is_none());

        store.create_open(UserId(1), RoomId(5), t(0)).expect("create");
        store.touch_open(UserId(1), t(10)).expect("touch");
        assert!(store.move_open(UserId(1), RoomId(5), t(12)).expect("move").is_none());
        assert!(store.move_open(UserId(1), RoomId(9), t(4)).expect("move").is_none());

        let (closed, opened) = store
            .move_open(UserId(1), RoomId(9), t(12))
            .expect("move")
            .expect("moved");
        assert_eq!(closed.room_id, RoomId(5));
        assert_eq!(closed.end_time, Some(t(12)));
        assert_eq!(opened.room_id, RoomId(9));
        assert_eq!(opened.start_time, t(12));
        assert_eq!(store.open_sessions().expect("open"), vec![opened]);
        assert_eq!(store.len().expect("len"), 2);
    }

    #[test]
    fn queries_filter_and_order() {
        let store = MemorySessionStore::new();
        store.create_open(UserId(2), RoomId(1), t(10)).expect("create");
        store.create_open(UserId(1), RoomId(1), t(5)).expect("create");
        store.close_open(UserId(1), t(6)).expect("close");
        store.create_open(UserId(1), RoomId(2), t(20)).expect("create");

        let all: Vec<_> = store
            .all_since(t(0))
            .expect("all")
            .iter()
            .map(|s| s.start_time)
            .collect();
        assert_eq!(all, vec![t(5), t(10), t(20)]);

        assert_eq!(store.for_user(UserId(1), t(7)).expect("user").len(), 1);
        assert_eq!(store.open_sessions().expect("open").len(), 2);
        assert_eq!(store.open_idle_since(t(15)).expect("idle").len(), 1);
    }
}
