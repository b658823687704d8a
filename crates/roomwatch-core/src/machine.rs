//! # Presence State Machine
//!
//! Applies a fused disposition and a resolved room to the session store.
//!
//! Per user there are two states, `NoSession` and `Open(room)`:
//!
//! | state        | disposition              | effect                       |
//! |--------------|--------------------------|------------------------------|
//! | `NoSession`  | `Present`                | open a session in the room   |
//! | `Open(r)`    | `Present`                | refresh `last_seen`          |
//! | any          | `Absent*`                | close the open session, if any |
//!
//! The machine holds no state of its own. Every step is one conditioned
//! store operation, and a lost race is retried once with the opposite
//! operation (create refused: touch instead; touch found nothing: create
//! instead).

use crate::fusion::Disposition;
use crate::store::SessionStore;
use crate::{PresenceError, PresenceSession, RoomId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user presence state, as read from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    NoSession,
    Open(RoomId),
}

/// What a state machine step did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A new session was opened.
    Started(SessionId),
    /// The open session's `last_seen` was refreshed.
    Refreshed,
    /// The open session was closed.
    Ended,
    /// There was no open session to close or refresh.
    NoOpenSession,
    /// An open session already existed, so none was created.
    AlreadyOpen,
    /// The open session was closed and a new one opened in another room.
    Moved {
        from: RoomId,
        to: RoomId,
        session: SessionId,
    },
}

/// How a present upload that resolves to a different room than the open
/// session is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoomChangePolicy {
    /// Refresh the open session; its room never changes.
    #[default]
    #[serde(rename = "keep")]
    KeepOriginal,
    /// Close the open session and open a new one in the resolved room.
    #[serde(rename = "split")]
    SplitOnChange,
}

/// Drives session transitions against a [`SessionStore`].
pub struct PresenceStateMachine<'a, S: SessionStore + ?Sized> {
    store: &'a S,
    room_change: RoomChangePolicy,
}

impl<'a, S: SessionStore + ?Sized> PresenceStateMachine<'a, S> {
    #[must_use]
    pub fn new(store: &'a S, room_change: RoomChangePolicy) -> Self {
        Self { store, room_change }
    }

    /// Current state of `user`.
    pub fn state(&self, user: UserId) -> Result<PresenceState, PresenceError> {
        Ok(match self.store.get_open(user)? {
            Some(session) => PresenceState::Open(session.room_id),
            None => PresenceState::NoSession,
        })
    }

    /// Open a session unless one is already open.
    pub fn start_session(
        &self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Transition, PresenceError> {
        Ok(match self.store.create_open(user, room, at)? {
            Some(session) => Transition::Started(session.session_id),
            None => Transition::AlreadyOpen,
        })
    }

    /// Close the open session at `at`. Closing twice is the same as once.
    pub fn end_session(&self, user: UserId, at: DateTime<Utc>) -> Result<Transition, PresenceError> {
        Ok(match self.store.close_open(user, at)? {
            Some(_) => Transition::Ended,
            None => Transition::NoOpenSession,
        })
    }

    /// Refresh `last_seen` on the open session. The room is unchanged.
    pub fn heartbeat(&self, user: UserId, at: DateTime<Utc>) -> Result<Transition, PresenceError> {
        Ok(match self.store.touch_open(user, at)? {
            Some(_) => Transition::Refreshed,
            None => Transition::NoOpenSession,
        })
    }

    /// Apply one upload's outcome.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a present disposition without a resolved room;
    ///   the store is not touched
    /// - any store error
    pub fn apply_disposition(
        &self,
        user: UserId,
        disposition: Disposition,
        resolved_room: Option<RoomId>,
        at: DateTime<Utc>,
    ) -> Result<Transition, PresenceError> {
        if !disposition.is_present() {
            return self.end_session(user, at);
        }

        let room = resolved_room.ok_or_else(|| {
            PresenceError::InvalidInput("present disposition without a resolved room".to_string())
        })?;

        match self.store.get_open(user)? {
            None => self.start_or_refresh(user, room, at),
            Some(open) if self.should_move(&open, room, at) => self.move_session(user, room, at),
            Some(_) => self.refresh_or_start(user, room, at),
        }
    }

    /// Only uploads at or after the last refresh may split a session, so a
    /// late-arriving sample cannot end a session before its `last_seen`.
    fn should_move(&self, open: &PresenceSession, room: RoomId, at: DateTime<Utc>) -> bool {
        self.room_change == RoomChangePolicy::SplitOnChange
            && open.room_id != room
            && at >= open.last_seen
    }

    fn start_or_refresh(
        &self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Transition, PresenceError> {
        match self.start_session(user, room, at)? {
            Transition::AlreadyOpen => settle(self.heartbeat(user, at)?),
            started => Ok(started),
        }
    }

    fn refresh_or_start(
        &self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Transition, PresenceError> {
        match self.heartbeat(user, at)? {
            Transition::NoOpenSession => settle(self.start_session(user, room, at)?),
            refreshed => Ok(refreshed),
        }
    }

    /// The close and the open are one store operation. If the open session
    /// changed since it was read, the upload is treated as a plain present.
    fn move_session(
        &self,
        user: UserId,
        to: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Transition, PresenceError> {
        match self.store.move_open(user, to, at)? {
            Some((closed, opened)) => Ok(Transition::Moved {
                from: closed.room_id,
                to,
                session: opened.session_id,
            }),
            None => self.refresh_or_start(user, to, at),
        }
    }
}

/// Outcome of the retry after a lost race. Losing twice means the user's
/// sessions are being changed faster than this upload can land.
fn settle(retried: Transition) -> Result<Transition, PresenceError> {
    match retried {
        Transition::NoOpenSession | Transition::AlreadyOpen => Err(PresenceError::Storage(
            "session changed concurrently, upload not applied".to_string(),
        )),
        other => Ok(other),
    }
}

// =============================================================================
// TESTS
// =============================================================================
