//! # redb-backed Presence Storage
//!
//! A disk-backed session store and fingerprint index using the redb
//! embedded database.
//!
//! redb gives us:
//! - ACID transactions (every conditioned mutation is one write transaction)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Rows are encoded with postcard. Nothing is cached in memory: every call
//! reads the database, so several request tasks and the reaper can share
//! one `RedbStore` behind an `Arc`.

use crate::fingerprint::{FingerprintIndex, normalize_identifier};
use crate::primitives::MAX_IDENTIFIER_LENGTH;
use crate::store::{SessionStore, sort_by_start};
use crate::{PresenceError, PresenceSession, Room, RoomId, SessionId, User, UserId};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Table for sessions: SessionId(u64) -> serialized PresenceSession
const SESSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("sessions");

/// Table for the open-session index: UserId(u64) -> SessionId(u64)
///
/// A user has an entry here exactly while they have an open session.
const OPEN_SESSIONS: TableDefinition<u64, u64> = TableDefinition::new("open_sessions");

/// Table for users: UserId(u64) -> serialized User
const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

/// Table for the username index: username -> UserId(u64)
const USERNAMES: TableDefinition<&str, u64> = TableDefinition::new("usernames");

/// Table for rooms: RoomId(u64) -> serialized Room
const ROOMS: TableDefinition<u64, &[u8]> = TableDefinition::new("rooms");

/// Table for BLE beacons: normalized uuid -> RoomId(u64)
const BEACONS: TableDefinition<&str, u64> = TableDefinition::new("beacons");

/// Table for WiFi access points: normalized bssid -> RoomId(u64)
const ACCESS_POINTS: TableDefinition<&str, u64> = TableDefinition::new("access_points");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_SESSION_ID: &str = "next_session_id";
const NEXT_USER_ID: &str = "next_user_id";

fn storage(e: impl std::fmt::Display) -> PresenceError {
    PresenceError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, PresenceError> {
    postcard::to_allocvec(value).map_err(|e| PresenceError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PresenceError> {
    postcard::from_bytes(bytes).map_err(|e| PresenceError::Serialization(e.to_string()))
}

fn load_session<T>(table: &T, id: u64) -> Result<Option<PresenceSession>, PresenceError>
where
    T: ReadableTable<u64, &'static [u8]>,
{
    match table.get(id).map_err(storage)? {
        Some(bytes) => decode(bytes.value()).map(Some),
        None => Ok(None),
    }
}

/// A disk-backed presence store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a presence database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PresenceError> {
        let db = Database::create(path.as_ref()).map_err(storage)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(storage)?;
            let _ = write_txn.open_table(SESSIONS).map_err(storage)?;
            let _ = write_txn.open_table(OPEN_SESSIONS).map_err(storage)?;
            let _ = write_txn.open_table(USERS).map_err(storage)?;
            let _ = write_txn.open_table(USERNAMES).map_err(storage)?;
            let _ = write_txn.open_table(ROOMS).map_err(storage)?;
            let _ = write_txn.open_table(BEACONS).map_err(storage)?;
            let _ = write_txn.open_table(ACCESS_POINTS).map_err(storage)?;
            let _ = write_txn.open_table(METADATA).map_err(storage)?;
            write_txn.commit().map_err(storage)?;
        }

        Ok(Self { db })
    }

    /// Cheap liveness probe used by the health endpoint.
    pub fn ping(&self) -> Result<(), PresenceError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let _ = read_txn.open_table(METADATA).map_err(storage)?;
        Ok(())
    }

    // =========================================================================
    // USERS
    // =========================================================================

    /// Register a new user and assign the next user id.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the username is empty, too long, or already taken.
    pub fn add_user(&self, username: &str) -> Result<User, PresenceError> {
        let username = username.trim();
        if username.is_empty() || username.len() > MAX_IDENTIFIER_LENGTH {
            return Err(PresenceError::InvalidInput(format!(
                "username must be 1..={MAX_IDENTIFIER_LENGTH} bytes"
            )));
        }

        let write_txn = self.db.begin_write().map_err(storage)?;
        let user = {
            let mut names = write_txn.open_table(USERNAMES).map_err(storage)?;
            let taken = names.get(username).map_err(storage)?.is_some();
            if taken {
                return Err(PresenceError::InvalidInput(format!(
                    "user already exists: {username}"
                )));
            }

            let mut meta = write_txn.open_table(METADATA).map_err(storage)?;
            let next = meta
                .get(NEXT_USER_ID)
                .map_err(storage)?
                .map(|v| v.value())
                .unwrap_or(0)
                .saturating_add(1);
            meta.insert(NEXT_USER_ID, next).map_err(storage)?;

            let user = User {
                user_id: UserId(next),
                username: username.to_string(),
            };
            let mut users = write_txn.open_table(USERS).map_err(storage)?;
            users
                .insert(next, encode(&user)?.as_slice())
                .map_err(storage)?;
            names.insert(username, next).map_err(storage)?;
            user
        };
        write_txn.commit().map_err(storage)?;
        Ok(user)
    }

    /// Look up a user by exact username.
    pub fn user_by_name(&self, username: &str) -> Result<Option<User>, PresenceError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let names = read_txn.open_table(USERNAMES).map_err(storage)?;
        let Some(id) = names.get(username).map_err(storage)?.map(|v| v.value()) else {
            return Ok(None);
        };
        let users = read_txn.open_table(USERS).map_err(storage)?;
        match users.get(id).map_err(storage)? {
            Some(bytes) => decode(bytes.value()).map(Some),
            None => Ok(None),
        }
    }

    /// All registered users in id order.
    pub fn users(&self) -> Result<Vec<User>, PresenceError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(USERS).map_err(storage)?;

        let mut users = Vec::new();
        for entry in table.iter().map_err(storage)? {
            let (_, value) = entry.map_err(storage)?;
            users.push(decode(value.value())?);
        }
        Ok(users)
    }

    // =========================================================================
    // ROOMS AND FINGERPRINTS
    // =========================================================================

    /// Insert or rename a room. Room 0 is reserved for negative samples.
    pub fn add_room(&self, room_id: RoomId, room_name: &str) -> Result<Room, PresenceError> {
        if room_id.0 == 0 {
            return Err(PresenceError::InvalidInput(
                "room id 0 is reserved".to_string(),
            ));
        }
        let room = Room::new(room_id, room_name.trim());

        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let mut rooms = write_txn.open_table(ROOMS).map_err(storage)?;
            rooms
                .insert(room_id.0, encode(&room)?.as_slice())
                .map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;
        Ok(room)
    }

    /// All rooms in id order.
    pub fn rooms(&self) -> Result<Vec<Room>, PresenceError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(ROOMS).map_err(storage)?;

        let mut rooms = Vec::new();
        for entry in table.iter().map_err(storage)? {
            let (_, value) = entry.map_err(storage)?;
            rooms.push(decode(value.value())?);
        }
        Ok(rooms)
    }

    /// Register a BLE beacon UUID for an existing room.
    pub fn add_beacon(&self, uuid: &str, room: RoomId) -> Result<(), PresenceError> {
        self.insert_fingerprint(BEACONS, uuid, room)
    }

    /// Register a WiFi BSSID for an existing room.
    pub fn add_access_point(&self, bssid: &str, room: RoomId) -> Result<(), PresenceError> {
        self.insert_fingerprint(ACCESS_POINTS, bssid, room)
    }

    fn insert_fingerprint(
        &self,
        table: TableDefinition<'static, &'static str, u64>,
        identifier: &str,
        room: RoomId,
    ) -> Result<(), PresenceError> {
        let key = normalize_identifier(identifier);
        if key.is_empty() || key.len() > MAX_IDENTIFIER_LENGTH {
            return Err(PresenceError::InvalidInput(format!(
                "identifier must be 1..={MAX_IDENTIFIER_LENGTH} bytes"
            )));
        }

        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let rooms = write_txn.open_table(ROOMS).map_err(storage)?;
            let known = rooms.get(room.0).map_err(storage)?.is_some();
            if !known {
                return Err(PresenceError::InvalidInput(format!("unknown room: {room}")));
            }
            let mut fingerprints = write_txn.open_table(table).map_err(storage)?;
            fingerprints.insert(key.as_str(), room.0).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;
        Ok(())
    }

    fn lookup_fingerprint(
        &self,
        table: TableDefinition<'static, &'static str, u64>,
        identifier: &str,
    ) -> Result<Option<RoomId>, PresenceError> {
        let key = normalize_identifier(identifier);
        let read_txn = self.db.begin_read().map_err(storage)?;
        let fingerprints = read_txn.open_table(table).map_err(storage)?;
        Ok(fingerprints
            .get(key.as_str())
            .map_err(storage)?
            .map(|v| RoomId(v.value())))
    }

    // =========================================================================
    // SESSION HELPERS
    // =========================================================================

    /// Close the user's open session inside `write_txn`. When `idle_cutoff`
    /// is set the session is only closed if it is still idle before it.
    fn close_in(
        write_txn: &WriteTransaction,
        user: UserId,
        at: DateTime<Utc>,
        idle_cutoff: Option<DateTime<Utc>>,
    ) -> Result<Option<PresenceSession>, PresenceError> {
        let mut open = write_txn.open_table(OPEN_SESSIONS).map_err(storage)?;
        let Some(id) = open.get(user.0).map_err(storage)?.map(|v| v.value()) else {
            return Ok(None);
        };

        let mut sessions = write_txn.open_table(SESSIONS).map_err(storage)?;
        let Some(mut session) = load_session(&sessions, id)? else {
            return Err(PresenceError::Storage(format!(
                "open index references missing session {id}"
            )));
        };
        if idle_cutoff.is_some_and(|cutoff| !session.is_idle_before(cutoff)) {
            return Ok(None);
        }

        session.end_time = Some(at);
        sessions
            .insert(id, encode(&session)?.as_slice())
            .map_err(storage)?;
        open.remove(user.0).map_err(storage)?;
        Ok(Some(session))
    }

    /// Insert a new open session inside `write_txn`. The caller has
    /// checked that the user has none.
    fn create_in(
        write_txn: &WriteTransaction,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<PresenceSession, PresenceError> {
        let mut meta = write_txn.open_table(METADATA).map_err(storage)?;
        let next = meta
            .get(NEXT_SESSION_ID)
            .map_err(storage)?
            .map(|v| v.value())
            .unwrap_or(0)
            .saturating_add(1);
        meta.insert(NEXT_SESSION_ID, next).map_err(storage)?;

        let session = PresenceSession::open(SessionId(next), user, room, at);
        let mut sessions = write_txn.open_table(SESSIONS).map_err(storage)?;
        sessions
            .insert(next, encode(&session)?.as_slice())
            .map_err(storage)?;
        let mut open = write_txn.open_table(OPEN_SESSIONS).map_err(storage)?;
        open.insert(user.0, next).map_err(storage)?;
        Ok(session)
    }

    fn close_committed(
        &self,
        user: UserId,
        at: DateTime<Utc>,
        idle_cutoff: Option<DateTime<Utc>>,
    ) -> Result<Option<PresenceSession>, PresenceError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        let closed = Self::close_in(&write_txn, user, at, idle_cutoff)?;
        write_txn.commit().map_err(storage)?;
        Ok(closed)
    }

    fn collect_sessions(
        &self,
        keep: impl Fn(&PresenceSession) -> bool,
    ) -> Result<Vec<PresenceSession>, PresenceError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(SESSIONS).map_err(storage)?;

        let mut sessions = Vec::new();
        for entry in table.iter().map_err(storage)? {
            let (_, value) = entry.map_err(storage)?;
            let session: PresenceSession = decode(value.value())?;
            if keep(&session) {
                sessions.push(session);
            }
        }
        sort_by_start(&mut sessions);
        Ok(sessions)
    }
}

// =============================================================================
// SESSIONSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl SessionStore for RedbStore {
    fn create_open(
        &self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        let already_open = {
            let open = write_txn.open_table(OPEN_SESSIONS).map_err(storage)?;
            open.get(user.0).map_err(storage)?.is_some()
        };
        let created = if already_open {
            None
        } else {
            Some(Self::create_in(&write_txn, user, room, at)?)
        };
        write_txn.commit().map_err(storage)?;
        Ok(created)
    }

    fn close_open(
        &self,
        user: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError> {
        self.close_committed(user, at, None)
    }

    fn close_if_idle(
        &self,
        user: UserId,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError> {
        self.close_committed(user, at, Some(cutoff))
    }

    fn touch_open(
        &self,
        user: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<PresenceSession>, PresenceError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        let touched = {
            let open = write_txn.open_table(OPEN_SESSIONS).map_err(storage)?;
            match open.get(user.0).map_err(storage)?.map(|v| v.value()) {
                None => None,
                Some(id) => {
                    let mut sessions = write_txn.open_table(SESSIONS).map_err(storage)?;
                    let mut session = load_session(&sessions, id)?.ok_or_else(|| {
                        PresenceError::Storage(format!(
                            "open index references missing session {id}"
                        ))
                    })?;
                    session.touch(at);
                    sessions
                        .insert(id, encode(&session)?.as_slice())
                        .map_err(storage)?;
                    Some(session)
                }
            }
        };
        write_txn.commit().map_err(storage)?;
        Ok(touched)
    }

    fn move_open(
        &self,
        user: UserId,
        room: RoomId,
        at: DateTime<Utc>,
    ) -> Result<Option<(PresenceSession, PresenceSession)>, PresenceError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        let movable = {
            let open = write_txn.open_table(OPEN_SESSIONS).map_err(storage)?;
            match open.get(user.0).map_err(storage)?.map(|v| v.value()) {
                None => false,
                Some(id) => {
                    let sessions = write_txn.open_table(SESSIONS).map_err(storage)?;
                    load_session(&sessions, id)?
                        .is_some_and(|s| s.room_id != room && s.last_seen <= at)
                }
            }
        };
        if !movable {
            write_txn.abort().map_err(storage)?;
            return Ok(None);
        }

        let Some(closed) = Self::close_in(&write_txn, user, at, None)? else {
            write_txn.abort().map_err(storage)?;
            return Ok(None);
        };
        let opened = Self::create_in(&write_txn, user, room, at)?;
        write_txn.commit().map_err(storage)?;
        Ok(Some((closed, opened)))
    }

    fn get_open(&self, user: UserId) -> Result<Option<PresenceSession>, PresenceError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let open = read_txn.open_table(OPEN_SESSIONS).map_err(storage)?;
        let Some(id) = open.get(user.0).map_err(storage)?.map(|v| v.value()) else {
            return Ok(None);
        };
        let sessions = read_txn.open_table(SESSIONS).map_err(storage)?;
        load_session(&sessions, id)
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
        let read_txn = self.db.begin_read().map_err(storage)?;
        let open = read_txn.open_table(OPEN_SESSIONS).map_err(storage)?;
        let sessions = read_txn.open_table(SESSIONS).map_err(storage)?;

        let mut result = Vec::new();
        for entry in open.iter().map_err(storage)? {
            let (_, id) = entry.map_err(storage)?;
            if let Some(session) = load_session(&sessions, id.value())? {
                result.push(session);
            }
        }
        Ok(result)
    }

    fn all_since(&self, since: DateTime<Utc>) -> Result<Vec<PresenceSession>, PresenceError> {
        self.collect_sessions(|s| s.start_time >= since)
    }

    fn for_user(
        &self,
        user: UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PresenceSession>, PresenceError> {
        self.collect_sessions(|s| s.user_id == user && s.start_time >= since)
    }
}

// =============================================================================
// FINGERPRINTINDEX TRAIT IMPLEMENTATION
// =============================================================================

impl FingerprintIndex for RedbStore {
    fn room_for_beacon(&self, uuid: &str) -> Result<Option<RoomId>, PresenceError> {
        self.lookup_fingerprint(BEACONS, uuid)
    }

    fn room_for_access_point(&self, bssid: &str) -> Result<Option<RoomId>, PresenceError> {
        self.lookup_fingerprint(ACCESS_POINTS, bssid)
    }
}

// =============================================================================
// TESTS
// =============================================================================
