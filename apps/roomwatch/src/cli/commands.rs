//! # CLI Command Implementations

use roomwatch::api::{self, HistoryQuery};
use roomwatch::config::Config;
use roomwatch_core::{
    PresenceError, PresenceSession, RedbStore, RoomId, SessionStore, StaleSessionReaper, UserId,
    group_by_day, group_by_day_and_user,
};
use std::sync::Arc;

/// Which fingerprint table `cmd_fingerprint_add` writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Beacon,
    AccessPoint,
}

fn open_store(config: &Config) -> Result<RedbStore, PresenceError> {
    RedbStore::open(&config.storage.database)
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: Config) -> Result<(), PresenceError> {
    let store = Arc::new(open_store(&config)?);
    let endpoints = config.endpoints();

    println!("roomwatch server starting...");
    println!();
    println!("Configuration:");
    println!("  Mode:       {:?}", config.mode);
    println!("  Listen:     {}", config.bind_addr());
    println!("  Database:   {}", config.storage.database.display());
    println!("  Estimator:  {}", endpoints.estimation_url);
    println!("  Inquiry:    {}", endpoints.inquiry_url);
    println!("  Proxy:      {}", endpoints.proxy_url);
    println!("  Register:   {}", !endpoints.skip_registration);
    println!("  System URI: {}", config.registration.system_uri);
    println!(
        "  Fusion:     absent < {} <= inquiry <= {} < present",
        config.fusion.absent_below, config.fusion.present_above
    );
    println!(
        "  Reaper:     every {}s, idle after {}s",
        config.reaper.tick_secs, config.reaper.inactivity_secs
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    api::run_server(config, store).await
}

// =============================================================================
// STATUS / INIT
// =============================================================================

/// Show database counts.
pub fn cmd_status(config: &Config, json_mode: bool) -> Result<(), PresenceError> {
    let store = open_store(config)?;
    let users = store.users()?.len();
    let rooms = store.rooms()?.len();
    let open = store.open_sessions()?.len();

    if json_mode {
        print_json(&serde_json::json!({
            "database": config.storage.database.to_string_lossy(),
            "users": users,
            "rooms": rooms,
            "open_sessions": open,
        }));
        return Ok(());
    }

    println!("roomwatch Status");
    println!("================");
    println!("Database:      {}", config.storage.database.display());
    println!();
    println!("Users:         {}", users);
    println!("Rooms:         {}", rooms);
    println!("Open sessions: {}", open);
    Ok(())
}

/// Create the database file and the archive directories.
pub fn cmd_init(config: &Config) -> Result<(), PresenceError> {
    open_store(config)?;
    println!("Database ready at {}", config.storage.database.display());

    let storage = &config.storage;
    for dir in [
        &storage.upload_dir,
        &storage.negative_sample_dir,
        &storage.estimation_dir,
        &storage.fingerprint_dir,
    ] {
        std::fs::create_dir_all(dir).map_err(|e| {
            PresenceError::Io(format!("Cannot create '{}': {}", dir.display(), e))
        })?;
        println!("Directory ready at {}", dir.display());
    }
    Ok(())
}

// =============================================================================
// REFERENCE DATA
// =============================================================================

pub fn cmd_user_add(config: &Config, json_mode: bool, username: &str) -> Result<(), PresenceError> {
    let user = open_store(config)?.add_user(username)?;
    if json_mode {
        print_json(&serde_json::json!({ "user_id": user.user_id, "username": user.username }));
    } else {
        println!("Added user {} with id {}", user.username, user.user_id);
    }
    Ok(())
}

pub fn cmd_user_list(config: &Config, json_mode: bool) -> Result<(), PresenceError> {
    let users = open_store(config)?.users()?;
    if json_mode {
        print_json(&serde_json::json!({ "users": users }));
        return Ok(());
    }
    for user in &users {
        println!("{:>6}  {}", user.user_id, user.username);
    }
    Ok(())
}

pub fn cmd_room_add(
    config: &Config,
    json_mode: bool,
    room_id: u64,
    name: &str,
) -> Result<(), PresenceError> {
    let room = open_store(config)?.add_room(RoomId(room_id), name)?;
    if json_mode {
        print_json(&serde_json::json!({ "room_id": room.room_id, "room_name": room.room_name }));
    } else {
        println!("Added room {} ({})", room.room_id, room.room_name);
    }
    Ok(())
}

pub fn cmd_room_list(config: &Config, json_mode: bool) -> Result<(), PresenceError> {
    let rooms = open_store(config)?.rooms()?;
    if json_mode {
        print_json(&serde_json::json!({ "rooms": rooms }));
        return Ok(());
    }
    for room in &rooms {
        println!("{:>6}  {}", room.room_id, room.room_name);
    }
    Ok(())
}

pub fn cmd_fingerprint_add(
    config: &Config,
    modality: Modality,
    room_id: u64,
    identifier: &str,
) -> Result<(), PresenceError> {
    let store = open_store(config)?;
    match modality {
        Modality::Beacon => store.add_beacon(identifier, RoomId(room_id))?,
        Modality::AccessPoint => store.add_access_point(identifier, RoomId(room_id))?,
    }
    println!("Mapped {:?} {} to room {}", modality, identifier, room_id);
    Ok(())
}

// =============================================================================
// SESSIONS / SWEEP
// =============================================================================

/// Print history since `since` (or one month back), grouped by day.
pub fn cmd_sessions(
    config: &Config,
    json_mode: bool,
    user: Option<u64>,
    since: Option<String>,
) -> Result<(), PresenceError> {
    let offset = config.utc_offset()?;
    let since = HistoryQuery { date: since }.since(chrono::Utc::now(), offset)?;
    let store = open_store(config)?;

    match user {
        Some(id) => {
            let days = group_by_day(store.for_user(UserId(id), since)?, offset);
            if json_mode {
                print_json(&serde_json::json!({ "user_id": id, "history": days }));
                return Ok(());
            }
            for day in &days {
                println!("{}", day.date);
                day.sessions.iter().for_each(print_session);
            }
        }
        None => {
            let days = group_by_day_and_user(store.all_since(since)?, offset);
            if json_mode {
                print_json(&serde_json::json!({ "all_history": days }));
                return Ok(());
            }
            for day in &days {
                println!("{}", day.date);
                for user in &day.users {
                    println!("  user {}", user.user_id);
                    user.sessions.iter().for_each(print_session);
                }
            }
        }
    }
    Ok(())
}

fn print_session(session: &PresenceSession) {
    let end = session
        .end_time
        .map_or_else(|| "open".to_string(), |t| t.to_rfc3339());
    println!(
        "    #{} room {}  {} -> {}  (last seen {})",
        session.session_id,
        session.room_id,
        session.start_time.to_rfc3339(),
        end,
        session.last_seen.to_rfc3339()
    );
}

/// Run one stale session sweep now.
pub fn cmd_sweep(config: &Config, json_mode: bool) -> Result<(), PresenceError> {
    let store = open_store(config)?;
    let reaper = StaleSessionReaper::new(chrono::Duration::seconds(config.reaper.inactivity_secs));
    let report = reaper.sweep(&store, chrono::Utc::now())?;

    if json_mode {
        let failures: Vec<String> = report
            .failures
            .iter()
            .map(|(user, e)| format!("user {}: {}", user, e))
            .collect();
        print_json(&serde_json::json!({
            "closed": report.closed,
            "revived": report.revived,
            "failures": failures,
        }));
        return Ok(());
    }

    println!("Closed {} idle sessions", report.closed.len());
    report.closed.iter().for_each(print_session);
    for (user, e) in &report.failures {
        println!("  failed for user {}: {}", user, e);
    }
    Ok(())
}
