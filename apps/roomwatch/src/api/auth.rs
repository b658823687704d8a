//! # Authentication Module
//!
//! Uploads identify their user with HTTP Basic auth:
//! ```text
//! Authorization: Basic base64(<username>:<password>)
//! ```
//!
//! Only the username is used; it must belong to a registered user. A
//! missing or undecodable header counts as an unknown user.

use super::AppState;
use super::handlers::run_blocking;
use super::types::ApiError;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use roomwatch_core::{PresenceError, User};
use std::sync::Arc;

/// Username sent when the client gave no credentials.
pub const ANONYMOUS: &str = "anonymous";

/// Extract the username from an `Authorization: Basic` header value.
pub fn basic_auth_username(header_value: &str) -> Option<String> {
    let encoded = header_value
        .strip_prefix("Basic ")
        .or_else(|| header_value.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let username = credentials
        .split_once(':')
        .map_or(credentials.as_str(), |(user, _)| user);
    if username.is_empty() {
        None
    } else {
        Some(username.to_string())
    }
}

/// The registered user behind the request's Basic credentials.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let username = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(basic_auth_username)
            .unwrap_or_else(|| ANONYMOUS.to_string());

        let store = Arc::clone(&state.store);
        let lookup = username.clone();
        let user = run_blocking(move || store.user_by_name(&lookup)).await?;

        user.map(AuthUser)
            .ok_or_else(|| ApiError(PresenceError::UnknownUser(username)))
    }
}

// =============================================================================
// TESTS
// =============================================================================
