//! # Proxy Registration
//!
//! Announces this service to the reverse proxy at startup. The request is
//! retried every [`RETRY_INTERVAL`] until the proxy answers 200 or the
//! token is cancelled.

use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause between registration attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Body POSTed to the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterRequest {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl RegisterRequest {
    pub fn http(host: &str, port: u16) -> Self {
        Self {
            scheme: "http".to_string(),
            host: host.to_string(),
            port,
        }
    }
}

/// Outcome of the registration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Register with the proxy at `proxy_url`, retrying every `retry`.
pub async fn register_with_proxy(
    http: reqwest::Client,
    proxy_url: String,
    request: RegisterRequest,
    retry: Duration,
    cancel: CancellationToken,
) -> Registration {
    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        let outcome = tokio::select! {
            result = http.post(&proxy_url).json(&request).send() => result,
            () = cancel.cancelled() => return Registration::Cancelled { attempts },
        };

        match outcome {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                tracing::info!("Registered with proxy at {} as {}:{}", proxy_url, request.host, request.port);
                return Registration::Registered { attempts };
            }
            Ok(resp) => {
                tracing::warn!("Proxy registration refused with status {}, retrying", resp.status().as_u16());
            }
            Err(e) => {
                tracing::warn!("Proxy registration failed: {}, retrying", e);
            }
        }

        tokio::select! {
            () = tokio::time::sleep(retry) => {}
            () = cancel.cancelled() => return Registration::Cancelled { attempts },
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
