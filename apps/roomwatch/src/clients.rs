//! # Confidence Service Clients
//!
//! reqwest wrappers around the two external confidence services.
//!
//! - Estimator: `POST` multipart, field `file` holding the BLE rows followed
//!   by the WiFi rows. Replies `{"predicted_percentage": int}`.
//! - Inquiry: `POST` JSON `{"wifi_data", "ble_data"}`. Replies
//!   `{"percentage_processed": int}`.
//!
//! Every failure (connect, timeout, non-200, undecodable body) becomes
//! [`PresenceError::Dependency`]. Replies are clamped to 0..=100.

use crate::config::Endpoints;
use roomwatch_core::PresenceError;
use roomwatch_core::primitives::MAX_CONFIDENCE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    predicted_percentage: i64,
}

#[derive(Debug, Serialize)]
struct InquiryRequest<'a> {
    wifi_data: &'a str,
    ble_data: &'a str,
}

#[derive(Debug, Deserialize)]
struct InquiryResponse {
    percentage_processed: i64,
}

/// HTTP client for the estimator and inquiry services.
#[derive(Clone)]
pub struct ConfidenceClient {
    http: reqwest::Client,
    estimation_url: String,
    inquiry_url: String,
}

impl ConfidenceClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(endpoints: &Endpoints, timeout: Duration) -> Result<Self, PresenceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PresenceError::Dependency(format!("Cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            estimation_url: endpoints.estimation_url.clone(),
            inquiry_url: endpoints.inquiry_url.clone(),
        })
    }

    pub fn estimation_url(&self) -> &str {
        &self.estimation_url
    }

    /// Ask the estimator for its presence confidence.
    pub async fn estimate(&self, ble: &[u8], wifi: &[u8], stamp: i64) -> Result<u8, PresenceError> {
        let part = reqwest::multipart::Part::bytes(combine_csv(ble, wifi))
            .file_name(format!("combined_data_{stamp}.csv"))
            .mime_str("text/csv")
            .map_err(|e| PresenceError::Dependency(format!("estimator request: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let req = self.http.post(&self.estimation_url).multipart(form);
        let resp = send(req, "estimator").await?;
        let body: PredictionResponse = decode(resp, "estimator").await?;
        Ok(to_confidence(body.predicted_percentage))
    }

    /// Ask the inquiry service for its confidence on the same upload.
    pub async fn inquire(&self, wifi: &str, ble: &str) -> Result<u8, PresenceError> {
        let body = InquiryRequest {
            wifi_data: wifi,
            ble_data: ble,
        };
        let req = self.http.post(&self.inquiry_url).json(&body);
        let resp = send(req, "inquiry").await?;
        let body: InquiryResponse = decode(resp, "inquiry").await?;
        Ok(to_confidence(body.percentage_processed))
    }
}

async fn send(
    req: reqwest::RequestBuilder,
    service: &str,
) -> Result<reqwest::Response, PresenceError> {
    req.send().await.map_err(|e| {
        if e.is_timeout() {
            PresenceError::Dependency(format!("{service} timed out"))
        } else {
            PresenceError::Dependency(format!("{service} unreachable: {e}"))
        }
    })
}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    service: &str,
) -> Result<T, PresenceError> {
    let status = resp.status();
    if status != reqwest::StatusCode::OK {
        return Err(PresenceError::Dependency(format!(
            "{service} returned status {}",
            status.as_u16()
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| PresenceError::Dependency(format!("{service} reply undecodable: {e}")))
}

fn to_confidence(value: i64) -> u8 {
    value.clamp(0, i64::from(MAX_CONFIDENCE)) as u8
}

/// BLE rows followed by WiFi rows, one file.
pub fn combine_csv(ble: &[u8], wifi: &[u8]) -> Vec<u8> {
    let mut combined = Vec::with_capacity(ble.len() + wifi.len() + 1);
    combined.extend_from_slice(ble);
    if !combined.is_empty() && !combined.ends_with(b"\n") {
        combined.push(b'\n');
    }
    combined.extend_from_slice(wifi);
    combined
}

// =============================================================================
// TESTS
// =============================================================================
