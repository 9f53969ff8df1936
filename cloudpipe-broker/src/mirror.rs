// cloudpipe-broker/src/mirror.rs
// ============================================================================
// Module: Peer Mirror
// Description: Fire-and-forget PATCH delivery to the peer broker.
// Purpose: Propagate local end changes to the remote pipe with retries.
// Dependencies: reqwest, tokio, serde_json
// ============================================================================

//! ## Overview
//! Whenever a pipe's local end changes, the broker pushes the new data to the
//! peer pipe URI as `{"other": {"data": ...}}`. Delivery runs on a detached
//! task so the triggering request never waits on the peer: each attempt must
//! return exactly 202 Accepted, anything else is retried with exponential
//! backoff, and after the retry budget is spent the update is dropped with a
//! warning. A later mirror may overtake an earlier one under retry; peers
//! reconcile on merge.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use tracing::warn;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Attempts before an update is dropped.
const MAX_RETRIES: u32 = 5;
/// First backoff delay.
const BASE_DELAY: Duration = Duration::from_secs(1);
/// Backoff ceiling.
const MAX_DELAY: Duration = Duration::from_secs(32);
/// Outbound request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by a single mirror attempt.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The request could not be sent.
    #[error("error sending update request: {0}")]
    Send(String),
    /// The peer answered with a status other than 202.
    #[error("invalid response status: {0}")]
    Status(StatusCode),
    /// The mirror client could not be built.
    #[error("mirror client build failed: {0}")]
    Client(String),
}

// ============================================================================
// SECTION: Mirror Client
// ============================================================================

/// Client delivering mirror updates to peer brokers.
#[derive(Debug, Clone)]
pub struct MirrorClient {
    /// Outbound HTTP client with a bounded timeout.
    http: reqwest::Client,
    /// Attempts before giving up.
    max_retries: u32,
    /// First backoff delay.
    base_delay: Duration,
    /// Backoff ceiling.
    max_delay: Duration,
}

impl MirrorClient {
    /// Builds a mirror client with the standard retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Client`] when the HTTP client cannot be built.
    pub fn new() -> Result<Self, MirrorError> {
        Self::with_policy(MAX_RETRIES, BASE_DELAY, MAX_DELAY)
    }

    /// Builds a mirror client with an explicit retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Client`] when the HTTP client cannot be built.
    pub fn with_policy(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, MirrorError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| MirrorError::Client(err.to_string()))?;
        Ok(Self {
            http,
            max_retries,
            base_delay,
            max_delay,
        })
    }

    /// Dispatches a mirror update to the peer pipe URI.
    ///
    /// Fire-and-forget: the update runs on a detached task and failures never
    /// reach the triggering request.
    pub fn update_other(&self, token: String, uri: String, data: Value) {
        let body = json!({"other": {"data": data}});
        let client = self.clone();
        tokio::spawn(async move {
            for attempt in 0..client.max_retries {
                match client.send(&token, &uri, &body).await {
                    Ok(()) => return,
                    Err(err) => {
                        let delay = backoff_delay(client.base_delay, client.max_delay, attempt);
                        info!(%uri, attempt, "retrying in {delay:?} due to error: {err}");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            warn!(%uri, retries = client.max_retries, "failed to send update, giving up");
        });
    }

    /// Performs one PATCH attempt against the peer.
    async fn send(&self, token: &str, uri: &str, body: &Value) -> Result<(), MirrorError> {
        let response = self
            .http
            .patch(uri)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|err| MirrorError::Send(err.to_string()))?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(MirrorError::Status(response.status()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Exponential backoff capped at the ceiling: `min(base * 2^attempt, max)`.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    let delay = base.saturating_mul(factor);
    if delay > max { max } else { delay }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
