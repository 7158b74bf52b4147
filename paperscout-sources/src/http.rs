//! Shared HTTP plumbing: client construction, request spacing and retries.

use paperscout_core::{SourceError, SourceKind};
use serde::de::DeserializeOwned;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const USER_AGENT: &str = concat!("paperscout/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// The client every adapter uses.
pub fn build_client(kind: SourceKind) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SourceError::Request {
            source_name: kind.to_string(),
            message: format!("Failed to create HTTP client: {e}"),
        })
}

/// Enforces a minimum spacing between requests to one service.
///
/// Each caller reserves the next free slot under the lock and sleeps only
/// after releasing it, so concurrent callers queue up in order.
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub async fn wait(&self) {
        let slot = {
            let mut next = self
                .next_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        }; // MutexGuard is dropped here before any .await

        tokio::time::sleep_until(slot).await;
    }
}

fn map_send_error(kind: SourceKind, e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout {
            source_name: kind.to_string(),
            timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    } else {
        SourceError::Request {
            source_name: kind.to_string(),
            message: e.to_string(),
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Send `request`, retrying on 429 and 503 once per entry in `backoff`.
///
/// `limiter` is awaited before every attempt. Any other non-success status
/// fails immediately.
pub async fn send_with_retry(
    kind: SourceKind,
    request: reqwest::RequestBuilder,
    limiter: Option<&RateLimiter>,
    backoff: &[Duration],
) -> Result<reqwest::Response, SourceError> {
    let mut attempt = 0;
    loop {
        if let Some(limiter) = limiter {
            limiter.wait().await;
        }
        let builder = request.try_clone().ok_or_else(|| SourceError::Request {
            source_name: kind.to_string(),
            message: "request body cannot be retried".to_string(),
        })?;
        let response = builder.send().await.map_err(|e| map_send_error(kind, e))?;
        let status = response.status().as_u16();
        if response.status().is_success() {
            debug!(source = %kind, status, attempt, "Source request succeeded");
            return Ok(response);
        }

        if matches!(status, 429 | 503) {
            if let Some(wait) = backoff.get(attempt) {
                attempt += 1;
                warn!(
                    source = %kind,
                    status,
                    wait_secs = wait.as_secs(),
                    attempt,
                    max_attempts = backoff.len(),
                    "Source rate limited, backing off before retry"
                );
                tokio::time::sleep(*wait).await;
                continue;
            }
            if status == 429 {
                return Err(SourceError::RateLimited {
                    source_name: kind.to_string(),
                    retry_after_secs: retry_after(&response).unwrap_or(60),
                });
            }
        }

        return Err(SourceError::Status {
            source_name: kind.to_string(),
            status,
        });
    }
}

/// Decode a JSON body.
pub async fn read_json<T: DeserializeOwned>(
    kind: SourceKind,
    response: reqwest::Response,
) -> Result<T, SourceError> {
    response.json().await.map_err(|e| SourceError::Parse {
        source_name: kind.to_string(),
        message: format!("invalid JSON response: {e}"),
    })
}

/// Read a text body.
pub async fn read_text(kind: SourceKind, response: reqwest::Response) -> Result<String, SourceError> {
    response.text().await.map_err(|e| SourceError::Request {
        source_name: kind.to_string(),
        message: format!("failed to read response body: {e}"),
    })
}
