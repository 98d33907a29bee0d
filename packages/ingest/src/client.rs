//! Client for the events ingest API.
//!
//! Events are submitted in chunks of at most [`CHUNK_SIZE`]; the per-chunk
//! results are summed into one [`IngestResult`].

use std::time::Duration;

use event_scrape_event_models::EventInput;
use event_scrape_ingest_models::IngestResult;
use event_scrape_scraper::USER_AGENT;
use reqwest::StatusCode;
use serde::Serialize;

/// Most events sent in a single request.
pub const CHUNK_SIZE: usize = 100;

/// Request timeout for batch submissions.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How much of an error response body is kept for diagnostics.
pub const SNIPPET_CHARS: usize = 200;

const BATCH_PATH: &str = "/api/v1/events:batch";

/// Errors that can occur while submitting events.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The API answered 429 Too Many Requests.
    #[error("rate limited by ingest API (HTTP 429): {snippet}")]
    RateLimited { snippet: String },

    /// The API answered with any other non-success status.
    #[error("ingest API returned HTTP {status}: {snippet}")]
    Status { status: u16, snippet: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A success response whose body is not an [`IngestResult`].
    #[error("invalid ingest API response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    events: &'a [EventInput],
}

/// Submits normalized events to `{base}/api/v1/events:batch`.
#[derive(Debug, Clone)]
pub struct IngestClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl IngestClient {
    /// Creates a client for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(SUBMIT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}{BATCH_PATH}", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// The full batch endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Submits `events` in chunks of [`CHUNK_SIZE`] and sums the results.
    ///
    /// An empty slice makes no request and returns a zeroed result.
    ///
    /// # Errors
    ///
    /// Stops at the first chunk that fails. Chunks already accepted by the
    /// API stay accepted.
    pub async fn submit_batch(&self, events: &[EventInput]) -> Result<IngestResult, SubmitError> {
        let mut total = IngestResult::default();

        for (i, chunk) in events.chunks(CHUNK_SIZE).enumerate() {
            log::debug!(
                "Submitting chunk {} ({} event(s)) to {}",
                i + 1,
                chunk.len(),
                self.endpoint
            );
            total.absorb(self.submit_chunk(chunk).await?);
        }

        Ok(total)
    }

    async fn submit_chunk(&self, events: &[EventInput]) -> Result<IngestResult, SubmitError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&BatchRequest { events })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SubmitError::RateLimited {
                snippet: snippet(&body),
            });
        }
        if !status.is_success() {
            return Err(SubmitError::Status {
                status: status.as_u16(),
                snippet: snippet(&body),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Reports every event as created without contacting the API.
#[must_use]
pub fn submit_batch_dry_run(events: &[EventInput]) -> IngestResult {
    if events.is_empty() {
        return IngestResult::default();
    }
    IngestResult::dry_run(u64::try_from(events.len()).unwrap_or(u64::MAX))
}

fn snippet(body: &str) -> String {
    body.trim().chars().take(SNIPPET_CHARS).collect()
}
