#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Event scraping for public event listing pages.
//!
//! Two extraction tiers are provided:
//!
//! * [`json_ld`] (tier 0) fetches a single page and pulls every schema.org
//!   `Event` out of its embedded JSON-LD blocks.
//! * [`crawl`] (tier 1) crawls a listing page with per-source CSS selectors,
//!   following pagination links up to a page cap.
//!
//! Both tiers honor `robots.txt` via [`robots`] and identify themselves
//! with [`USER_AGENT`]. [`inspect`] is a diagnostic helper for authoring
//! selector configurations.
//!
//! This crate knows nothing about the ingest API. Tier 0 emits untyped
//! [`serde_json::Value`] nodes and tier 1 emits [`RawEvent`]s; callers
//! normalize them however they like.

pub mod crawl;
pub mod inspect;
pub mod json_ld;
pub mod robots;

use std::time::Duration;

use serde::Serialize;

/// User agent sent with every outbound request, including `robots.txt`.
pub const USER_AGENT: &str =
    "EventScrape/0.1 (+https://github.com/event-scrape/event-scrape; events@event-scrape.org)";

/// Timeout for fetching `robots.txt`.
pub const ROBOTS_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single page fetch.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on how much of a response body is read.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Errors that can occur during scraping operations.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// An HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The URL could not be parsed or is not an absolute http(s) URL.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The site's `robots.txt` disallows fetching the URL.
    #[error("robots.txt disallows {url}")]
    Disallowed {
        /// The disallowed URL.
        url: String,
    },

    /// The server answered with a status other than success.
    #[error("unexpected status {status} fetching {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// The URL that was fetched.
        url: String,
    },

    /// The crawl policy could not be established.
    #[error("robots.txt check failed for {url}: {reason}")]
    Robots {
        /// The `robots.txt` URL.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// A configured CSS selector does not parse.
    #[error("invalid CSS selector '{selector}': {message}")]
    Selector {
        /// The selector text.
        selector: String,
        /// Parser message.
        message: String,
    },
}

/// One event as scraped by CSS selectors, before normalization.
///
/// Every field is plain text; an empty string means the selector was not
/// configured or matched nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawEvent {
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub location: String,
    pub description: String,
    pub url: String,
    pub image: String,
}

/// Builds the HTTP client used for scraping.
///
/// Redirects are not followed so a listing cannot bounce the scraper to a
/// host the crawl policy was never checked against.
///
/// # Errors
///
/// Returns [`ScrapeError::Http`] if the TLS backend fails to initialise.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ScrapeError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(ScrapeError::Http)
}

/// Parses `raw` as an absolute http(s) URL.
///
/// # Errors
///
/// Returns [`ScrapeError::InvalidUrl`] for unparseable URLs, non-http
/// schemes, and URLs without a host.
pub fn parse_http_url(raw: &str) -> Result<url::Url, ScrapeError> {
    let invalid = |reason: String| ScrapeError::InvalidUrl {
        url: raw.to_owned(),
        reason,
    };

    let url = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_owned()));
    }

    Ok(url)
}

/// Reads at most `limit` bytes of a response body.
///
/// Anything past the limit is discarded rather than treated as an error.
///
/// # Errors
///
/// Returns [`ScrapeError::Http`] if reading the body fails mid-stream.
pub async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ScrapeError> {
    let mut body = Vec::new();

    while let Some(chunk) = response.chunk().await? {
        let remaining = limit - body.len();
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            log::debug!("Response body truncated at {limit} bytes");
            break;
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

/// Fetches `url` and returns its body as text.
///
/// Any non-success status is an error. The body is capped at
/// [`MAX_BODY_BYTES`] and decoded lossily.
pub(crate) async fn fetch_text(
    client: &reqwest::Client,
    url: &url::Url,
) -> Result<String, ScrapeError> {
    let response = client.get(url.as_str()).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ScrapeError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = read_capped(response, MAX_BODY_BYTES).await?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Parses a CSS selector string, returning a [`ScrapeError`] on failure.
pub(crate) fn parse_selector(selector: &str) -> Result<scraper::Selector, ScrapeError> {
    scraper::Selector::parse(selector).map_err(|e| ScrapeError::Selector {
        selector: selector.to_owned(),
        message: e.to_string(),
    })
}

/// Joins text fragments with runs of whitespace collapsed to one space.
pub(crate) fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for word in parts.flat_map(str::split_whitespace) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
