//! Tier 0: schema.org events from embedded JSON-LD.
//!
//! Publishers embed linked data in several shapes. [`extract_events`]
//! walks all of them:
//!
//! * a top-level array of nodes,
//! * an object with an `@graph` array,
//! * an `ItemList` whose `itemListElement[].item` holds the nodes,
//! * a bare `Event` or `EventSeries` node.
//!
//! Anything else yields nothing. Malformed blocks are skipped, never fatal.

use scraper::Html;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    PAGE_TIMEOUT, ROBOTS_TIMEOUT, ScrapeError, build_client, fetch_text, parse_http_url,
    parse_selector, robots,
};

const VOCABULARY_PREFIXES: [&str; 3] = ["https://schema.org/", "http://schema.org/", "schema:"];

const EVENT_TYPES: [&str; 2] = ["Event", "EventSeries"];

/// Fetches `url` and returns every event node embedded in it.
///
/// `robots.txt` is consulted first. A policy that cannot be fetched is
/// logged and treated as permissive; an explicit disallow is an error.
/// Cancellation at any point returns whatever was gathered (usually
/// nothing) without an error.
///
/// # Errors
///
/// * [`ScrapeError::InvalidUrl`] if `url` is not an absolute http(s) URL
/// * [`ScrapeError::Disallowed`] if `robots.txt` forbids the page
/// * [`ScrapeError::Status`] for any non-success response
/// * [`ScrapeError::Http`] if the request or body read fails
pub async fn fetch_and_extract(
    url: &str,
    cancel: &CancellationToken,
) -> Result<Vec<Value>, ScrapeError> {
    if cancel.is_cancelled() {
        return Ok(Vec::new());
    }

    let page = parse_http_url(url)?;

    let robots_client = build_client(ROBOTS_TIMEOUT)?;
    let allowed = tokio::select! {
        () = cancel.cancelled() => return Ok(Vec::new()),
        result = robots::is_allowed(&robots_client, &page) => result,
    };
    match allowed {
        Ok(true) => {}
        Ok(false) => {
            return Err(ScrapeError::Disallowed {
                url: page.to_string(),
            });
        }
        Err(e) => log::warn!("[json-ld] {e}; proceeding without a crawl policy"),
    }

    let client = build_client(PAGE_TIMEOUT)?;
    let body = tokio::select! {
        () = cancel.cancelled() => return Ok(Vec::new()),
        body = fetch_text(&client, &page) => body?,
    };

    let events = extract_from_html(&body);
    log::debug!("[json-ld] {} event node(s) found at {page}", events.len());
    Ok(events)
}

/// Extracts event nodes from every `<script type="application/ld+json">`
/// block in `html`, in document order.
#[must_use]
pub fn extract_from_html(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let scripts = parse_selector("script[type]").unwrap_or_else(|_| unreachable!());

    let mut events = Vec::new();

    for script in document.select(&scripts) {
        let is_ld = script.value().attr("type").is_some_and(|t| {
            t.trim()
                .to_ascii_lowercase()
                .starts_with("application/ld+json")
        });
        if !is_ld {
            continue;
        }

        let text: String = script.text().collect();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(text) {
            Ok(node) => events.extend(extract_events(&node)),
            Err(e) => log::debug!("[json-ld] skipping malformed block: {e}"),
        }
    }

    events
}

/// Collects every event node reachable from `node`.
///
/// Returned nodes are independent copies of the matched objects.
#[must_use]
pub fn extract_events(node: &Value) -> Vec<Value> {
    let mut events = Vec::new();
    collect_events(node, &mut events);
    events
}

fn collect_events(node: &Value, events: &mut Vec<Value>) {
    match node {
        Value::Array(nodes) => {
            for node in nodes {
                collect_events(node, events);
            }
        }
        Value::Object(object) => {
            if let Some(Value::Array(graph)) = object.get("@graph") {
                for node in graph {
                    collect_events(node, events);
                }
            } else if has_type(node, &["ItemList"])
                && let Some(elements) = object.get("itemListElement")
            {
                let elements = match elements {
                    Value::Array(elements) => elements.as_slice(),
                    single => std::slice::from_ref(single),
                };
                for item in elements.iter().filter_map(|e| e.get("item")) {
                    collect_events(item, events);
                }
            } else if has_type(node, &EVENT_TYPES) {
                events.push(node.clone());
            }
        }
        _ => {}
    }
}

/// The node's `@type` with any vocabulary prefix stripped.
///
/// `@type` may be a string or an array of strings; for an array the first
/// string is used.
#[must_use]
pub fn node_type(node: &Value) -> Option<&str> {
    let raw = match node.get("@type")? {
        Value::String(s) => s.as_str(),
        Value::Array(types) => types.iter().find_map(Value::as_str)?,
        _ => return None,
    };
    Some(strip_vocabulary(raw))
}

fn has_type(node: &Value, wanted: &[&str]) -> bool {
    match node.get("@type") {
        Some(Value::String(s)) => wanted.contains(&strip_vocabulary(s)),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| wanted.contains(&strip_vocabulary(t))),
        _ => false,
    }
}

/// Strips a schema.org vocabulary prefix from a type name.
#[must_use]
pub fn strip_vocabulary(type_name: &str) -> &str {
    let type_name = type_name.trim();
    VOCABULARY_PREFIXES
        .iter()
        .find_map(|prefix| type_name.strip_prefix(prefix))
        .unwrap_or(type_name)
}
