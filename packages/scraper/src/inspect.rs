//! DOM summary of a page, used when writing selector configurations.

use std::{collections::BTreeMap, fmt::Write as _, time::Duration};

use scraper::Html;
use serde::Serialize;

use crate::{MAX_BODY_BYTES, ScrapeError, build_client, parse_http_url, read_capped};

const INSPECT_TIMEOUT: Duration = Duration::from_secs(20);
const TOP_CLASSES: usize = 30;
const TOP_DATA_ATTRS: usize = 15;
const MAX_EVENT_LINKS: usize = 20;
const MAX_SAMPLE_CARDS: usize = 8;
const CARD_PREVIEW_CHARS: usize = 300;

const CARD_TAGS: [&str; 4] = ["article", "li", "div", "section"];
const CARD_WORDS: [&str; 8] = [
    "event",
    "film",
    "show",
    "program",
    "card",
    "item",
    "listing",
    "performance",
];

/// A name and how often it appeared on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCount {
    pub name: String,
    pub count: usize,
}

/// A likely event container and a preview of its markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleCard {
    /// Short selector such as `article.event-card`.
    pub selector: String,
    /// Outer HTML, truncated.
    pub html: String,
}

/// Structural summary of a fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectResult {
    pub url: String,
    pub status: u16,
    pub body_bytes: usize,
    /// Most frequent CSS classes, descending.
    pub top_classes: Vec<NameCount>,
    /// Most frequent `data-*` attribute names, descending.
    pub data_attrs: Vec<NameCount>,
    /// Distinct hrefs that look like event or program pages.
    pub event_links: Vec<String>,
    pub sample_cards: Vec<SampleCard>,
}

/// Fetches `url` and summarizes its DOM.
///
/// The page is summarized whatever its status; the status is reported.
///
/// # Errors
///
/// Returns [`ScrapeError::InvalidUrl`] for unusable URLs and
/// [`ScrapeError::Http`] if the page cannot be fetched.
pub async fn inspect(url: &str) -> Result<InspectResult, ScrapeError> {
    let page = parse_http_url(url)?;
    let client = build_client(INSPECT_TIMEOUT)?;

    let response = client.get(page.as_str()).send().await?;
    let status = response.status().as_u16();
    let body = read_capped(response, MAX_BODY_BYTES).await?;

    Ok(summarize(url, status, &String::from_utf8_lossy(&body)))
}

/// Summarizes already-fetched markup.
#[must_use]
pub fn summarize(url: &str, status: u16, html: &str) -> InspectResult {
    let document = Html::parse_document(html);

    let mut class_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut data_counts: BTreeMap<String, usize> = BTreeMap::new();

    for node in document.tree.nodes() {
        let Some(element) = node.value().as_element() else {
            continue;
        };
        for class in element.classes() {
            *class_counts.entry(class.to_owned()).or_default() += 1;
        }
        for (name, _) in element.attrs() {
            if name.starts_with("data-") {
                *data_counts.entry(name.to_owned()).or_default() += 1;
            }
        }
    }

    let anchors = scraper::Selector::parse("a[href]").unwrap_or_else(|_| unreachable!());
    let mut event_links: Vec<String> = Vec::new();
    for href in document
        .select(&anchors)
        .filter_map(|a| a.value().attr("href"))
    {
        let lower = href.to_lowercase();
        if (lower.contains("/event") || lower.contains("/program"))
            && !event_links.iter().any(|seen| seen == href)
        {
            event_links.push(href.to_owned());
            if event_links.len() >= MAX_EVENT_LINKS {
                break;
            }
        }
    }

    InspectResult {
        url: url.to_owned(),
        status,
        body_bytes: html.len(),
        top_classes: top_n(class_counts, TOP_CLASSES),
        data_attrs: top_n(data_counts, TOP_DATA_ATTRS),
        event_links,
        sample_cards: sample_cards(&document),
    }
}

fn sample_cards(document: &Html) -> Vec<SampleCard> {
    let mut cards: Vec<SampleCard> = Vec::new();

    for tag in CARD_TAGS {
        let selector =
            scraper::Selector::parse(&format!("{tag}[class]")).unwrap_or_else(|_| unreachable!());

        for element in document.select(&selector) {
            if cards.len() >= MAX_SAMPLE_CARDS {
                return cards;
            }

            let class = element.value().attr("class").unwrap_or_default();
            let lower = class.to_lowercase();
            if !CARD_WORDS.iter().any(|word| lower.contains(word)) {
                continue;
            }
            let Some(first_class) = class.split_whitespace().next() else {
                continue;
            };

            let selector = format!("{tag}.{first_class}");
            if cards.iter().any(|card| card.selector == selector) {
                continue;
            }

            cards.push(SampleCard {
                selector,
                html: preview(&element.html()),
            });
        }
    }

    cards
}

fn preview(html: &str) -> String {
    match html.char_indices().nth(CARD_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &html[..cut]),
        None => html.to_owned(),
    }
}

/// Sorts by count descending, then by name, and keeps the first `n`.
fn top_n(counts: BTreeMap<String, usize>, n: usize) -> Vec<NameCount> {
    let mut out: Vec<NameCount> = counts
        .into_iter()
        .map(|(name, count)| NameCount { name, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    out.truncate(n);
    out
}

/// Renders an [`InspectResult`] for a terminal.
#[must_use]
pub fn format_inspect_result(result: &InspectResult) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "URL:    {}", result.url);
    let _ = writeln!(out, "Status: {}", result.status);
    let _ = writeln!(out, "Size:   {} bytes\n", result.body_bytes);

    out.push_str("── Top CSS Classes ─────────────────────────────────────\n");
    for class in result.top_classes.iter().take(20) {
        let _ = writeln!(out, "  {:<40} {}", class.name, class.count);
    }

    if !result.data_attrs.is_empty() {
        out.push_str("\n── data-* Attributes ────────────────────────────────────\n");
        for attr in &result.data_attrs {
            let _ = writeln!(out, "  {:<40} {}", attr.name, attr.count);
        }
    }

    if !result.event_links.is_empty() {
        out.push_str("\n── Event/Program hrefs (sample) ─────────────────────────\n");
        for link in &result.event_links {
            let _ = writeln!(out, "  {link}");
        }
    }

    if !result.sample_cards.is_empty() {
        out.push_str("\n── Candidate Event Containers ───────────────────────────\n");
        for card in &result.sample_cards {
            let _ = writeln!(out, "\n  selector: {}\n  html:     {}", card.selector, card.html);
        }
    }

    out
}
