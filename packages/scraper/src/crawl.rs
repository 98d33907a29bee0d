//! Tier 1: CSS-selector crawling of event listing pages.
//!
//! A crawl starts at the source URL, extracts one [`RawEvent`] per element
//! matching the `event_list` selector, and follows the `pagination` link
//! until the page cap is reached. Page fetches run as tasks on a
//! [`JoinSet`]; each finished page may queue its successor, so the crawl
//! ends when no task is left.
//!
//! The crawl never leaves the seed's host, waits [`DEFAULT_DELAY`] between
//! requests to that host, and checks every page against `robots.txt`. A
//! policy that cannot be fetched aborts the crawl.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use event_scrape_source_models::{DEFAULT_MAX_PAGES, SelectorConfig, SourceConfig};
use scraper::{ElementRef, Html, Selector};
use tokio::{task::JoinSet, time::Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    PAGE_TIMEOUT, ROBOTS_TIMEOUT, RawEvent, ScrapeError, USER_AGENT, build_client,
    collapse_whitespace, fetch_text, parse_http_url, parse_selector,
    robots::{self, RobotsPolicy},
};

/// Minimum spacing between two requests to the crawled host.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

type PageTask = Result<Vec<Url>, ScrapeError>;

/// Crawls a selector-configured source.
#[derive(Debug, Clone)]
pub struct Crawler {
    delay: Duration,
    page_timeout: Duration,
}

impl Default for Crawler {
    fn default() -> Self {
        Self::new()
    }
}

impl Crawler {
    /// Creates a crawler with the default politeness delay and page timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            page_timeout: PAGE_TIMEOUT,
        }
    }

    /// Overrides the delay between requests to the crawled host.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Overrides the per-page fetch timeout.
    #[must_use]
    pub const fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Crawls `source` and returns the events found, seed page first.
    ///
    /// Failures on pages after the seed are logged and skipped. If `cancel`
    /// fires, the crawl stops queuing pages and returns what it has
    /// gathered so far without an error.
    ///
    /// # Errors
    ///
    /// * [`ScrapeError::InvalidUrl`] if the source URL is unusable
    /// * [`ScrapeError::Selector`] if a configured selector does not parse
    ///   or `event_list` is missing
    /// * [`ScrapeError::Robots`] if the crawl policy cannot be fetched
    /// * [`ScrapeError::Disallowed`] if the seed page is disallowed
    /// * [`ScrapeError::Status`] / [`ScrapeError::Http`] if the seed page
    ///   cannot be fetched
    pub async fn crawl(
        &self,
        source: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawEvent>, ScrapeError> {
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let seed = parse_http_url(&source.url)?;
        let selectors = CompiledSelectors::compile(&source.selectors)?;

        let robots_client = build_client(ROBOTS_TIMEOUT)?;
        let policy = tokio::select! {
            () = cancel.cancelled() => return Ok(Vec::new()),
            policy = robots::fetch_policy(&robots_client, &seed) => policy?,
        };

        let max_pages = if source.max_pages == 0 {
            DEFAULT_MAX_PAGES
        } else {
            source.max_pages
        };

        let ctx = Arc::new(CrawlContext {
            client: build_client(self.page_timeout)?,
            selectors,
            host: seed.host_str().unwrap_or_default().to_owned(),
            policy,
            limiter: HostLimiter::new(self.delay),
            max_pages,
            cancel: cancel.clone(),
            state: Mutex::new(CrawlState::default()),
        });

        log::info!(
            "[crawl] {}: starting at {seed} (up to {max_pages} pages)",
            source.name
        );

        if !ctx.claim(&seed) {
            return Ok(Vec::new());
        }

        let next = match visit(Arc::clone(&ctx), seed).await {
            Ok(next) => next,
            Err(_) if cancel.is_cancelled() => return Ok(ctx.take_events()),
            Err(e) => return Err(e),
        };

        let mut tasks = JoinSet::new();
        ctx.enqueue(next, &mut tasks);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(next)) => ctx.enqueue(next, &mut tasks),
                Ok(Err(e)) => {
                    if !cancel.is_cancelled() {
                        log::warn!("[crawl] {}: {e}", source.name);
                    }
                }
                Err(e) => log::error!("[crawl] {}: page task failed: {e}", source.name),
            }
        }

        let (events, pages) = {
            let state = ctx.state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.events.len(), state.pages_visited)
        };
        log::info!(
            "[crawl] {}: {events} event(s) from {pages} page(s)",
            source.name
        );

        Ok(ctx.take_events())
    }
}

/// Crawls `source` with a default [`Crawler`].
///
/// # Errors
///
/// See [`Crawler::crawl`].
pub async fn crawl(
    source: &SourceConfig,
    cancel: &CancellationToken,
) -> Result<Vec<RawEvent>, ScrapeError> {
    Crawler::new().crawl(source, cancel).await
}

#[derive(Debug)]
struct CompiledSelectors {
    event_list: Selector,
    name: Option<Selector>,
    start_date: Option<Selector>,
    end_date: Option<Selector>,
    location: Option<Selector>,
    description: Option<Selector>,
    url: Option<Selector>,
    image: Option<Selector>,
    pagination: Option<Selector>,
}

impl CompiledSelectors {
    fn compile(config: &SelectorConfig) -> Result<Self, ScrapeError> {
        fn optional(selector: Option<&String>) -> Result<Option<Selector>, ScrapeError> {
            selector
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(parse_selector)
                .transpose()
        }

        let event_list = config.event_list().ok_or_else(|| ScrapeError::Selector {
            selector: String::new(),
            message: "an event_list selector is required".to_owned(),
        })?;

        Ok(Self {
            event_list: parse_selector(event_list)?,
            name: optional(config.name.as_ref())?,
            start_date: optional(config.start_date.as_ref())?,
            end_date: optional(config.end_date.as_ref())?,
            location: optional(config.location.as_ref())?,
            description: optional(config.description.as_ref())?,
            url: optional(config.url.as_ref())?,
            image: optional(config.image.as_ref())?,
            pagination: optional(config.pagination.as_ref())?,
        })
    }
}

#[derive(Debug, Default)]
struct CrawlState {
    events: Vec<RawEvent>,
    pages_visited: u32,
    seen: BTreeSet<String>,
}

/// Serializes request start times for one host.
#[derive(Debug)]
struct HostLimiter {
    delay: Duration,
    next_slot: tokio::sync::Mutex<Option<Instant>>,
}

impl HostLimiter {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: tokio::sync::Mutex::new(None),
        }
    }

    async fn wait(&self) {
        let mut next_slot = self.next_slot.lock().await;
        if let Some(at) = *next_slot {
            tokio::time::sleep_until(at).await;
        }
        *next_slot = Some(Instant::now() + self.delay);
    }
}

/// State shared by every page task of one crawl.
#[derive(Debug)]
struct CrawlContext {
    client: reqwest::Client,
    selectors: CompiledSelectors,
    host: String,
    policy: RobotsPolicy,
    limiter: HostLimiter,
    max_pages: u32,
    cancel: CancellationToken,
    state: Mutex<CrawlState>,
}

impl CrawlContext {
    /// Admits `url` into the crawl. Off-host, repeated, and over-cap URLs
    /// are refused.
    fn claim(&self, url: &Url) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if url.host_str() != Some(self.host.as_str()) {
            log::debug!("[crawl] not following off-host link {url}");
            return false;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.seen.contains(url.as_str()) {
            return false;
        }
        if state.pages_visited >= self.max_pages {
            log::info!(
                "[crawl] page cap of {} reached, not following {url}",
                self.max_pages
            );
            return false;
        }
        state.seen.insert(url.as_str().to_owned());
        state.pages_visited += 1;
        true
    }

    fn enqueue(self: &Arc<Self>, urls: Vec<Url>, tasks: &mut JoinSet<PageTask>) {
        for url in urls {
            if self.claim(&url) {
                tasks.spawn(visit(Arc::clone(self), url));
            }
        }
    }

    fn record(&self, events: Vec<RawEvent>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .extend(events);
    }

    fn take_events(&self) -> Vec<RawEvent> {
        std::mem::take(
            &mut self
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .events,
        )
    }
}

/// Fetches one page, records its events, and returns the links to follow.
async fn visit(ctx: Arc<CrawlContext>, url: Url) -> PageTask {
    if !ctx.policy.is_allowed(USER_AGENT, &url) {
        return Err(ScrapeError::Disallowed {
            url: url.to_string(),
        });
    }

    tokio::select! {
        () = ctx.cancel.cancelled() => return Ok(Vec::new()),
        () = ctx.limiter.wait() => {}
    }

    log::debug!("[crawl] visiting {url}");
    let body = tokio::select! {
        () = ctx.cancel.cancelled() => return Ok(Vec::new()),
        body = fetch_text(&ctx.client, &url) => body?,
    };

    let page = extract_page(&body, &url, &ctx.selectors);

    if ctx.cancel.is_cancelled() {
        return Ok(Vec::new());
    }

    log::debug!("[crawl] {} event(s) on {url}", page.events.len());
    ctx.record(page.events);

    Ok(page.next.into_iter().collect())
}

#[derive(Debug, Default)]
struct ExtractedPage {
    events: Vec<RawEvent>,
    next: Option<Url>,
}

fn extract_page(html: &str, page_url: &Url, selectors: &CompiledSelectors) -> ExtractedPage {
    let document = Html::parse_document(html);

    let events = document
        .select(&selectors.event_list)
        .map(|item| extract_item(item, page_url, selectors))
        .filter(|event| !event.name.is_empty())
        .collect();

    let next = selectors
        .pagination
        .as_ref()
        .and_then(|selector| document.select(selector).next())
        .and_then(|link| {
            link.value().attr("href").map(str::to_owned).or_else(|| {
                let anchor = Selector::parse("a[href]").unwrap_or_else(|_| unreachable!());
                link.select(&anchor)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .map(str::to_owned)
            })
        })
        .and_then(|href| resolve(page_url, &href));

    ExtractedPage { events, next }
}

fn extract_item(item: ElementRef<'_>, page_url: &Url, selectors: &CompiledSelectors) -> RawEvent {
    let text = |selector: &Option<Selector>| {
        selector
            .as_ref()
            .map(|s| collapse_whitespace(item.select(s).flat_map(|el| el.text())))
            .unwrap_or_default()
    };

    // Machine-readable datetime attributes beat display text.
    let date = |selector: &Option<Selector>| {
        selector
            .as_ref()
            .and_then(|s| {
                item.select(s)
                    .find_map(|el| el.value().attr("datetime"))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| text(selector))
    };

    let link = |selector: &Option<Selector>, attr: &str| {
        selector
            .as_ref()
            .and_then(|s| {
                item.select(s)
                    .find_map(|el| el.value().attr(attr))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            })
            .and_then(|href| resolve(page_url, href))
            .map(String::from)
            .unwrap_or_default()
    };

    RawEvent {
        name: text(&selectors.name),
        start_date: date(&selectors.start_date),
        end_date: date(&selectors.end_date),
        location: text(&selectors.location),
        description: text(&selectors.description),
        url: link(&selectors.url, "href"),
        image: link(&selectors.image, "src"),
    }
}

/// Resolves `href` against `base`, keeping only http(s) results.
fn resolve(base: &Url, href: &str) -> Option<Url> {
    let mut url = base.join(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
