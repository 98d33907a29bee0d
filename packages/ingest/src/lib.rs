#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Scrapes public event listings and submits them to the events ingest
//! API.
//!
//! The [`Orchestrator`] runs one source at a time through
//! fetch → normalize → submit → record. Sources come from a
//! [`SourceRegistry`] when one is configured and usable, otherwise from a
//! directory of TOML definitions.

pub mod client;
pub mod tracking;

use std::{path::PathBuf, sync::Arc};

use event_scrape_event_models::EventInput;
use event_scrape_scraper::{ScrapeError, crawl::Crawler, json_ld};
use event_scrape_source::{
    ConfigError, NormalizeError, SourceRegistry, load_source_configs, normalize_raw,
    normalize_structured, registered_configs,
};
use event_scrape_source_models::{SourceConfig, Tier, ValidationErrors};
use tokio_util::sync::CancellationToken;

pub use client::{IngestClient, SubmitError, submit_batch_dry_run};
pub use tracking::{NullRunTracker, RunCounts, RunId, RunStart, RunTracker, TrackingError};

/// Default directory of source definitions.
pub const DEFAULT_SOURCES_DIR: &str = "configs/sources";

/// Per-run options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeOptions {
    /// Normalize and count, but do not contact the ingest API.
    pub dry_run: bool,
    /// Only the first `limit` scraped records are normalized. `Some(0)`
    /// means no limit.
    pub limit: Option<usize>,
}

/// Why a source run failed.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] ScrapeError),

    #[error("submit failed: {0}")]
    Submit(#[from] SubmitError),
}

/// Errors that prevent a run from starting.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no source named '{name}'")]
    SourceNotFound { name: String },

    #[error("source '{name}' is disabled")]
    SourceDisabled { name: String },

    /// An ad-hoc URL that cannot be scraped.
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: ValidationErrors,
    },
}

/// Outcome of one source run.
///
/// A run that failed carries its error and zero submitted and created
/// counts. Records dropped during normalization show up only as the gap
/// between `events_found` and `events_submitted`.
#[derive(Debug)]
pub struct ScrapeResult {
    pub source_name: String,
    pub source_url: String,
    pub tier: Tier,
    pub dry_run: bool,
    /// Records the scraper returned.
    pub events_found: usize,
    /// Records that normalized and were submitted.
    pub events_submitted: usize,
    pub events_created: u64,
    pub events_duplicate: u64,
    pub events_failed: u64,
    pub batch_id: Option<String>,
    pub error: Option<RunError>,
}

impl ScrapeResult {
    fn new(source: &SourceConfig, dry_run: bool) -> Self {
        Self {
            source_name: source.name.clone(),
            source_url: source.url.clone(),
            tier: source.tier,
            dry_run,
            events_found: 0,
            events_submitted: 0,
            events_created: 0,
            events_duplicate: 0,
            events_failed: 0,
            batch_id: None,
            error: None,
        }
    }

    fn failed(mut self, error: RunError) -> Self {
        self.events_submitted = 0;
        self.events_created = 0;
        self.events_duplicate = 0;
        self.events_failed = 0;
        self.batch_id = None;
        self.error = Some(error);
        self
    }

    /// Returns `true` if the run completed without error.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns `true` if the ingest API rejected the run with HTTP 429.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(
            self.error,
            Some(RunError::Submit(SubmitError::RateLimited { .. }))
        )
    }

    /// Counts reported to the run tracker.
    #[must_use]
    pub const fn counts(&self) -> RunCounts {
        RunCounts {
            events_found: self.events_found,
            events_submitted: self.events_submitted,
            events_created: self.events_created,
            events_duplicate: self.events_duplicate,
            events_failed: self.events_failed,
        }
    }
}

/// Drives scrape runs for configured or ad-hoc sources.
pub struct Orchestrator {
    client: IngestClient,
    sources_dir: PathBuf,
    registry: Option<Arc<dyn SourceRegistry>>,
    tracker: Arc<dyn RunTracker>,
    crawler: Crawler,
}

impl Orchestrator {
    /// Creates an orchestrator that reads definitions from `sources_dir`
    /// and tracks nothing.
    #[must_use]
    pub fn new(client: IngestClient, sources_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            sources_dir: sources_dir.into(),
            registry: None,
            tracker: Arc::new(NullRunTracker),
            crawler: Crawler::default(),
        }
    }

    /// Consults `registry` before the sources directory.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn SourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<dyn RunTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Replaces the Tier 1 crawler (politeness delay, page timeout).
    #[must_use]
    pub fn with_crawler(mut self, crawler: Crawler) -> Self {
        self.crawler = crawler;
        self
    }

    /// Loads every configured source, disabled ones included.
    ///
    /// The registry wins when it is configured and yields at least one
    /// usable source. Otherwise the sources directory is read.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the sources directory cannot be loaded.
    pub async fn load_sources(&self) -> Result<Vec<SourceConfig>, ConfigError> {
        if let Some(registry) = &self.registry {
            match registered_configs(registry.as_ref()).await {
                Ok(sources) if !sources.is_empty() => {
                    log::debug!("Using {} source(s) from the registry", sources.len());
                    return Ok(sources);
                }
                Ok(_) => log::info!("Registry has no usable sources; using sources directory"),
                Err(e) => log::warn!("{e}; using sources directory"),
            }
        }

        load_source_configs(&self.sources_dir)
    }

    /// Scrapes an arbitrary URL as a Tier 0 source named after its host.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidUrl`] if `url` is not an absolute
    /// http(s) URL. Failures during the run are reported in the result.
    pub async fn scrape_url(
        &self,
        url: &str,
        options: &ScrapeOptions,
        cancel: &CancellationToken,
    ) -> Result<ScrapeResult, OrchestratorError> {
        let source = SourceConfig::ad_hoc(url).map_err(|source| OrchestratorError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        Ok(self.run_source(&source, options, cancel).await)
    }

    /// Scrapes the configured source called `name` (case-insensitive).
    ///
    /// # Errors
    ///
    /// * [`OrchestratorError::Config`] if sources cannot be loaded
    /// * [`OrchestratorError::SourceNotFound`] if no source has that name
    /// * [`OrchestratorError::SourceDisabled`] if the source is disabled
    pub async fn scrape_source(
        &self,
        name: &str,
        options: &ScrapeOptions,
        cancel: &CancellationToken,
    ) -> Result<ScrapeResult, OrchestratorError> {
        let sources = self.load_sources().await?;

        let source = sources
            .iter()
            .find(|s| s.name.to_lowercase() == name.to_lowercase())
            .ok_or_else(|| OrchestratorError::SourceNotFound {
                name: name.to_string(),
            })?;

        if !source.enabled {
            return Err(OrchestratorError::SourceDisabled {
                name: source.name.clone(),
            });
        }

        Ok(self.run_source(source, options, cancel).await)
    }

    /// Scrapes every enabled source in order.
    ///
    /// A failing source is logged and reported in its result; the remaining
    /// sources still run. Cancellation stops before the next source.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] if sources cannot be loaded.
    pub async fn scrape_all(
        &self,
        options: &ScrapeOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapeResult>, OrchestratorError> {
        let sources = self.load_sources().await?;
        let mut results = Vec::with_capacity(sources.len());

        for (i, source) in sources.iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("Cancelled; {} source(s) not run", sources.len() - i);
                break;
            }
            if !source.enabled {
                log::debug!("[{}] disabled, skipping", source.name);
                continue;
            }

            let result = self.run_source(source, options, cancel).await;
            if let Some(e) = &result.error {
                log::error!("[{}] {e}", source.name);
            }
            results.push(result);
        }

        Ok(results)
    }

    /// Runs one source through fetch → normalize → submit → record.
    ///
    /// Never fails; errors are attached to the result.
    pub async fn run_source(
        &self,
        source: &SourceConfig,
        options: &ScrapeOptions,
        cancel: &CancellationToken,
    ) -> ScrapeResult {
        log::info!("[{}] scraping {} (tier {})", source.name, source.url, source.tier);

        let run_id = self.start_run(source, options).await;
        let mut result = ScrapeResult::new(source, options.dry_run);

        let events = match self.fetch_and_normalize(source, options, &mut result, cancel).await {
            Ok(events) => events,
            Err(e) => return self.finish(run_id, result.failed(e.into())).await,
        };

        result.events_submitted = events.len();

        let submitted = if options.dry_run {
            Ok(submit_batch_dry_run(&events))
        } else {
            self.client.submit_batch(&events).await
        };

        match submitted {
            Ok(ingest) => {
                result.events_created = ingest.events_created;
                result.events_duplicate = ingest.events_duplicate;
                result.events_failed = ingest.events_failed;
                result.batch_id = Some(ingest.batch_id).filter(|id| !id.is_empty());

                if let Some(errors) = &ingest.errors {
                    for entry in errors {
                        log::debug!(
                            "[{}] record {} rejected: {}",
                            source.name,
                            entry.index,
                            entry.message
                        );
                    }
                }
            }
            Err(e) => return self.finish(run_id, result.failed(e.into())).await,
        }

        log::info!(
            "[{}] found {}, submitted {}, created {}, duplicate {}, failed {}",
            source.name,
            result.events_found,
            result.events_submitted,
            result.events_created,
            result.events_duplicate,
            result.events_failed
        );

        self.finish(run_id, result).await
    }

    async fn fetch_and_normalize(
        &self,
        source: &SourceConfig,
        options: &ScrapeOptions,
        result: &mut ScrapeResult,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventInput>, ScrapeError> {
        let label = source.name.as_str();

        let events = match source.tier {
            Tier::Structured => {
                let nodes = json_ld::fetch_and_extract(&source.url, cancel).await?;
                result.events_found = nodes.len();
                normalize_all(label, &nodes, options.limit, |node| {
                    normalize_structured(node, source)
                })
            }
            Tier::Selectors => {
                let raw = self.crawler.crawl(source, cancel).await?;
                result.events_found = raw.len();
                normalize_all(label, &raw, options.limit, |item| normalize_raw(item, source))
            }
        };

        Ok(events)
    }

    async fn start_run(&self, source: &SourceConfig, options: &ScrapeOptions) -> Option<RunId> {
        let start = RunStart {
            source_name: source.name.clone(),
            source_url: source.url.clone(),
            tier: source.tier,
            dry_run: options.dry_run,
            started_at: chrono::Utc::now(),
        };

        match self.tracker.run_started(&start).await {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("[{}] {e}", source.name);
                None
            }
        }
    }

    async fn finish(&self, run_id: Option<RunId>, result: ScrapeResult) -> ScrapeResult {
        let Some(id) = run_id else {
            return result;
        };

        let recorded = match &result.error {
            Some(e) => self.tracker.run_failed(&id, &e.to_string()).await,
            None => self.tracker.run_completed(&id, &result.counts()).await,
        };
        if let Err(e) = recorded {
            log::warn!("[{}] {e}", result.source_name);
        }

        result
    }
}

/// Normalizes up to `limit` records, skipping the ones that fail. A limit
/// of zero is no limit.
fn normalize_all<T>(
    label: &str,
    records: &[T],
    limit: Option<usize>,
    normalize: impl Fn(&T) -> Result<EventInput, NormalizeError>,
) -> Vec<EventInput> {
    let take = limit
        .filter(|&limit| limit > 0)
        .map_or(records.len(), |limit| limit.min(records.len()));
    let mut events = Vec::with_capacity(take);
    let mut skipped = 0_usize;

    for (i, record) in records[..take].iter().enumerate() {
        match normalize(record) {
            Ok(event) => events.push(event),
            Err(e) => {
                skipped += 1;
                log::debug!("[{label}] skipping record {i}: {e}");
            }
        }
    }

    if skipped > 0 {
        log::warn!("[{label}] skipped {skipped} record(s) that failed to normalize");
    }

    events
}
