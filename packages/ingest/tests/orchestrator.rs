//! End-to-end runs against a local site that serves both the event pages
//! and the ingest API.

use std::{
    net::SocketAddr,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{Json, Router, extract::State, http::StatusCode, response::Html, routing::get};
use event_scrape_ingest::{
    IngestClient, Orchestrator, OrchestratorError, RunCounts, RunId, RunStart, RunTracker,
    ScrapeOptions, TrackingError,
};
use event_scrape_ingest_models::DRY_RUN_BATCH_ID;
use event_scrape_scraper::crawl::Crawler;
use event_scrape_source::{RegisteredSource, RegistryError, SourceRegistry};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const STRUCTURED_PAGE: &str = r#"<html><head>
<script type="application/ld+json">
[
  {"@context": "https://schema.org", "@type": "MusicEvent", "name": "Harbour Jazz",
   "startDate": "2026-07-04T19:00", "url": "https://harbour.example/e/jazz",
   "location": {"@type": "Place", "name": "Concert Stage"}},
  {"@context": "https://schema.org", "@type": "Event", "name": {"@value": "Kite Day"},
   "startDate": {"@type": "Date", "@value": "2026-07-05"}},
  {"@context": "https://schema.org", "@type": "Organization", "name": "Harbourfront Centre"}
]
</script>
</head><body></body></html>"#;

const LISTING_PAGE: &str = r#"<html><body>
<div class="show"><h2>Open Mic</h2><time datetime="2026-09-01T20:00">Sep 1</time></div>
<div class="show"><h2>Poetry Slam</h2><time datetime="2026-09-02T20:00">Sep 2</time></div>
<div class="show"><h2></h2><time>never</time></div>
</body></html>"#;

#[derive(Clone, Default)]
struct Api {
    batches: Arc<Mutex<Vec<Value>>>,
    rate_limited: bool,
}

impl Api {
    fn submitted(&self) -> Vec<Value> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b["events"].as_array().cloned().unwrap_or_default())
            .collect()
    }

    fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

async fn ingest(State(api): State<Api>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let count = body["events"].as_array().map_or(0, Vec::len);
    api.batches.lock().unwrap().push(body);

    if api.rate_limited {
        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({"error": "slow down"})));
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "batch_id": "b-1",
            "events_created": count,
            "events_duplicate": 0,
            "events_failed": 0
        })),
    )
}

async fn serve(api: Api) -> SocketAddr {
    let router = Router::new()
        .route("/harbour", get(|| async { Html(STRUCTURED_PAGE) }))
        .route("/listing", get(|| async { Html(LISTING_PAGE) }))
        .route("/api/v1/events:batch", axum::routing::post(ingest))
        .with_state(api);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn write_source(dir: &Path, file: &str, content: &str) {
    std::fs::write(dir.join(file), content).unwrap();
}

/// A sources directory with a Tier 0, a Tier 1, a broken and a disabled
/// source, all pointing at `addr`.
fn sources_dir(addr: SocketAddr) -> TempDir {
    let dir = tempfile::tempdir().unwrap();

    write_source(
        dir.path(),
        "a_harbourfront.toml",
        &format!(
            r#"
name = "Harbourfront"
url = "http://{addr}/harbour"
license = "CC0-1.0"
"#
        ),
    );
    write_source(
        dir.path(),
        "b_broken.toml",
        &format!(
            r#"
name = "Broken Venue"
url = "http://{addr}/gone"
"#
        ),
    );
    write_source(
        dir.path(),
        "c_cafe.toml",
        &format!(
            r#"
name = "Corner Cafe"
url = "http://{addr}/listing"
tier = 1
license = "CC-BY-4.0"

[selectors]
event_list = ".show"
name = "h2"
start_date = "time"
"#
        ),
    );
    write_source(
        dir.path(),
        "d_closed.toml",
        &format!(
            r#"
name = "Closed Hall"
url = "http://{addr}/harbour"
enabled = false
"#
        ),
    );

    dir
}

fn orchestrator(addr: SocketAddr, dir: &Path) -> Orchestrator {
    let client = IngestClient::new(&format!("http://{addr}"), "test-key").unwrap();
    Orchestrator::new(client, dir).with_crawler(Crawler::new().with_delay(Duration::ZERO))
}

#[tokio::test]
async fn structured_source_submits_events_with_attribution() {
    let api = Api::default();
    let addr = serve(api.clone()).await;
    let dir = sources_dir(addr);

    let result = orchestrator(addr, dir.path())
        .scrape_source("HARBOURFRONT", &ScrapeOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.events_found, 2);
    assert_eq!(result.events_submitted, 2);
    assert_eq!(result.events_created, 2);
    assert_eq!(result.batch_id.as_deref(), Some("b-1"));

    let submitted = api.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0]["@type"], "MusicEvent");
    assert_eq!(submitted[1]["name"], "Kite Day");
    assert_eq!(submitted[1]["startDate"], "2026-07-05");
    for event in &submitted {
        assert_eq!(event["license"], "CC0-1.0");
        assert_eq!(event["source"]["name"], "Harbourfront");
        assert_eq!(event["source"]["license"], "CC0-1.0");
    }
}

#[tokio::test]
async fn dry_run_never_calls_the_api() {
    let api = Api::default();
    let addr = serve(api.clone()).await;
    let dir = sources_dir(addr);

    let options = ScrapeOptions {
        dry_run: true,
        limit: None,
    };
    let result = orchestrator(addr, dir.path())
        .scrape_source("Harbourfront", &options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(api.calls(), 0);
    assert!(result.dry_run);
    assert_eq!(result.events_created, 2);
    assert_eq!(result.batch_id.as_deref(), Some(DRY_RUN_BATCH_ID));
}

#[tokio::test]
async fn ad_hoc_url_is_named_after_its_host() {
    let api = Api::default();
    let addr = serve(api.clone()).await;
    let dir = tempfile::tempdir().unwrap();

    let result = orchestrator(addr, dir.path())
        .scrape_url(
            &format!("http://{addr}/harbour"),
            &ScrapeOptions {
                dry_run: true,
                limit: Some(1),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.source_name, "127.0.0.1");
    assert_eq!(result.events_found, 2);
    assert_eq!(result.events_submitted, 1);

    let err = orchestrator(addr, dir.path())
        .scrape_url("not a url", &ScrapeOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidUrl { .. }), "{err}");
}

#[tokio::test]
async fn selector_source_skips_nameless_items() {
    let api = Api::default();
    let addr = serve(api.clone()).await;
    let dir = sources_dir(addr);

    let result = orchestrator(addr, dir.path())
        .scrape_source("corner cafe", &ScrapeOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.events_found, 2);
    assert_eq!(result.events_created, 2);

    let submitted = api.submitted();
    assert_eq!(submitted[0]["name"], "Open Mic");
    assert_eq!(submitted[0]["startDate"], "2026-09-01T20:00");
    let id = submitted[0]["source"]["eventId"].as_str().unwrap();
    assert!(id.starts_with("scraped:Corner Cafe:"), "{id}");
}

#[tokio::test]
async fn unknown_and_disabled_sources_are_rejected() {
    let addr = serve(Api::default()).await;
    let dir = sources_dir(addr);
    let orchestrator = orchestrator(addr, dir.path());
    let cancel = CancellationToken::new();

    let err = orchestrator
        .scrape_source("Nowhere", &ScrapeOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::SourceNotFound { .. }), "{err}");

    let err = orchestrator
        .scrape_source("closed hall", &ScrapeOptions::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::SourceDisabled { .. }), "{err}");
}

#[tokio::test]
async fn scrape_all_continues_past_failures_and_skips_disabled() {
    let api = Api::default();
    let addr = serve(api.clone()).await;
    let dir = sources_dir(addr);

    let results = orchestrator(addr, dir.path())
        .scrape_all(&ScrapeOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<&str> = results.iter().map(|r| r.source_name.as_str()).collect();
    assert_eq!(names, ["Harbourfront", "Broken Venue", "Corner Cafe"]);

    assert!(results[0].is_success());
    assert!(!results[1].is_success());
    assert_eq!(results[1].events_submitted, 0);
    assert_eq!(results[1].events_created, 0);
    assert!(results[2].is_success());

    assert_eq!(api.calls(), 2);
}

#[tokio::test]
async fn scrape_all_stops_when_cancelled() {
    let api = Api::default();
    let addr = serve(api.clone()).await;
    let dir = sources_dir(addr);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let results = orchestrator(addr, dir.path())
        .scrape_all(&ScrapeOptions::default(), &cancel)
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn rate_limited_submission_is_reported() {
    let api = Api {
        rate_limited: true,
        ..Api::default()
    };
    let addr = serve(api.clone()).await;
    let dir = sources_dir(addr);

    let result = orchestrator(addr, dir.path())
        .scrape_source("Harbourfront", &ScrapeOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_rate_limited());
    assert_eq!(result.events_found, 2);
    assert_eq!(result.events_submitted, 0);
}

// ── Registry ────────────────────────────────────────────────────────────

struct FixedRegistry(Result<Vec<RegisteredSource>, String>);

#[async_trait]
impl SourceRegistry for FixedRegistry {
    async fn enabled_sources(&self) -> Result<Vec<RegisteredSource>, RegistryError> {
        self.0.clone().map_err(|message| RegistryError { message })
    }
}

#[tokio::test]
async fn registry_takes_precedence_over_directory() {
    let addr = serve(Api::default()).await;
    let dir = sources_dir(addr);

    let registry = FixedRegistry(Ok(vec![RegisteredSource {
        name: "Registered Gallery".to_string(),
        url: format!("http://{addr}/harbour"),
        enabled: true,
        ..RegisteredSource::default()
    }]));

    let sources = orchestrator(addr, dir.path())
        .with_registry(Arc::new(registry))
        .load_sources()
        .await
        .unwrap();

    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name, "Registered Gallery");
}

#[tokio::test]
async fn unusable_registry_falls_back_to_directory() {
    let addr = serve(Api::default()).await;
    let dir = sources_dir(addr);

    for registry in [
        FixedRegistry(Err("connection refused".to_string())),
        FixedRegistry(Ok(Vec::new())),
        FixedRegistry(Ok(vec![RegisteredSource {
            name: "No URL".to_string(),
            ..RegisteredSource::default()
        }])),
    ] {
        let sources = orchestrator(addr, dir.path())
            .with_registry(Arc::new(registry))
            .load_sources()
            .await
            .unwrap();
        assert_eq!(sources.len(), 4);
    }
}

// ── Run tracking ────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingTracker {
    log: Mutex<Vec<String>>,
    broken: bool,
}

#[async_trait]
impl RunTracker for RecordingTracker {
    async fn run_started(&self, start: &RunStart) -> Result<RunId, TrackingError> {
        if self.broken {
            return Err(TrackingError {
                message: "store offline".to_string(),
            });
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("started {}", start.source_name));
        Ok(RunId("run-1".to_string()))
    }

    async fn run_failed(&self, id: &RunId, _message: &str) -> Result<(), TrackingError> {
        self.log.lock().unwrap().push(format!("failed {id}"));
        Ok(())
    }

    async fn run_completed(&self, id: &RunId, counts: &RunCounts) -> Result<(), TrackingError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("completed {id} {}", counts.events_created));
        Ok(())
    }
}

#[tokio::test]
async fn runs_are_tracked() {
    let addr = serve(Api::default()).await;
    let dir = sources_dir(addr);
    let tracker = Arc::new(RecordingTracker::default());

    let orchestrator = orchestrator(addr, dir.path()).with_tracker(tracker.clone());
    let cancel = CancellationToken::new();

    orchestrator
        .scrape_source("Harbourfront", &ScrapeOptions::default(), &cancel)
        .await
        .unwrap();
    orchestrator
        .scrape_source("Broken Venue", &ScrapeOptions::default(), &cancel)
        .await
        .unwrap();

    assert_eq!(
        *tracker.log.lock().unwrap(),
        [
            "started Harbourfront",
            "completed run-1 2",
            "started Broken Venue",
            "failed run-1"
        ]
    );
}

#[tokio::test]
async fn tracking_failures_do_not_affect_the_run() {
    let addr = serve(Api::default()).await;
    let dir = sources_dir(addr);
    let tracker = Arc::new(RecordingTracker {
        broken: true,
        ..RecordingTracker::default()
    });

    let result = orchestrator(addr, dir.path())
        .with_tracker(tracker.clone())
        .scrape_source("Harbourfront", &ScrapeOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.events_created, 2);
    assert!(tracker.log.lock().unwrap().is_empty());
}
