//! Run bookkeeping.
//!
//! A [`RunTracker`] records the start and outcome of every source run in
//! some external store. Tracking is best-effort: the orchestrator logs
//! tracker failures and carries on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_scrape_source_models::Tier;
use serde::Serialize;

/// Identifier a tracker assigns to a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct RunId(pub String);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What is known about a run when it begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStart {
    pub source_name: String,
    pub source_url: String,
    pub tier: Tier,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
}

/// Final counts of a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub events_found: usize,
    pub events_submitted: usize,
    pub events_created: u64,
    pub events_duplicate: u64,
    pub events_failed: u64,
}

/// The tracking store rejected or could not take a write.
#[derive(Debug, thiserror::Error)]
#[error("run tracking failed: {message}")]
pub struct TrackingError {
    pub message: String,
}

/// External store of run history.
#[async_trait]
pub trait RunTracker: Send + Sync {
    /// Records that a run began and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError`] if the store cannot be written.
    async fn run_started(&self, start: &RunStart) -> Result<RunId, TrackingError>;

    /// Records that a run ended with an error.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError`] if the store cannot be written.
    async fn run_failed(&self, id: &RunId, message: &str) -> Result<(), TrackingError>;

    /// Records that a run completed.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError`] if the store cannot be written.
    async fn run_completed(&self, id: &RunId, counts: &RunCounts) -> Result<(), TrackingError>;
}

/// A tracker that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRunTracker;

#[async_trait]
impl RunTracker for NullRunTracker {
    async fn run_started(&self, _start: &RunStart) -> Result<RunId, TrackingError> {
        Ok(RunId::default())
    }

    async fn run_failed(&self, _id: &RunId, _message: &str) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn run_completed(&self, _id: &RunId, _counts: &RunCounts) -> Result<(), TrackingError> {
        Ok(())
    }
}
