#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Response types of the events ingest API.

use serde::{Deserialize, Serialize};

/// Batch id reported by a dry-run submission.
pub const DRY_RUN_BATCH_ID: &str = "dry-run";

/// Outcome of one batch submission, or the sum of several.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResult {
    /// Identifier the API assigned to the batch. When several chunks were
    /// submitted, the last one.
    #[serde(default)]
    pub batch_id: String,
    #[serde(default)]
    pub events_created: u64,
    #[serde(default)]
    pub events_duplicate: u64,
    #[serde(default)]
    pub events_failed: u64,
    /// Per-record failures, indexed within the submitted chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<IngestErrorEntry>>,
}

impl IngestResult {
    /// A result reporting `count` records as created under
    /// [`DRY_RUN_BATCH_ID`].
    #[must_use]
    pub fn dry_run(count: u64) -> Self {
        Self {
            batch_id: DRY_RUN_BATCH_ID.to_string(),
            events_created: count,
            ..Self::default()
        }
    }

    /// Adds another chunk's counts into this one. The other chunk's batch
    /// id replaces this one's, and its errors are appended.
    pub fn absorb(&mut self, other: Self) {
        self.batch_id = other.batch_id;
        self.events_created += other.events_created;
        self.events_duplicate += other.events_duplicate;
        self.events_failed += other.events_failed;
        if let Some(errors) = other.errors {
            self.errors.get_or_insert_with(Vec::new).extend(errors);
        }
    }
}

/// A single record the API rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestErrorEntry {
    pub index: u64,
    pub message: String,
}
