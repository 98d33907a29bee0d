#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Event sources: where they are configured and how their output becomes
//! canonical events.
//!
//! * [`loader`] reads TOML source definitions from a directory.
//! * [`registry`] is the seam for a dynamic store of definitions, consulted
//!   before the directory, plus sync and export between the two.
//! * [`normalize`] turns Tier 0 JSON-LD nodes and Tier 1 crawled items into
//!   [`EventInput`](event_scrape_event_models::EventInput) records.

pub mod loader;
pub mod normalize;
pub mod registry;

pub use loader::{ConfigError, load_source_config, load_source_configs, write_source_configs};
pub use normalize::{NormalizeError, normalize_raw, normalize_structured};
pub use registry::{
    ExportError, JsonFileRegistry, RegisteredSource, RegistryError, SourceRegistry, SyncReport,
    UpsertOutcome, export_sources, registered_configs, sync_sources,
};
