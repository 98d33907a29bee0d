//! Normalization of raw scrape output into [`EventInput`] records.
//!
//! Tier 0 nodes go through [`normalize_structured`], Tier 1 items through
//! [`normalize_raw`]. Both attach the source's name, URL and license, and
//! both reject records without a name or start date.
//!
//! [`EventInput`]: event_scrape_event_models::EventInput

pub mod ld_value;
mod raw;
mod structured;

pub use raw::{fallback_event_id, normalize_raw};
pub use structured::normalize_structured;

/// Why a record could not be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("missing required field: name")]
    MissingName,

    #[error("missing required field: startDate")]
    MissingStartDate,

    /// A structured-data record that is not a JSON object.
    #[error("structured record is not an object")]
    NotAnObject,
}
