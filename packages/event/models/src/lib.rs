#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The canonical event record accepted by the events ingest API.
//!
//! Both scraping tiers normalize into [`EventInput`]. Timestamps are kept
//! as opaque strings; the ingest API owns date validation and
//! deduplication.

use serde::{Deserialize, Serialize};

/// The event type used when a source record does not carry its own.
pub const DEFAULT_EVENT_TYPE: &str = "Event";

/// A normalized event ready for submission to the ingest API.
///
/// `name` and `start_date` are always non-empty; every other field is
/// optional and omitted from the JSON payload when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    /// Schema.org event type (e.g. `"Event"`, `"MusicEvent"`).
    #[serde(rename = "@type")]
    pub event_type: String,
    /// Event title.
    pub name: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Start date or datetime, verbatim from the source.
    pub start_date: String,
    /// End date or datetime, verbatim from the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// Door-opening time, verbatim from the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub door_time: Option<String>,
    /// Where the event takes place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PlaceInput>,
    /// Who runs the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<OrganizationInput>,
    /// Primary image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Canonical page for the event on the publisher's site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Free-form keywords.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    /// Language codes the event is held in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_language: Option<Vec<String>>,
    /// `Some(true)` for free events, `Some(false)` for paid ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_accessible_for_free: Option<bool>,
    /// Ticketing information (first offer only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offers: Option<OfferInput>,
    /// External pages describing the same event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_as: Option<Vec<String>>,
    /// License the listing is published under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Where this record was scraped from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInput>,
}

/// A venue, either name-only or with a postal address and coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceInput {
    /// Linked-data identifier of the place.
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Venue name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_locality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_country: Option<String>,
    /// Latitude (WGS84).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude (WGS84).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl PlaceInput {
    /// Builds a place that only carries a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// The organizer of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationInput {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Price and ticketing link for an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Price as published (kept textual, e.g. `"25.00"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    /// ISO 4217 currency code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_currency: Option<String>,
}

/// Attribution block tying a submitted event back to its scrape source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInput {
    /// URL of the configured source (listing page, not the event page).
    pub url: String,
    /// Stable per-event identifier used by the API for deduplication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Configured source name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}
