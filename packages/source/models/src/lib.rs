#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Scrape source configuration types.
//!
//! A source is described on disk (or by the dynamic registry) as a
//! [`SourceDefinition`], which carries loader defaults and accepts any
//! values. [`SourceDefinition::validate`] turns it into an immutable
//! [`SourceConfig`] or reports every problem it found.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default trust level for sources that do not specify one.
pub const DEFAULT_TRUST_LEVEL: u8 = 5;

/// Default cap on pages visited per Tier 1 crawl.
pub const DEFAULT_MAX_PAGES: u32 = 10;

/// How events are extracted from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Tier 0: embedded JSON-LD structured data.
    Structured,
    /// Tier 1: CSS selectors with pagination crawling.
    Selectors,
}

impl Tier {
    /// Returns the numeric tier as written in source files.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Structured => 0,
            Self::Selectors => 1,
        }
    }
}

impl TryFrom<i64> for Tier {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Structured),
            1 => Ok(Self::Selectors),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Scheduling hint for automated runs. Informational only; the pipeline
/// never schedules anything itself.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Schedule {
    Daily,
    Weekly,
    #[default]
    Manual,
}

/// CSS selectors used by Tier 1 crawling.
///
/// Every selector except `event_list` is evaluated relative to a matched
/// event container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Repeating event container. Required for Tier 1.
    pub event_list: Option<String>,
    pub name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    /// Link to the event's own page (`href` is read).
    pub url: Option<String>,
    /// Event image (`src` is read).
    pub image: Option<String>,
    /// Link to the next listing page.
    pub pagination: Option<String>,
}

impl SelectorConfig {
    /// Returns the event container selector if it is set and non-blank.
    #[must_use]
    pub fn event_list(&self) -> Option<&str> {
        non_blank(self.event_list.as_deref())
    }

    /// Returns the pagination selector if it is set and non-blank.
    #[must_use]
    pub fn pagination(&self) -> Option<&str> {
        non_blank(self.pagination.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// A source definition as written in a config file or returned by the
/// registry, before validation.
///
/// Missing keys take the loader defaults: enabled, tier 0, trust level 5,
/// ten pages, manual schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDefinition {
    /// Unique name, used as the dedup and display key.
    pub name: String,
    /// Listing page to scrape.
    pub url: String,
    /// `0` (structured data) or `1` (CSS selectors).
    pub tier: i64,
    /// `daily`, `weekly` or `manual`.
    pub schedule: String,
    /// 1-10; `0` means "use the default".
    pub trust_level: i64,
    /// License string attached to every event from this source.
    pub license: String,
    pub enabled: bool,
    /// Optional pattern describing event detail URLs (documentation only).
    pub event_url_pattern: Option<String>,
    /// Page cap for Tier 1 crawls; `0` means "use the default".
    pub max_pages: i64,
    pub notes: Option<String>,
    pub selectors: SelectorConfig,
}

impl Default for SourceDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            tier: 0,
            schedule: Schedule::Manual.to_string(),
            trust_level: i64::from(DEFAULT_TRUST_LEVEL),
            license: String::new(),
            enabled: true,
            event_url_pattern: None,
            max_pages: i64::from(DEFAULT_MAX_PAGES),
            notes: None,
            selectors: SelectorConfig::default(),
        }
    }
}

/// Every problem found while validating one [`SourceDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .problems.join("; "))]
pub struct ValidationErrors {
    /// One `field: message` entry per problem.
    pub problems: Vec<String>,
}

impl SourceDefinition {
    /// Validates the definition and converts it into a [`SourceConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] listing every invalid field.
    pub fn validate(self) -> Result<SourceConfig, ValidationErrors> {
        let mut problems = Vec::new();

        let name = self.name.trim().to_string();
        if name.is_empty() {
            problems.push("name: required".to_string());
        }

        let url = self.url.trim().to_string();
        if url.is_empty() {
            problems.push("url: required".to_string());
        } else if !is_http_url(&url) {
            problems.push(format!(
                "url: must be a valid http/https URL, got {:?}",
                self.url
            ));
        }

        let tier = Tier::try_from(self.tier).map_err(|tier| {
            problems.push(format!("tier: must be 0 or 1, got {tier}"));
        });

        let trust_level = match self.trust_level {
            0 => Some(DEFAULT_TRUST_LEVEL),
            level @ 1..=10 => u8::try_from(level).ok(),
            level => {
                problems.push(format!("trust_level: must be 1-10, got {level}"));
                None
            }
        };

        if matches!(tier, Ok(Tier::Selectors)) && self.selectors.event_list().is_none() {
            problems.push("selectors.event_list: required for tier 1".to_string());
        }

        let schedule = if self.schedule.trim().is_empty() {
            Ok(Schedule::Manual)
        } else {
            self.schedule.parse::<Schedule>().map_err(|_| {
                problems.push(format!(
                    "schedule: must be daily, weekly, or manual, got {:?}",
                    self.schedule
                ));
            })
        };

        let max_pages = match self.max_pages {
            0 => Some(DEFAULT_MAX_PAGES),
            pages if pages < 0 => {
                problems.push(format!("max_pages: must not be negative, got {pages}"));
                None
            }
            pages => Some(u32::try_from(pages).unwrap_or(u32::MAX)),
        };

        match (tier, schedule, trust_level, max_pages) {
            (Ok(tier), Ok(schedule), Some(trust_level), Some(max_pages)) if problems.is_empty() => {
                Ok(SourceConfig {
                    name,
                    url,
                    tier,
                    schedule,
                    trust_level,
                    license: Some(self.license.trim().to_string()).filter(|l| !l.is_empty()),
                    enabled: self.enabled,
                    event_url_pattern: self.event_url_pattern,
                    max_pages,
                    notes: self.notes,
                    selectors: self.selectors,
                })
            }
            _ => Err(ValidationErrors { problems }),
        }
    }
}

impl From<SourceConfig> for SourceDefinition {
    /// The definition that validates back into `config`.
    fn from(config: SourceConfig) -> Self {
        Self {
            name: config.name,
            url: config.url,
            tier: i64::from(config.tier.as_u8()),
            schedule: config.schedule.to_string(),
            trust_level: i64::from(config.trust_level),
            license: config.license.unwrap_or_default(),
            enabled: config.enabled,
            event_url_pattern: config.event_url_pattern,
            max_pages: i64::from(config.max_pages),
            notes: config.notes,
            selectors: config.selectors,
        }
    }
}

fn is_http_url(raw: &str) -> bool {
    url::Url::parse(raw).is_ok_and(|u| {
        matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty())
    })
}

/// A validated scrape source.
///
/// Built only through [`SourceDefinition::validate`], so the URL is always
/// an absolute http(s) URL and a Tier 1 source always has an event-list
/// selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub tier: Tier,
    pub schedule: Schedule,
    pub trust_level: u8,
    pub license: Option<String>,
    pub enabled: bool,
    pub event_url_pattern: Option<String>,
    pub max_pages: u32,
    pub notes: Option<String>,
    pub selectors: SelectorConfig,
}

impl SourceConfig {
    /// Builds a one-off Tier 0 source for an arbitrary URL, named after the
    /// URL's host.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] if the URL is not an absolute http(s) URL.
    pub fn ad_hoc(raw_url: &str) -> Result<Self, ValidationErrors> {
        let host = url::Url::parse(raw_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        SourceDefinition {
            name: host,
            url: raw_url.to_string(),
            ..SourceDefinition::default()
        }
        .validate()
    }

    /// Returns `true` for Tier 1 sources.
    #[must_use]
    pub fn uses_selectors(&self) -> bool {
        self.tier == Tier::Selectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(toml_str: &str) -> SourceDefinition {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn applies_loader_defaults() {
        let def = definition(
            r#"
name = "symphony"
url = "https://symphony.example/concerts"
"#,
        );
        let cfg = def.validate().unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.tier, Tier::Structured);
        assert_eq!(cfg.trust_level, 5);
        assert_eq!(cfg.max_pages, 10);
        assert_eq!(cfg.schedule, Schedule::Manual);
        assert_eq!(cfg.license, None);
    }

    #[test]
    fn zero_trust_and_pages_fall_back_to_defaults() {
        let def = definition(
            r#"
name = "gallery"
url = "https://gallery.example/"
trust_level = 0
max_pages = 0
"#,
        );
        let cfg = def.validate().unwrap();
        assert_eq!(cfg.trust_level, DEFAULT_TRUST_LEVEL);
        assert_eq!(cfg.max_pages, DEFAULT_MAX_PAGES);
    }

    #[test]
    fn tier_one_requires_event_list_selector() {
        let def = definition(
            r#"
name = "library"
url = "https://library.example/events"
tier = 1

[selectors]
name = "h2"
"#,
        );
        let err = def.validate().unwrap_err();
        assert_eq!(
            err.problems,
            vec!["selectors.event_list: required for tier 1".to_string()]
        );
    }

    #[test]
    fn blank_event_list_selector_counts_as_missing() {
        let def = SourceDefinition {
            name: "library".to_string(),
            url: "https://library.example/events".to_string(),
            tier: 1,
            selectors: SelectorConfig {
                event_list: Some("   ".to_string()),
                ..SelectorConfig::default()
            },
            ..SourceDefinition::default()
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn reports_every_problem() {
        let def = SourceDefinition {
            name: " ".to_string(),
            url: "ftp://files.example/".to_string(),
            tier: 3,
            schedule: "hourly".to_string(),
            trust_level: 11,
            max_pages: -1,
            ..SourceDefinition::default()
        };
        let err = def.validate().unwrap_err();
        assert_eq!(err.problems.len(), 6, "{err}");
        assert!(err.to_string().contains("tier: must be 0 or 1, got 3"));
        assert!(err.to_string().contains("schedule: must be daily, weekly, or manual"));
    }

    #[test]
    fn rejects_url_without_host() {
        let def = SourceDefinition {
            name: "bad".to_string(),
            url: "https://".to_string(),
            ..SourceDefinition::default()
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn ad_hoc_source_is_named_after_host() {
        let cfg = SourceConfig::ad_hoc("https://www.tso.example:8443/concerts").unwrap();
        assert_eq!(cfg.name, "www.tso.example");
        assert_eq!(cfg.tier, Tier::Structured);
        assert_eq!(cfg.trust_level, 5);
    }

    #[test]
    fn ad_hoc_rejects_non_http_urls() {
        assert!(SourceConfig::ad_hoc("mailto:events@example.org").is_err());
    }

    #[test]
    fn config_converts_back_into_an_equivalent_definition() {
        let config = definition(
            r#"
name = "Jazz Bistro"
url = "https://jazzbistro.example/shows"
tier = 1
schedule = "weekly"
trust_level = 8
max_pages = 3
license = "CC-BY-4.0"

[selectors]
event_list = ".show"
name = "h2"
"#,
        )
        .validate()
        .unwrap();

        let back = SourceDefinition::from(config.clone());
        assert_eq!(back.tier, 1);
        assert_eq!(back.schedule, "weekly");
        assert_eq!(back.license, "CC-BY-4.0");

        let reparsed: SourceDefinition = toml::from_str(&toml::to_string(&back).unwrap()).unwrap();
        assert_eq!(reparsed.validate().unwrap(), config);
    }
}
