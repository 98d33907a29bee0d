//! Tier 1 normalization of selector-extracted items.

use event_scrape_event_models::{DEFAULT_EVENT_TYPE, EventInput, PlaceInput, SourceInput};
use event_scrape_scraper::RawEvent;
use event_scrape_source_models::SourceConfig;
use sha2::{Digest, Sha256};

use super::NormalizeError;

/// Hex characters of the digest kept in a fallback identifier.
const FALLBACK_ID_HEX_LEN: usize = 16;

/// Converts one crawled item into an [`EventInput`].
///
/// The item's URL is used as its identifier when present; otherwise a
/// deterministic one is derived with [`fallback_event_id`].
///
/// # Errors
///
/// Fails if the trimmed name or start date is empty.
pub fn normalize_raw(raw: &RawEvent, source: &SourceConfig) -> Result<EventInput, NormalizeError> {
    let name = non_empty(&raw.name).ok_or(NormalizeError::MissingName)?;
    let start_date = non_empty(&raw.start_date).ok_or(NormalizeError::MissingStartDate)?;
    let url = non_empty(&raw.url);

    let event_id = url
        .clone()
        .unwrap_or_else(|| fallback_event_id(&name, &start_date, &source.name));

    Ok(EventInput {
        event_type: DEFAULT_EVENT_TYPE.to_owned(),
        description: non_empty(&raw.description),
        end_date: non_empty(&raw.end_date),
        door_time: None,
        location: non_empty(&raw.location).map(PlaceInput::named),
        organizer: None,
        image: non_empty(&raw.image),
        url,
        keywords: None,
        in_language: None,
        is_accessible_for_free: None,
        offers: None,
        same_as: None,
        license: source.license.clone(),
        source: Some(SourceInput {
            url: source.url.clone(),
            event_id: Some(event_id),
            name: source.name.clone(),
            license: source.license.clone(),
        }),
        name,
        start_date,
    })
}

/// Identifier for an item that has no URL of its own:
/// `scraped:{source}:{hash}`, where `hash` is the first 16 hex characters of
/// the SHA-256 of `name|start|source`.
#[must_use]
pub fn fallback_event_id(name: &str, start_date: &str, source_name: &str) -> String {
    let digest = Sha256::digest(format!("{name}|{start_date}|{source_name}").as_bytes());
    let hash = hex::encode(digest);
    format!("scraped:{source_name}:{}", &hash[..FALLBACK_ID_HEX_LEN])
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

#[cfg(test)]
mod tests {
    use event_scrape_source_models::SourceDefinition;

    use super::*;

    fn source() -> SourceConfig {
        SourceDefinition {
            name: "Jazz Bistro".to_owned(),
            url: "https://jazzbistro.example/calendar".to_owned(),
            license: "CC-BY-SA-4.0".to_owned(),
            tier: 1,
            selectors: event_scrape_source_models::SelectorConfig {
                event_list: Some(".event".to_owned()),
                ..Default::default()
            },
            ..SourceDefinition::default()
        }
        .validate()
        .unwrap()
    }

    fn raw(name: &str, start: &str) -> RawEvent {
        RawEvent {
            name: name.to_owned(),
            start_date: start.to_owned(),
            ..RawEvent::default()
        }
    }

    #[test]
    fn trims_and_keeps_optional_fields() {
        let mut item = raw("  Late Set  ", " 2026-04-03T22:00 ");
        item.location = " Main Room ".to_owned();
        item.description = "   ".to_owned();
        item.url = "https://jazzbistro.example/e/late-set".to_owned();
        item.image = "https://jazzbistro.example/img/late.jpg".to_owned();

        let event = normalize_raw(&item, &source()).unwrap();
        assert_eq!(event.event_type, "Event");
        assert_eq!(event.name, "Late Set");
        assert_eq!(event.start_date, "2026-04-03T22:00");
        assert_eq!(event.location, Some(PlaceInput::named("Main Room")));
        assert_eq!(event.description, None);
        assert_eq!(event.end_date, None);
        assert_eq!(event.license.as_deref(), Some("CC-BY-SA-4.0"));

        let attribution = event.source.unwrap();
        assert_eq!(attribution.name, "Jazz Bistro");
        assert_eq!(
            attribution.event_id.as_deref(),
            Some("https://jazzbistro.example/e/late-set")
        );
    }

    #[test]
    fn missing_mandatory_fields_fail() {
        assert_eq!(
            normalize_raw(&raw(" ", "2026-04-03"), &source()),
            Err(NormalizeError::MissingName)
        );
        assert_eq!(
            normalize_raw(&raw("Late Set", ""), &source()),
            Err(NormalizeError::MissingStartDate)
        );
    }

    #[test]
    fn unlinked_items_get_a_stable_identifier() {
        let first = normalize_raw(&raw("Late Set", "April 3"), &source()).unwrap();
        let second = normalize_raw(&raw("Late Set", "April 3"), &source()).unwrap();
        let other = normalize_raw(&raw("Early Set", "April 3"), &source()).unwrap();

        let id = |event: &EventInput| event.source.as_ref().unwrap().event_id.clone().unwrap();

        assert_eq!(id(&first), id(&second));
        assert_ne!(id(&first), id(&other));
        assert!(id(&first).starts_with("scraped:Jazz Bistro:"));
        assert_eq!(id(&first).len(), "scraped:Jazz Bistro:".len() + 16);
    }

    #[test]
    fn fallback_id_hashes_pipe_joined_fields() {
        let expected = hex::encode(Sha256::digest(b"a|b|c"));
        assert_eq!(fallback_event_id("a", "b", "c"), format!("scraped:c:{}", &expected[..16]));
    }
}
