//! Tier 0 normalization of schema.org `Event` nodes.

use event_scrape_event_models::{
    DEFAULT_EVENT_TYPE, EventInput, OfferInput, OrganizationInput, PlaceInput, SourceInput,
};
use event_scrape_scraper::json_ld::node_type;
use event_scrape_source_models::SourceConfig;
use serde_json::Value;

use super::{NormalizeError, ld_value::LdValue};

const ADDRESS_FIELDS: [&str; 5] = [
    "streetAddress",
    "addressLocality",
    "addressRegion",
    "postalCode",
    "addressCountry",
];

/// Converts one JSON-LD event node into an [`EventInput`].
///
/// # Errors
///
/// Fails if the node is not an object, or if it has no usable `name` or
/// `startDate`.
pub fn normalize_structured(
    node: &Value,
    source: &SourceConfig,
) -> Result<EventInput, NormalizeError> {
    if !node.is_object() {
        return Err(NormalizeError::NotAnObject);
    }

    let text = |key: &str| LdValue::field(node, key).text();

    let name = text("name").ok_or(NormalizeError::MissingName)?;
    let start_date = text("startDate").ok_or(NormalizeError::MissingStartDate)?;

    Ok(EventInput {
        event_type: node_type(node)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_EVENT_TYPE)
            .to_owned(),
        name,
        description: text("description"),
        start_date,
        end_date: text("endDate"),
        door_time: text("doorTime"),
        location: place(LdValue::field(node, "location")),
        organizer: organizer(LdValue::field(node, "organizer")),
        image: image(LdValue::field(node, "image")),
        url: text("url"),
        keywords: LdValue::field(node, "keywords").list(),
        in_language: LdValue::field(node, "inLanguage").list(),
        is_accessible_for_free: LdValue::field(node, "isAccessibleForFree").flag(),
        offers: offer(LdValue::field(node, "offers")),
        same_as: LdValue::field(node, "sameAs").list(),
        license: source.license.clone(),
        source: Some(SourceInput {
            url: source.url.clone(),
            event_id: event_id(node),
            name: source.name.clone(),
            license: source.license.clone(),
        }),
    })
}

/// Stable identifier: `@id`, then `identifier`, then `url`.
fn event_id(node: &Value) -> Option<String> {
    LdValue::field(node, "@id")
        .text()
        .or_else(|| identifier(LdValue::field(node, "identifier")))
        .or_else(|| LdValue::field(node, "url").text())
}

/// `identifier` may also be a `PropertyValue` carrying its text in `value`.
fn identifier(value: LdValue<'_>) -> Option<String> {
    value
        .text()
        .or_else(|| LdValue::of(value.first()?.get("value")).text())
}

fn place(value: LdValue<'_>) -> Option<PlaceInput> {
    let node = value.first()?;

    if let Value::String(name) = node {
        let name = name.trim();
        return (!name.is_empty()).then(|| PlaceInput::named(name));
    }
    if !node.is_object() {
        return None;
    }

    let mut address: [Option<String>; 5] = Default::default();

    match LdValue::field(node, "address").first() {
        Some(nested @ Value::Object(_)) => {
            for (slot, key) in address.iter_mut().zip(ADDRESS_FIELDS) {
                *slot = LdValue::field(nested, key).text();
            }
        }
        Some(street @ Value::String(_)) => {
            address[0] = LdValue::of(Some(street)).text();
        }
        _ => {}
    }

    // Flat fields fill whatever the nested address left empty.
    for (slot, key) in address.iter_mut().zip(ADDRESS_FIELDS) {
        if slot.is_none() {
            *slot = LdValue::field(node, key).text();
        }
    }

    let [street_address, address_locality, address_region, postal_code, address_country] =
        address;

    let (latitude, longitude) = LdValue::field(node, "geo")
        .first()
        .and_then(|geo| {
            Some((
                LdValue::field(geo, "latitude").number()?,
                LdValue::field(geo, "longitude").number()?,
            ))
        })
        .unzip();

    let place = PlaceInput {
        id: LdValue::field(node, "@id").text(),
        name: LdValue::field(node, "name").text(),
        street_address,
        address_locality,
        address_region,
        postal_code,
        address_country,
        latitude,
        longitude,
    };

    let useful = place.name.is_some()
        || place.street_address.is_some()
        || place.address_locality.is_some()
        || place.id.is_some();

    useful.then_some(place)
}

fn organizer(value: LdValue<'_>) -> Option<OrganizationInput> {
    let node = value.first()?;

    if let Value::String(_) = node {
        let name = LdValue::of(Some(node)).text()?;
        return Some(OrganizationInput {
            name: Some(name),
            ..OrganizationInput::default()
        });
    }

    let org = OrganizationInput {
        id: LdValue::field(node, "@id").text(),
        name: LdValue::field(node, "name").text(),
        url: LdValue::field(node, "url").text(),
    };

    (org.id.is_some() || org.name.is_some() || org.url.is_some()).then_some(org)
}

fn offer(value: LdValue<'_>) -> Option<OfferInput> {
    let node = value.first()?;

    let offer = OfferInput {
        url: LdValue::field(node, "url").text(),
        price: LdValue::field(node, "price").text(),
        price_currency: LdValue::field(node, "priceCurrency").text(),
    };

    (offer.url.is_some() || offer.price.is_some() || offer.price_currency.is_some())
        .then_some(offer)
}

/// A URL string, or an `ImageObject` with `url` falling back to
/// `contentUrl`.
fn image(value: LdValue<'_>) -> Option<String> {
    let node = value.first()?;
    match node {
        Value::Object(_) => LdValue::field(node, "url")
            .text()
            .or_else(|| LdValue::field(node, "contentUrl").text()),
        _ => LdValue::of(Some(node)).text(),
    }
}
