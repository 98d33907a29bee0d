//! Decoding of loosely-typed JSON-LD property values.
//!
//! Any JSON-LD property may be absent, a single value, or an array of
//! values, and a single value may be a plain literal or a
//! `{"@value": ...}` wrapper (optionally typed, e.g.
//! `{"@type": "Date", "@value": "2026-03-01"}`). [`LdValue`] captures the
//! first distinction once; the text, list, and flag decoders handle the
//! second.

use serde_json::Value;

/// A property value classified as absent, scalar, or list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LdValue<'a> {
    /// Missing, `null`, or an empty array.
    Absent,
    Scalar(&'a Value),
    List(&'a [Value]),
}

impl<'a> LdValue<'a> {
    /// Classifies an optional JSON value.
    #[must_use]
    pub fn of(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::Array(items)) if items.is_empty() => Self::Absent,
            Some(Value::Array(items)) => Self::List(items),
            Some(value) => Self::Scalar(value),
        }
    }

    /// Classifies `node[key]`.
    #[must_use]
    pub fn field(node: &'a Value, key: &str) -> Self {
        Self::of(node.get(key))
    }

    /// The value itself, or the first element of a list.
    #[must_use]
    pub fn first(self) -> Option<&'a Value> {
        match self {
            Self::Absent => None,
            Self::Scalar(value) => Some(value),
            Self::List(items) => items.first(),
        }
    }

    /// Decodes a single text value. Lists contribute their first element.
    #[must_use]
    pub fn text(self) -> Option<String> {
        self.first().and_then(literal_text)
    }

    /// Decodes a list of text values. A lone scalar becomes a one-element
    /// list; nothing usable yields `None` rather than an empty list.
    #[must_use]
    pub fn list(self) -> Option<Vec<String>> {
        let items: Vec<String> = match self {
            Self::Absent => Vec::new(),
            Self::Scalar(value) => literal_text(value).into_iter().collect(),
            Self::List(items) => items.iter().filter_map(literal_text).collect(),
        };
        (!items.is_empty()).then_some(items)
    }

    /// Decodes a boolean given either as JSON `true`/`false` or as the
    /// strings `"true"`/`"false"` in any case.
    #[must_use]
    pub fn flag(self) -> Option<bool> {
        match unwrap_value(self.first()?) {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Decodes a number given either as a JSON number or numeric text.
    #[must_use]
    pub fn number(self) -> Option<f64> {
        match unwrap_value(self.first()?) {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Unwraps a `{"@value": ...}` object; anything else is returned as is.
fn unwrap_value(value: &Value) -> &Value {
    value.get("@value").unwrap_or(value)
}

/// Text of a string or number literal, possibly wrapped. Blank text is
/// treated as missing.
fn literal_text(value: &Value) -> Option<String> {
    let text = match unwrap_value(value) {
        Value::String(s) => s.trim().to_owned(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
