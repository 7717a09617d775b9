//! Key normalisation for payloads returned by the campaign service.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

fn word_boundary() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("valid regex"))
}

fn lower_upper_boundary() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"))
}

/// `emailsSent` -> `emails_sent`, `HTTPStatus` -> `http_status`
pub fn to_snake_case(name: &str) -> String {
    let spaced = word_boundary().replace_all(name, "${1}_${2}");
    lower_upper_boundary()
        .replace_all(&spaced, "${1}_${2}")
        .to_lowercase()
}

/// Recursively rename every object key with [`to_snake_case`].
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| (to_snake_case(&key), normalize_keys(inner)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}
