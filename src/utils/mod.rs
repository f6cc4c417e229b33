//! Utility functions and helpers.

pub mod http;

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

static ISO_DATE: OnceLock<Option<Regex>> = OnceLock::new();

/// Long-form date layouts seen in source payloads.
const TEXT_DATE_FORMATS: [&str; 4] = ["%d %B, %Y", "%d %B %Y", "%B %d, %Y", "%d %b %Y"];

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a calendar date from the formats the sources emit.
///
/// Accepts `2024-01-15`, any ISO timestamp starting with a date
/// (`2024-01-15T10:00:00Z`, `2024-01-15T10:00:00.000+00:00`) and
/// long forms such as `15 January, 2024`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let iso = ISO_DATE
        .get_or_init(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})(?:[T ]|$)").ok())
        .as_ref()?;
    if let Some(caps) = iso.captures(raw) {
        return NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok();
    }

    let text = normalize_ws(raw);
    TEXT_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&text, format).ok())
}

/// Blank-to-`None` for optional text fields.
pub fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
