//! Turns raw completion text into a [`StructuredRecord`].
//!
//! Only the top-level decode can fail. Missing or mistyped fields fall back
//! to empty values so one odd field never discards a whole extraction.

use oncoflow_schema::{RawTimelineEntry, StructuredRecord};
use serde_json::{Map, Value};
use thiserror::Error;

const FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("model response is empty")]
    Empty,
    #[error("model response is not valid JSON: {0}")]
    NotJson(String),
    #[error("model response is JSON but not an object")]
    NotAnObject,
    #[error("timeline entry {index} is invalid: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

pub fn sanitize(raw: &str) -> Result<StructuredRecord, SanitizeError> {
    let cleaned = strip_fences(raw);
    if cleaned.is_empty() {
        return Err(SanitizeError::Empty);
    }

    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| SanitizeError::NotJson(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(SanitizeError::NotAnObject);
    };

    Ok(StructuredRecord {
        name: text_field(&obj, &["name"]).unwrap_or_default(),
        diagnosis: text_field(&obj, &["diagnosis"]).unwrap_or_default(),
        stage: text_field(&obj, &["stage"]).filter(|s| !s.is_empty()),
        clinical_notes: text_field(&obj, &["clinicalNotes", "clinical_notes"]).unwrap_or_default(),
        timeline: timeline_entries(obj.get("timeline")),
    })
}

/// Remove surrounding code fences (with optional language tag) and whitespace.
///
/// Nested wrappings are removed one layer at a time, so stripping is
/// idempotent. When the fenced block is preceded by prose, the block's
/// contents are returned.
pub fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    loop {
        let before = text;
        if let Some(rest) = text.strip_prefix(FENCE) {
            let tag_len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
                .unwrap_or(rest.len());
            text = rest[tag_len..].trim();
        }
        if let Some(rest) = text.strip_suffix(FENCE) {
            text = rest.trim();
        }
        if text == before {
            break;
        }
    }

    if !text.starts_with('{') {
        if let Some(block) = embedded_block(text) {
            return strip_fences(block);
        }
    }
    text
}

/// First fenced block inside surrounding prose.
fn embedded_block(text: &str) -> Option<&str> {
    let open = text.find(FENCE)?;
    let after_open = &text[open + FENCE.len()..];
    let close = after_open.find(FENCE)?;
    Some(&text[open..open + FENCE.len() + close + FENCE.len()])
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k))
        .and_then(scalar_text)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn timeline_entries(value: Option<&Value>) -> Vec<RawTimelineEntry> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .map(|item| match item {
            Value::Object(entry) => RawTimelineEntry {
                date: text_field(entry, &["date", "fecha"]).filter(|s| !s.is_empty()),
                kind: text_field(entry, &["type", "tipo"]).filter(|s| !s.is_empty()),
                note: text_field(entry, &["note", "nota"]),
            },
            _ => RawTimelineEntry::default(),
        })
        .collect()
}
