//! Field validation for user-supplied entity payloads.
//!
//! Violations are rejected at the service boundary before any state mutation.

use once_cell::sync::Lazy;
use regex::Regex;

static ENTITY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\d][\w\d\-]*$").expect("entity name pattern"));
static EVENT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\d\-\.]+$").expect("event type pattern"));
static WORD_DASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\d\-]+$").expect("word-dash pattern"));

const EVENT_TYPE_MAX: usize = 128;
const SOURCE_TYPE_MAX: usize = 32;

/// A user-supplied field failed validation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {field}: {message}")]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

fn violation(field: &'static str, message: impl Into<String>) -> FieldViolation {
    FieldViolation {
        field,
        message: message.into(),
    }
}

/// Entity names may only contain letters, numbers, underscores and dashes,
/// and must not start with a dash.
pub fn entity_name(name: &str) -> Result<(), FieldViolation> {
    if ENTITY_NAME.is_match(name) {
        return Ok(());
    }
    violation_err("name", name)
}

pub fn event_type(value: &str) -> Result<(), FieldViolation> {
    if value.len() > EVENT_TYPE_MAX {
        return Err(violation(
            "event type",
            format!("longer than {EVENT_TYPE_MAX} characters"),
        ));
    }
    if EVENT_TYPE.is_match(value) {
        return Ok(());
    }
    violation_err("event type", value)
}

pub fn source_type(value: &str) -> Result<(), FieldViolation> {
    if value.len() > SOURCE_TYPE_MAX {
        return Err(violation(
            "source type",
            format!("longer than {SOURCE_TYPE_MAX} characters"),
        ));
    }
    if WORD_DASH.is_match(value) {
        return Ok(());
    }
    violation_err("source type", value)
}

pub fn function_name(value: &str) -> Result<(), FieldViolation> {
    if WORD_DASH.is_match(value) {
        return Ok(());
    }
    violation_err("function", value)
}

fn violation_err(field: &'static str, value: &str) -> Result<(), FieldViolation> {
    Err(violation(
        field,
        format!("{value:?} may only contain letters, numbers, underscores and dashes"),
    ))
}
