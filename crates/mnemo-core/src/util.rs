//! Shared utility functions used across multiple modules.

use crate::error::{Error, Result};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Validate a base URL and strip trailing slashes.
pub fn normalize_endpoint(raw: impl Into<String>) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw.into()))
        .ok_or_else(|| Error::InvalidInput("endpoint must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(format!(
            "endpoint '{endpoint}' must include http:// or https://"
        )))
    }
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert fractional epoch seconds to Unix ms. Non-positive values map to the
/// epoch.
#[allow(clippy::cast_possible_truncation)]
pub fn epoch_seconds_to_millis(seconds: f64) -> i64 {
    if seconds.is_nan() || seconds <= 0.0 {
        return 0;
    }
    (seconds * 1000.0).round() as i64
}

/// Convert Unix ms to fractional epoch seconds.
#[allow(clippy::cast_precision_loss)]
pub fn millis_to_epoch_seconds(millis: i64) -> f64 {
    millis as f64 / 1000.0
}
