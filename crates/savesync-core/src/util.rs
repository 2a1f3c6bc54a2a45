//! Small text and clock helpers shared by config, transports and the CLI.

/// Longest server error body carried into a delivery failure message
const MAX_ERROR_BODY_CHARS: usize = 180;

/// Trim optional text, treating blank values as absent.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Split a comma separated list, dropping blank entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| normalize_text_option(Some(part.to_string())))
        .collect()
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Trimmed, length-capped error body for log and failure messages.
pub fn compact_error_body(body: &str) -> String {
    body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Wall clock as Unix ms; core APIs take `now_ms` explicitly, this is for callers.
pub fn unix_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
