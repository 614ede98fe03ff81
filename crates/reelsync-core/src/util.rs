//! Helpers shared by config, identity, the façade and the remote clients.

/// Longest remote error excerpt carried into an error message.
const MAX_ERROR_TEXT: usize = 180;

/// Trim optional text, mapping blank input to `None`.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Whether `value` carries an http(s) scheme.
pub fn is_http_url(value: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// Trim a response body or user value down to an error-message excerpt.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(MAX_ERROR_TEXT).collect()
}

/// Wall-clock time as Unix milliseconds, the unit of every record timestamp.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
