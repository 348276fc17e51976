use subtle::ConstantTimeEq;

/// Header carrying the admin API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Check a presented key against the configured one. No configured key means
/// the API is open.
pub fn is_authorized(expected: Option<&str>, provided: Option<&str>) -> bool {
    match (expected, provided) {
        (None, _) => true,
        (Some(expected), Some(provided)) => constant_time_compare(expected, provided),
        (Some(_), None) => false,
    }
}
