pub mod dataset;
pub mod job;
pub mod query;
pub mod session;
pub mod upload;

/// Longest identifier accepted from the backend or a caller.
pub(crate) const MAX_IDENTIFIER_LEN: usize = 128;

/// Identifiers travel as URL path segments, so only `[A-Za-z0-9._-]` is
/// accepted and dot-only values (`.`, `..`) are refused.
pub(crate) fn identifier_problem(raw: &str) -> Option<&'static str> {
    if raw.is_empty() {
        return Some("empty");
    }
    if raw.len() > MAX_IDENTIFIER_LEN {
        return Some("too long");
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Some("contains characters outside [A-Za-z0-9._-]");
    }
    if raw.chars().all(|c| c == '.') {
        return Some("is a relative path segment");
    }
    None
}
