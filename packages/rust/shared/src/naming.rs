//! Filesystem-safe name sanitization for kb tree components.

/// Maximum length of a sanitized name component.
pub const MAX_NAME_LEN: usize = 50;

/// Sanitize a model-supplied name into a kb path component.
///
/// Lowercases, collapses every run of non-alphanumeric characters into a
/// single hyphen, trims hyphens at both ends, and bounds the length. The
/// function is idempotent: `sanitize_name(sanitize_name(s)) == sanitize_name(s)`.
///
/// Returns an empty string when nothing usable remains; callers treat that
/// as a validation failure.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_NAME_LEN));
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(MAX_NAME_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    out
}
