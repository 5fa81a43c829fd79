//! Tweet status id extraction and bookmark deduplication.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Matches a tweet/thread permalink on either domain and captures the
/// numeric status id.
static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:twitter\.com|x\.com)/[^/]+/status/(\d+)").expect("status id regex")
});

/// Extract the status id from a bookmark URL, if it is a tweet permalink.
pub fn extract_status_id(url: &str) -> Option<String> {
    STATUS_RE
        .captures(url)
        .map(|caps| caps[1].to_string())
}

/// Collapse raw bookmark URLs into an id-to-url map.
///
/// The first URL seen for an id wins; later duplicates and entries that are
/// not tweet permalinks are logged and skipped.
pub fn collect_ids<S: AsRef<str>>(urls: &[S]) -> BTreeMap<String, String> {
    let mut items = BTreeMap::new();
    for url in urls {
        let url = url.as_ref();
        let Some(id) = extract_status_id(url) else {
            debug!(%url, "skipping bookmark that is not a tweet permalink");
            continue;
        };
        if let Some(existing) = items.get(&id) {
            debug!(%id, %url, %existing, "skipping duplicate bookmark");
            continue;
        }
        items.insert(id, url.to_string());
    }
    items
}
