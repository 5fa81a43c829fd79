//! Bookmark discovery and tweet content fetching.
//!
//! The browser-automation scraper runs as a companion service; this crate
//! consumes its two HTTP endpoints behind narrow traits so the pipeline
//! never sees browser mechanics:
//! - [`BookmarkSource`]: `GET /api/bookmarks`, the user's bookmarked URLs
//! - [`ContentSource`]: `GET /api/tweet/{id}`, one tweet/thread's text and
//!   media descriptors, plus plain downloads of the media bytes
//!
//! An unreachable or unconfigured service degrades discovery to an empty
//! result with a warning; it never fails a run.

mod ids;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use magpie_shared::{MagpieError, MediaKind, Result, ScraperConfig};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use ids::{collect_ids, extract_status_id};

/// Default timeout in seconds for scraper requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("Magpie/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One tweet or thread as reported by the scraper service.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchedItem {
    /// Ordered post texts; a single tweet arrives as one segment.
    #[serde(rename = "text")]
    pub text_segments: Vec<String>,
    /// Media descriptors with remote URLs.
    #[serde(default)]
    pub media: Vec<FetchedMedia>,
}

/// One media descriptor from the scraper service.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchedMedia {
    pub kind: MediaKind,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct BookmarksResponse {
    bookmarks: Vec<String>,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Source of the user's bookmarked URLs.
#[async_trait]
pub trait BookmarkSource: Send + Sync {
    /// All bookmark URLs, unfiltered. Order is the service's order.
    async fn discover_bookmark_urls(&self) -> Result<Vec<String>>;
}

/// Source of per-item content and media bytes.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch one tweet/thread by status id.
    async fn fetch_item(&self, id: &str) -> Result<FetchedItem>;

    /// Download media bytes from an absolute URL into `dest`.
    async fn download_media(&self, url: &str, dest: &Path) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Discover new items from the bookmark collaborator.
///
/// Returns an id-to-source-url map; first-seen URL wins for duplicate ids,
/// non-permalink entries are skipped. An unavailable collaborator yields an
/// empty map with a warning so runs can proceed with known items.
#[instrument(skip_all)]
pub async fn discover_items(source: &dyn BookmarkSource) -> BTreeMap<String, String> {
    let urls = match source.discover_bookmark_urls().await {
        Ok(urls) => urls,
        Err(e) => {
            warn!(error = %e, "bookmark source unavailable, continuing with known items");
            return BTreeMap::new();
        }
    };

    let items = collect_ids(&urls);
    info!(
        bookmarks = urls.len(),
        items = items.len(),
        "bookmark discovery complete"
    );
    items
}

// ---------------------------------------------------------------------------
// ScraperClient
// ---------------------------------------------------------------------------

/// HTTP client for the scraper companion service.
pub struct ScraperClient {
    base_url: String,
    client: Client,
}

impl ScraperClient {
    /// Build a client against a base URL.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| {
            MagpieError::config(format!("invalid scraper base_url '{base_url}': {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(MagpieError::config(format!(
                "scraper base_url must be http(s): '{base_url}'"
            )));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| MagpieError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Build a client from config, or `None` when no base URL is set.
    pub fn from_config(config: &ScraperConfig) -> Result<Option<Self>> {
        match &config.base_url {
            Some(base_url) => Ok(Some(Self::new(base_url, config.timeout_secs)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BookmarkSource for ScraperClient {
    async fn discover_bookmark_urls(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/bookmarks", self.base_url);
        debug!(%url, "fetching bookmarks");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MagpieError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MagpieError::Network(format!("{url}: HTTP {status}")));
        }

        let body: BookmarksResponse = response
            .json()
            .await
            .map_err(|e| MagpieError::parse(format!("{url}: invalid bookmarks payload: {e}")))?;
        Ok(body.bookmarks)
    }
}

#[async_trait]
impl ContentSource for ScraperClient {
    async fn fetch_item(&self, id: &str) -> Result<FetchedItem> {
        let url = format!("{}/api/tweet/{id}", self.base_url);
        debug!(%url, "fetching tweet content");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MagpieError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MagpieError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| MagpieError::parse(format!("{url}: invalid tweet payload: {e}")))
    }

    async fn download_media(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MagpieError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MagpieError::Network(format!("{url}: HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MagpieError::Network(format!("{url}: failed to read body: {e}")))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MagpieError::io(parent, e))?;
        }
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| MagpieError::io(dest, e))?;

        debug!(%url, dest = %dest.display(), bytes = bytes.len(), "media downloaded");
        Ok(())
    }
}
