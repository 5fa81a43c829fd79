//! Caching phase: fetch the full thread and mirror its media locally.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use magpie_fetcher::ContentSource;
use magpie_shared::{DataPaths, ItemRecord, MediaItem, Phase, RawContent, Result};
use tracing::{debug, instrument};

use crate::PhaseExecutor;

/// Fetches an item's thread text and downloads its media into the cache.
///
/// Media URIs on the record are rewritten from the remote URL to a path
/// relative to the data root (`cache/<id>/media_<n>.<ext>`) as each download
/// lands, so a partially failed attempt resumes without re-downloading.
pub struct CachePhase {
    content: Arc<dyn ContentSource>,
    paths: DataPaths,
}

impl CachePhase {
    pub fn new(content: Arc<dyn ContentSource>, paths: DataPaths) -> Self {
        Self { content, paths }
    }
}

#[async_trait]
impl PhaseExecutor for CachePhase {
    fn phase(&self) -> Phase {
        Phase::Cache
    }

    #[instrument(skip_all, fields(id = %record.id))]
    async fn execute(&self, record: &mut ItemRecord) -> Result<()> {
        // Fetch once. A re-attempt after a partial media failure keeps the
        // existing media list so finished downloads are not repeated.
        if record.raw_content.is_none() {
            let fetched = self.content.fetch_item(&record.id).await?;
            debug!(segments = fetched.text_segments.len(), media = fetched.media.len(), "fetched item");
            record.raw_content = Some(RawContent {
                text_segments: fetched.text_segments,
                fetched_at: Utc::now(),
            });
            if record.media_items.is_empty() {
                record.media_items = fetched
                    .media
                    .into_iter()
                    .map(|m| MediaItem {
                        kind: m.kind,
                        uri: m.url,
                        description: None,
                    })
                    .collect();
            }
        }

        let item_cache = self.paths.cache_dir().join(&record.id);
        for idx in 0..record.media_items.len() {
            let uri = record.media_items[idx].uri.clone();
            if !is_remote(&uri) {
                continue;
            }
            let file_name = format!("media_{idx}.{}", media_extension(&uri));
            self.content.download_media(&uri, &item_cache.join(&file_name)).await?;
            let local = PathBuf::from("cache").join(&record.id).join(&file_name);
            record.media_items[idx].uri = local.display().to_string();
            debug!(uri = %record.media_items[idx].uri, "mirrored media");
        }

        Ok(())
    }
}

/// Whether a media uri still points at its remote origin.
pub(crate) fn is_remote(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// File extension from a media URL's path, ignoring query and fragment.
fn media_extension(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 4 => ext,
        _ => "bin",
    }
}
