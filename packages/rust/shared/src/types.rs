//! Core domain types for the Magpie pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::phase::Phase;

/// Current schema version for persisted item records.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Description stored on a media item whose interpretation failed.
///
/// Treated as "no description yet": re-runs of the media phase retry these,
/// and categorization never feeds them into prompts.
pub const FAILED_MEDIA_DESCRIPTION: &str = "[media interpretation failed]";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Kind of media attached to a source item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Gif,
    /// Anything the scraper service reports that we do not model.
    #[serde(other)]
    Unknown,
}

/// One media attachment on a source item.
///
/// `uri` starts as the remote URL reported at fetch time and is rewritten to
/// a cache-relative path once the bytes are downloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub uri: String,
    /// Vision-model description, populated by the media phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MediaItem {
    /// Whether this item still needs a vision pass.
    ///
    /// Only images are interpreted; a present, non-sentinel description
    /// counts as done.
    pub fn needs_interpretation(&self) -> bool {
        self.kind == MediaKind::Image
            && !matches!(&self.description, Some(d) if d != FAILED_MEDIA_DESCRIPTION)
    }

    /// The description, if one was successfully produced.
    pub fn valid_description(&self) -> Option<&str> {
        match self.description.as_deref() {
            Some(FAILED_MEDIA_DESCRIPTION) | None => None,
            Some(d) => Some(d),
        }
    }
}

// ---------------------------------------------------------------------------
// RawContent
// ---------------------------------------------------------------------------

/// Text content captured during the caching phase.
///
/// A thread is stored as ordered segments, one per post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawContent {
    pub text_segments: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl RawContent {
    /// All segments joined for prompt assembly.
    pub fn joined(&self) -> String {
        self.text_segments.join("\n\n")
    }
}

// ---------------------------------------------------------------------------
// ItemRecord
// ---------------------------------------------------------------------------

/// Per-source-item pipeline state, persisted as one registry row.
///
/// Phase flags are monotonic: once true they stay true unless an explicit
/// force preference (or a category change under force) resets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Stable external identifier (tweet status id). Immutable.
    pub id: String,
    /// Origin URL, set at discovery. Immutable.
    pub source_url: String,

    /// Text content, present once cached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<RawContent>,
    /// Ordered media attachments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_items: Vec<MediaItem>,

    // Phase completion flags.
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub media_processed: bool,
    #[serde(default)]
    pub categorized: bool,
    #[serde(default)]
    pub kb_item_generated: bool,
    #[serde(default)]
    pub synthesized: bool,
    #[serde(default)]
    pub embedded: bool,
    #[serde(default)]
    pub synced: bool,

    /// Populated together once categorization succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    /// Filesystem-safe name (lowercase, hyphen-separated, bounded length).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,

    /// Relative path of the generated document within the kb tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kb_item_path: Option<String>,

    /// Name of the phase whose last attempt failed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemRecord {
    /// Fresh record for a newly discovered item, all flags false.
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source_url: source_url.into(),
            raw_content: None,
            media_items: Vec::new(),
            cached: false,
            media_processed: false,
            categorized: false,
            kb_item_generated: false,
            synthesized: false,
            embedded: false,
            synced: false,
            main_category: None,
            sub_category: None,
            item_name: None,
            kb_item_path: None,
            failed_phase: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether any media is attached.
    pub fn has_media(&self) -> bool {
        !self.media_items.is_empty()
    }

    /// The category triple, once categorized.
    pub fn category(&self) -> Option<(&str, &str, &str)> {
        match (
            self.main_category.as_deref(),
            self.sub_category.as_deref(),
            self.item_name.as_deref(),
        ) {
            (Some(main), Some(sub), Some(name)) => Some((main, sub, name)),
            _ => None,
        }
    }

    /// Record a failed phase attempt.
    pub fn record_failure(&mut self, phase: Phase, message: impl Into<String>) {
        self.failed_phase = Some(phase.display_name().to_string());
        self.error_message = Some(message.into());
    }

    /// Clear failure state after a successful attempt of the same phase.
    pub fn clear_failure(&mut self, phase: Phase) {
        if self.failed_phase.as_deref() == Some(phase.display_name()) {
            self.failed_phase = None;
            self.error_message = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn new_record_has_no_progress() {
        let record = ItemRecord::new("1234567890", "https://x.com/rustlang/status/1234567890");
        assert!(!record.cached);
        assert!(!record.synced);
        assert!(record.raw_content.is_none());
        assert!(record.category().is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn record_serialization_roundtrip() {
        let mut record = ItemRecord::new("42", "https://x.com/u/status/42");
        record.cached = true;
        record.raw_content = Some(RawContent {
            text_segments: vec!["first post".into(), "second post".into()],
            fetched_at: Utc::now(),
        });
        record.media_items.push(MediaItem {
            kind: MediaKind::Image,
            uri: "cache/42/media_0.jpg".into(),
            description: Some("a chart".into()),
        });

        let json = serde_json::to_string(&record).expect("serialize");
        let parsed: ItemRecord = serde_json::from_str(&json).expect("deserialize");
        assert!(parsed.cached);
        assert_eq!(parsed.media_items.len(), 1);
        assert_eq!(parsed.raw_content.expect("content").text_segments.len(), 2);
    }

    #[test]
    fn unknown_media_kind_deserializes() {
        let json = r#"{"kind":"hologram","uri":"https://example.com/m"}"#;
        let item: MediaItem = serde_json::from_str(json).expect("deserialize");
        assert_eq!(item.kind, MediaKind::Unknown);
        assert!(!item.needs_interpretation());
    }

    #[test]
    fn sentinel_description_still_needs_interpretation() {
        let item = MediaItem {
            kind: MediaKind::Image,
            uri: "cache/1/media_0.jpg".into(),
            description: Some(FAILED_MEDIA_DESCRIPTION.into()),
        };
        assert!(item.needs_interpretation());
        assert!(item.valid_description().is_none());

        let done = MediaItem {
            description: Some("a terminal screenshot".into()),
            ..item.clone()
        };
        assert!(!done.needs_interpretation());
        assert_eq!(done.valid_description(), Some("a terminal screenshot"));
    }

    #[test]
    fn videos_are_never_pending() {
        let item = MediaItem {
            kind: MediaKind::Video,
            uri: "cache/1/media_0.mp4".into(),
            description: None,
        };
        assert!(!item.needs_interpretation());
    }

    #[test]
    fn failure_bookkeeping() {
        let mut record = ItemRecord::new("7", "https://x.com/u/status/7");
        record.record_failure(Phase::Categorize, "model returned non-JSON");
        assert_eq!(record.failed_phase.as_deref(), Some("Categorization"));

        // A different phase succeeding does not clear it.
        record.clear_failure(Phase::Cache);
        assert!(record.failed_phase.is_some());

        record.clear_failure(Phase::Categorize);
        assert!(record.failed_phase.is_none());
        assert!(record.error_message.is_none());
    }
}
