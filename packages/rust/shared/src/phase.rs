//! Pipeline phases and run preferences.
//!
//! Phase ordering and prerequisites are declared as data on [`Phase`] so the
//! orchestrator never encodes dependency knowledge in control flow. Adding a
//! phase means adding a variant and its table entries.

use serde::{Deserialize, Serialize};

use crate::types::ItemRecord;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One transformation step in the per-item pipeline, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Cache,
    InterpretMedia,
    Categorize,
    GenerateKbItem,
    Synthesize,
    Embed,
    Sync,
}

impl Phase {
    /// Every phase, in execution order.
    pub const ALL: [Phase; 7] = [
        Phase::Cache,
        Phase::InterpretMedia,
        Phase::Categorize,
        Phase::GenerateKbItem,
        Phase::Synthesize,
        Phase::Embed,
        Phase::Sync,
    ];

    /// Human-readable name, used in logs, failure records, and summaries.
    pub fn display_name(self) -> &'static str {
        match self {
            Phase::Cache => "Caching",
            Phase::InterpretMedia => "MediaInterpretation",
            Phase::Categorize => "Categorization",
            Phase::GenerateKbItem => "KbItemGeneration",
            Phase::Synthesize => "Synthesis",
            Phase::Embed => "Embedding",
            Phase::Sync => "RepositorySync",
        }
    }

    /// Short identifier accepted on the command line.
    pub fn slug(self) -> &'static str {
        match self {
            Phase::Cache => "cache",
            Phase::InterpretMedia => "interpret-media",
            Phase::Categorize => "categorize",
            Phase::GenerateKbItem => "generate-kb-item",
            Phase::Synthesize => "synthesize",
            Phase::Embed => "embed",
            Phase::Sync => "sync",
        }
    }

    /// Phases whose completion flags must be true before this one may run.
    ///
    /// The media-conditional rule for [`Phase::Categorize`] lives in
    /// [`Phase::prerequisites_met`], not here.
    pub fn requires(self) -> &'static [Phase] {
        match self {
            Phase::Cache => &[],
            Phase::InterpretMedia => &[Phase::Cache],
            Phase::Categorize => &[Phase::Cache],
            Phase::GenerateKbItem => &[Phase::Categorize],
            Phase::Synthesize => &[Phase::GenerateKbItem],
            Phase::Embed => &[Phase::GenerateKbItem],
            Phase::Sync => &[Phase::GenerateKbItem],
        }
    }

    /// Whether this phase is meaningful for the record at all.
    ///
    /// Media interpretation is skipped outright for items without media.
    pub fn applies_to(self, record: &ItemRecord) -> bool {
        match self {
            Phase::InterpretMedia => record.has_media(),
            _ => true,
        }
    }

    /// The record's completion flag for this phase.
    pub fn is_done(self, record: &ItemRecord) -> bool {
        match self {
            Phase::Cache => record.cached,
            Phase::InterpretMedia => record.media_processed,
            Phase::Categorize => record.categorized,
            Phase::GenerateKbItem => record.kb_item_generated,
            Phase::Synthesize => record.synthesized,
            Phase::Embed => record.embedded,
            Phase::Sync => record.synced,
        }
    }

    /// Set the record's completion flag for this phase.
    pub fn mark_done(self, record: &mut ItemRecord) {
        match self {
            Phase::Cache => record.cached = true,
            Phase::InterpretMedia => record.media_processed = true,
            Phase::Categorize => record.categorized = true,
            Phase::GenerateKbItem => record.kb_item_generated = true,
            Phase::Synthesize => record.synthesized = true,
            Phase::Embed => record.embedded = true,
            Phase::Sync => record.synced = true,
        }
    }

    /// Whether every prerequisite flag is satisfied on this record.
    ///
    /// Categorization additionally requires `media_processed` when the record
    /// carries media; text-only items categorize straight from the cache.
    pub fn prerequisites_met(self, record: &ItemRecord) -> bool {
        if !self.requires().iter().all(|p| p.is_done(record)) {
            return false;
        }
        match self {
            Phase::Categorize => !record.has_media() || record.media_processed,
            _ => true,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    /// Accepts both the CLI slug and the display name, case-insensitively.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Phase::ALL
            .into_iter()
            .find(|p| {
                p.slug() == needle || p.display_name().to_ascii_lowercase() == needle
            })
            .ok_or_else(|| format!("unknown phase: {s}"))
    }
}

// ---------------------------------------------------------------------------
// RunPrefs
// ---------------------------------------------------------------------------

/// Per-run preferences, read once at run start and applied uniformly.
#[derive(Debug, Clone, Default)]
pub struct RunPrefs {
    /// Do not contact the bookmark collaborator; process known items only.
    pub skip_fetch: bool,
    /// Re-run categorization even on already-categorized items.
    pub force_recategorize: bool,
    /// Re-run media interpretation even where descriptions exist.
    pub force_reinterpret_media: bool,
    /// When set, only these phases are considered.
    pub only_phases: Option<std::collections::BTreeSet<Phase>>,
    /// Phases excluded from this run.
    pub skip_phases: std::collections::BTreeSet<Phase>,
}

impl RunPrefs {
    /// Whether preferences allow this phase to run at all.
    pub fn allows(&self, phase: Phase) -> bool {
        if self.skip_phases.contains(&phase) {
            return false;
        }
        match &self.only_phases {
            Some(only) => only.contains(&phase),
            None => true,
        }
    }

    /// Whether the force preference for this phase is set.
    pub fn forces(&self, phase: Phase) -> bool {
        match phase {
            Phase::Categorize => self.force_recategorize,
            Phase::InterpretMedia => self.force_reinterpret_media,
            _ => false,
        }
    }
}
