//! The seven phase executors of the Magpie pipeline.
//!
//! Each executor implements [`PhaseExecutor`]: it mutates the item record it
//! is handed and returns `Ok` on success. Completion flags and failure
//! bookkeeping belong to the caller; executors never touch them directly
//! (the one exception is categorization's stale-output cascade, which clears
//! downstream flags when a forced re-run changes the category).
//!
//! Executors receive their collaborators at construction, so tests script
//! them with in-crate trait implementations instead of live services.

mod cache;
mod categorize;
mod embed;
mod kb_item;
mod kb_tree;
mod media;
mod prompts;
mod synthesize;
mod sync;

use std::sync::Arc;

use async_trait::async_trait;
use magpie_shared::{CategorizationConfig, DataPaths, ItemRecord, Phase, Result};
use magpie_storage::Registry;

pub use cache::CachePhase;
pub use categorize::CategorizePhase;
pub use embed::EmbedPhase;
pub use kb_item::GenerateKbItemPhase;
pub use kb_tree::{generate_root_index, item_doc_path, synthesis_doc_path, write_text_atomic};
pub use media::InterpretMediaPhase;
pub use synthesize::SynthesizePhase;
pub use sync::{GitSyncTarget, SyncPhase, SyncTarget};

/// One pipeline phase behind a uniform execution seam.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Which phase this executor implements.
    fn phase(&self) -> Phase;

    /// Run the phase against one item record.
    ///
    /// Field mutations made before an `Err` are still persisted by the
    /// caller, so partial progress (downloaded media, sentinel
    /// descriptions) survives a failed attempt.
    async fn execute(&self, record: &mut ItemRecord) -> Result<()>;
}

/// Everything the executors need, bundled for construction.
pub struct PhaseDeps {
    pub paths: DataPaths,
    pub registry: Arc<Registry>,
    pub content: Arc<dyn magpie_fetcher::ContentSource>,
    pub text: Arc<dyn magpie_providers::TextProvider>,
    pub vision: Arc<dyn magpie_providers::VisionProvider>,
    pub embeddings: Arc<dyn magpie_providers::EmbeddingProvider>,
    pub sync_target: Arc<dyn SyncTarget>,
    pub categorization: CategorizationConfig,
}

/// Build the full executor set, one per phase, in declared order.
pub fn build_executors(deps: &PhaseDeps) -> Vec<Arc<dyn PhaseExecutor>> {
    vec![
        Arc::new(CachePhase::new(deps.content.clone(), deps.paths.clone())),
        Arc::new(InterpretMediaPhase::new(deps.vision.clone(), deps.paths.clone())),
        Arc::new(CategorizePhase::new(deps.text.clone(), deps.categorization.clone())),
        Arc::new(GenerateKbItemPhase::new(deps.text.clone(), deps.paths.clone())),
        Arc::new(SynthesizePhase::new(
            deps.text.clone(),
            deps.registry.clone(),
            deps.paths.clone(),
        )),
        Arc::new(EmbedPhase::new(
            deps.embeddings.clone(),
            deps.registry.clone(),
            deps.paths.clone(),
        )),
        Arc::new(SyncPhase::new(
            deps.sync_target.clone(),
            deps.registry.clone(),
            deps.paths.clone(),
        )),
    ]
}
