//! Media interpretation phase: describe cached images with the vision model.

use std::sync::Arc;

use async_trait::async_trait;
use magpie_providers::VisionProvider;
use magpie_shared::{
    DataPaths, ItemRecord, MagpieError, MediaKind, Phase, Result, FAILED_MEDIA_DESCRIPTION,
};
use tracing::{debug, instrument, warn};

use crate::prompts::MEDIA_PROMPT;
use crate::PhaseExecutor;

/// Runs each pending image through the vision model.
///
/// An individual failure stores the sentinel description and moves on; the
/// phase itself fails only when every attempted image fails, which usually
/// means the provider is down. Re-runs pick up exactly the absent and
/// sentinel descriptions.
pub struct InterpretMediaPhase {
    vision: Arc<dyn VisionProvider>,
    paths: DataPaths,
}

impl InterpretMediaPhase {
    pub fn new(vision: Arc<dyn VisionProvider>, paths: DataPaths) -> Self {
        Self { vision, paths }
    }
}

#[async_trait]
impl PhaseExecutor for InterpretMediaPhase {
    fn phase(&self) -> Phase {
        Phase::InterpretMedia
    }

    #[instrument(skip_all, fields(id = %record.id))]
    async fn execute(&self, record: &mut ItemRecord) -> Result<()> {
        // Being scheduled with the flag already set means a forced redo:
        // drop the old descriptions so every image goes through again.
        if record.media_processed {
            for media in &mut record.media_items {
                if media.kind == MediaKind::Image {
                    media.description = None;
                }
            }
        }

        let mut attempted = 0u32;
        let mut succeeded = 0u32;
        let mut last_error = String::new();

        for idx in 0..record.media_items.len() {
            if !record.media_items[idx].needs_interpretation() {
                continue;
            }
            attempted += 1;
            let path = self.paths.root.join(&record.media_items[idx].uri);
            match self.vision.describe(MEDIA_PROMPT, &path).await {
                Ok(description) => {
                    record.media_items[idx].description = Some(description);
                    succeeded += 1;
                }
                Err(e) => {
                    warn!(media = idx, error = %e, "media interpretation failed");
                    record.media_items[idx].description =
                        Some(FAILED_MEDIA_DESCRIPTION.to_string());
                    last_error = e.to_string();
                }
            }
        }

        if attempted > 0 && succeeded == 0 {
            return Err(MagpieError::Provider(format!(
                "all {attempted} media descriptions failed (last error: {last_error})"
            )));
        }
        debug!(attempted, succeeded, "media interpretation complete");
        Ok(())
    }
}
