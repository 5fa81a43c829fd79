//! Embedding phase: vectorize the generated document for semantic search.

use std::sync::Arc;

use async_trait::async_trait;
use magpie_providers::EmbeddingProvider;
use magpie_shared::{DataPaths, ItemRecord, MagpieError, Phase, Result};
use magpie_storage::Registry;
use tracing::{debug, instrument};

use crate::PhaseExecutor;

/// Embeds the item's kb document and stores the vector in the registry.
pub struct EmbedPhase {
    embeddings: Arc<dyn EmbeddingProvider>,
    registry: Arc<Registry>,
    paths: DataPaths,
}

impl EmbedPhase {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        registry: Arc<Registry>,
        paths: DataPaths,
    ) -> Self {
        Self { embeddings, registry, paths }
    }
}

#[async_trait]
impl PhaseExecutor for EmbedPhase {
    fn phase(&self) -> Phase {
        Phase::Embed
    }

    #[instrument(skip_all, fields(id = %record.id))]
    async fn execute(&self, record: &mut ItemRecord) -> Result<()> {
        let Some(doc_path) = record.kb_item_path.as_deref() else {
            return Err(MagpieError::validation("embedding requires a generated document"));
        };

        let abs = self.paths.kb_dir().join(doc_path);
        let content = tokio::fs::read_to_string(&abs)
            .await
            .map_err(|e| MagpieError::io(&abs, e))?;

        let vectors = self.embeddings.embed(&[content]).await?;
        let Some(vector) = vectors.into_iter().next().filter(|v| !v.is_empty()) else {
            return Err(MagpieError::Provider(
                "embedding provider returned no vector".into(),
            ));
        };

        self.registry
            .upsert_embedding(&record.id, self.embeddings.model_name(), &vector)
            .await?;
        debug!(dims = vector.len(), "stored document embedding");
        Ok(())
    }
}
