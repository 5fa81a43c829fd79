//! Synthesis phase: one consolidated overview per category group.
//!
//! Operates on the full `(main_category, sub_category)` group rather than a
//! single item. The document is recomputed from the complete current member
//! set every time, never patched incrementally, so a group is either fully
//! re-synthesized or untouched. A fingerprint over the member documents makes
//! the recompute cheap to skip when nothing changed.

use std::sync::Arc;

use async_trait::async_trait;
use magpie_providers::{GenerationRequest, TextProvider};
use magpie_shared::{DataPaths, ItemRecord, MagpieError, Phase, Result};
use magpie_storage::Registry;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::kb_tree::{synthesis_doc_path, write_text_atomic};
use crate::prompts::{synthesis_prompt, SYNTHESIS_SYSTEM};
use crate::PhaseExecutor;

/// Per-member character budget when feeding documents into the prompt.
const SYNTHESIS_DOC_CHARS: usize = 8_000;

/// Writes `kb/<main>/<sub>/_synthesis.md` from a group's generated items.
pub struct SynthesizePhase {
    text: Arc<dyn TextProvider>,
    registry: Arc<Registry>,
    paths: DataPaths,
}

impl SynthesizePhase {
    pub fn new(text: Arc<dyn TextProvider>, registry: Arc<Registry>, paths: DataPaths) -> Self {
        Self { text, registry, paths }
    }
}

#[async_trait]
impl PhaseExecutor for SynthesizePhase {
    fn phase(&self) -> Phase {
        Phase::Synthesize
    }

    #[instrument(skip_all, fields(id = %record.id))]
    async fn execute(&self, record: &mut ItemRecord) -> Result<()> {
        let (main, sub) = match record.category() {
            Some((main, sub, _)) => (main.to_string(), sub.to_string()),
            None => return Err(MagpieError::validation("synthesis requires a category")),
        };

        let mut members = self.registry.list_items_by_subcategory(&main, &sub).await?;
        let ready = members.iter().filter(|m| m.kb_item_generated).count();
        if ready < members.len() {
            return Err(MagpieError::validation(format!(
                "group {main}/{sub} not ready: {ready} of {} items have documents",
                members.len()
            )));
        }

        // Fingerprint over sorted member ids and their document contents.
        members.sort_by(|a, b| a.id.cmp(&b.id));
        let mut hasher = Sha256::new();
        let mut docs = Vec::with_capacity(members.len());
        for member in &members {
            let Some(doc_path) = member.kb_item_path.as_deref() else {
                return Err(MagpieError::validation(format!(
                    "item {} is marked generated but has no document path",
                    member.id
                )));
            };
            let abs = self.paths.kb_dir().join(doc_path);
            let content = tokio::fs::read_to_string(&abs)
                .await
                .map_err(|e| MagpieError::io(&abs, e))?;
            hasher.update(member.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(Sha256::digest(content.as_bytes()));
            let name = member.item_name.clone().unwrap_or_else(|| member.id.clone());
            docs.push((name, content));
        }
        let fingerprint = format!("{:x}", hasher.finalize());

        let rel_path = synthesis_doc_path(&main, &sub);
        let abs_path = self.paths.kb_dir().join(&rel_path);
        let stored = self.registry.get_synthesis(&main, &sub).await?;
        if stored.is_some_and(|s| s.fingerprint == fingerprint) && abs_path.exists() {
            debug!(main = %main, sub = %sub, "synthesis up to date");
            return Ok(());
        }

        let prompt = synthesis_prompt(&main, &sub, &docs, SYNTHESIS_DOC_CHARS);
        let request = GenerationRequest::text(prompt).with_system(SYNTHESIS_SYSTEM);
        let body = self.text.generate(&request).await?;

        write_text_atomic(&abs_path, &format!("{}\n", body.trim())).await?;
        self.registry
            .upsert_synthesis(&main, &sub, &fingerprint, &rel_path.display().to_string())
            .await?;
        info!(main = %main, sub = %sub, members = members.len(), "synthesized category group");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::kb_tree::item_doc_path;

    struct CountingText {
        body: String,
        calls: Mutex<u32>,
    }

    impl CountingText {
        fn new(body: &str) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_string(),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("lock")
        }
    }

    #[async_trait]
    impl TextProvider for CountingText {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            *self.calls.lock().expect("lock") += 1;
            Ok(self.body.clone())
        }
    }

    async fn setup() -> (DataPaths, Arc<Registry>) {
        let paths = DataPaths {
            root: std::env::temp_dir().join(format!("magpie_synth_test_{}", uuid::Uuid::now_v7())),
        };
        let registry = Registry::open(&paths.db_path()).await.expect("open registry");
        (paths, Arc::new(registry))
    }

    async fn seed_member(
        paths: &DataPaths,
        registry: &Registry,
        id: &str,
        name: &str,
        body: &str,
        generated: bool,
    ) -> ItemRecord {
        let mut record = ItemRecord::new(id, format!("https://x.com/u/status/{id}"));
        record.cached = true;
        record.categorized = true;
        record.main_category = Some("rust".into());
        record.sub_category = Some("async-programming".into());
        record.item_name = Some(name.into());
        if generated {
            let rel = item_doc_path("rust", "async-programming", name);
            write_text_atomic(&paths.kb_dir().join(&rel), body).await.expect("write doc");
            record.kb_item_generated = true;
            record.kb_item_path = Some(rel.display().to_string());
        }
        registry.upsert_item(&record).await.expect("upsert");
        record
    }

    #[tokio::test]
    async fn synthesizes_a_ready_group() {
        let (paths, registry) = setup().await;
        let text = CountingText::new("# Async Programming Overview\n\nTwo articles.");
        let phase = SynthesizePhase::new(text.clone(), registry.clone(), paths.clone());

        let mut record =
            seed_member(&paths, &registry, "1", "select-pitfalls", "# Select\n", true).await;
        seed_member(&paths, &registry, "2", "async-io-tips", "# IO\n", true).await;

        phase.execute(&mut record).await.expect("synthesize");

        let doc = std::fs::read_to_string(
            paths.kb_dir().join("rust/async-programming/_synthesis.md"),
        )
        .expect("read synthesis");
        assert!(doc.contains("Async Programming Overview"));
        assert_eq!(text.calls(), 1);

        let stored = registry
            .get_synthesis("rust", "async-programming")
            .await
            .expect("get")
            .expect("present");
        assert!(!stored.fingerprint.is_empty());
        assert_eq!(stored.doc_path, "rust/async-programming/_synthesis.md");

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn unchanged_group_skips_regeneration() {
        let (paths, registry) = setup().await;
        let text = CountingText::new("# Overview");
        let phase = SynthesizePhase::new(text.clone(), registry.clone(), paths.clone());

        let mut first =
            seed_member(&paths, &registry, "1", "select-pitfalls", "# Select\n", true).await;
        let mut second =
            seed_member(&paths, &registry, "2", "async-io-tips", "# IO\n", true).await;

        phase.execute(&mut first).await.expect("first synthesis");
        // The second member arrives at the phase later; the group is unchanged.
        phase.execute(&mut second).await.expect("second synthesis");

        assert_eq!(text.calls(), 1);

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn changed_member_document_regenerates() {
        let (paths, registry) = setup().await;
        let text = CountingText::new("# Overview");
        let phase = SynthesizePhase::new(text.clone(), registry.clone(), paths.clone());

        let mut record =
            seed_member(&paths, &registry, "1", "select-pitfalls", "# Select v1\n", true).await;
        phase.execute(&mut record).await.expect("first synthesis");

        // The member's document changes, e.g. after a forced regeneration.
        let doc_path = paths
            .kb_dir()
            .join(item_doc_path("rust", "async-programming", "select-pitfalls"));
        write_text_atomic(&doc_path, "# Select v2\n").await.expect("rewrite");

        phase.execute(&mut record).await.expect("second synthesis");
        assert_eq!(text.calls(), 2);

        std::fs::remove_dir_all(&paths.root).ok();
    }

    #[tokio::test]
    async fn group_with_ungenerated_member_fails() {
        let (paths, registry) = setup().await;
        let text = CountingText::new("# Overview");
        let phase = SynthesizePhase::new(text.clone(), registry.clone(), paths.clone());

        let mut record =
            seed_member(&paths, &registry, "1", "select-pitfalls", "# Select\n", true).await;
        seed_member(&paths, &registry, "2", "async-io-tips", "", false).await;

        let err = phase.execute(&mut record).await.expect_err("group not ready");
        assert!(err.to_string().contains("1 of 2"));
        assert_eq!(text.calls(), 0);

        std::fs::remove_dir_all(&paths.root).ok();
    }
}
