//! Knowledge base item generation: one markdown document per item.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use magpie_providers::{GenerationRequest, TextProvider};
use magpie_shared::{DataPaths, ItemRecord, MagpieError, MediaKind, Phase, Result};
use tracing::{debug, instrument};

use crate::cache::is_remote;
use crate::kb_tree::{item_dir, item_doc_path, write_text_atomic};
use crate::prompts::{kb_item_prompt, KB_ITEM_SYSTEM};
use crate::PhaseExecutor;

/// Character budget for the source content fed into document generation.
/// Larger than the categorization budget since the whole thread should
/// usually make it into the article.
const KB_ITEM_PROMPT_CHARS: usize = 24_000;

/// Generates the item's markdown document and copies its media alongside.
///
/// Output lands at `kb/<main>/<sub>/<name>/README.md`: generated body under
/// a small frontmatter block, followed by a deterministic media section
/// that is assembled here rather than by the model.
pub struct GenerateKbItemPhase {
    text: Arc<dyn TextProvider>,
    paths: DataPaths,
}

impl GenerateKbItemPhase {
    pub fn new(text: Arc<dyn TextProvider>, paths: DataPaths) -> Self {
        Self { text, paths }
    }
}

#[async_trait]
impl PhaseExecutor for GenerateKbItemPhase {
    fn phase(&self) -> Phase {
        Phase::GenerateKbItem
    }

    #[instrument(skip_all, fields(id = %record.id))]
    async fn execute(&self, record: &mut ItemRecord) -> Result<()> {
        let Some((main, sub, name)) = record.category() else {
            return Err(MagpieError::validation("kb item generation requires a category"));
        };
        let Some(raw) = record.raw_content.as_ref() else {
            return Err(MagpieError::validation("kb item generation requires cached content"));
        };

        let descriptions: Vec<&str> = record
            .media_items
            .iter()
            .filter_map(|m| m.valid_description())
            .collect();
        let prompt =
            kb_item_prompt(&raw.joined(), &descriptions, main, sub, KB_ITEM_PROMPT_CHARS);
        let request = GenerationRequest::text(prompt).with_system(KB_ITEM_SYSTEM);
        let body = self.text.generate(&request).await?;

        let target_dir = self.paths.kb_dir().join(item_dir(main, sub, name));
        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| MagpieError::io(&target_dir, e))?;

        // Copy cached media next to the document and build its listing.
        let mut media_section = String::new();
        for media in &record.media_items {
            if is_remote(&media.uri) {
                continue;
            }
            let src = self.paths.root.join(&media.uri);
            let Some(file_name) = src.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };
            tokio::fs::copy(&src, target_dir.join(&file_name))
                .await
                .map_err(|e| MagpieError::io(&src, e))?;
            match (media.kind, media.valid_description()) {
                (MediaKind::Image, Some(desc)) => {
                    media_section.push_str(&format!("![{desc}]({file_name})\n\n"));
                }
                (MediaKind::Image, None) => {
                    media_section.push_str(&format!("![{file_name}]({file_name})\n\n"));
                }
                (_, Some(desc)) => {
                    media_section.push_str(&format!("[{file_name}]({file_name})\n\n{desc}\n\n"));
                }
                (_, None) => {
                    media_section.push_str(&format!("[{file_name}]({file_name})\n\n"));
                }
            }
        }

        let mut doc = format!(
            "---\nid: {}\nsource_url: {}\ngenerated_at: {}\n---\n\n{}\n",
            record.id,
            record.source_url,
            Utc::now().to_rfc3339(),
            body.trim()
        );
        if !media_section.is_empty() {
            doc.push_str("\n## Media\n\n");
            doc.push_str(media_section.trim_end());
            doc.push('\n');
        }

        let rel_path = item_doc_path(main, sub, name);
        write_text_atomic(&self.paths.kb_dir().join(&rel_path), &doc).await?;
        debug!(path = %rel_path.display(), "wrote kb item document");

        record.kb_item_path = Some(rel_path.display().to_string());
        Ok(())
    }
}
