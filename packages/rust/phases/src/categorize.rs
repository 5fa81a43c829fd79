//! Categorization phase: the strict JSON contract with the text model.
//!
//! The model is a non-deterministic collaborator treated as a typed
//! function: the response must be a single JSON object with exactly the
//! three expected keys. Parsing is strict about structure and lenient only
//! about benign drift (key casing, formatting inside the values, which
//! sanitization normalizes). Anything else fails the phase; there is no
//! placeholder fallback.

use std::sync::Arc;

use async_trait::async_trait;
use magpie_providers::{GenerationRequest, TextProvider};
use magpie_shared::{
    sanitize_name, CategorizationConfig, ItemRecord, MagpieError, Phase, Result,
};
use tracing::{debug, info, instrument};

use crate::prompts::{categorization_prompt, CATEGORIZE_SYSTEM};
use crate::PhaseExecutor;

/// Assigns the `(main_category, sub_category, item_name)` triple.
pub struct CategorizePhase {
    text: Arc<dyn TextProvider>,
    config: CategorizationConfig,
}

impl CategorizePhase {
    pub fn new(text: Arc<dyn TextProvider>, config: CategorizationConfig) -> Self {
        Self { text, config }
    }
}

#[async_trait]
impl PhaseExecutor for CategorizePhase {
    fn phase(&self) -> Phase {
        Phase::Categorize
    }

    #[instrument(skip_all, fields(id = %record.id))]
    async fn execute(&self, record: &mut ItemRecord) -> Result<()> {
        let Some(raw) = record.raw_content.as_ref() else {
            return Err(MagpieError::validation("categorization requires cached content"));
        };

        let descriptions: Vec<&str> = record
            .media_items
            .iter()
            .filter_map(|m| m.valid_description())
            .collect();
        if record.has_media() && descriptions.is_empty() {
            debug!("no valid media descriptions, categorizing on text alone");
        }

        let prompt =
            categorization_prompt(&raw.joined(), &descriptions, self.config.max_prompt_chars);
        let request = GenerationRequest::json(prompt).with_system(CATEGORIZE_SYSTEM);
        let response = self.text.generate(&request).await?;

        let (main, sub, name) = parse_category_response(&response)?;

        // A forced re-run that lands on a different triple makes every
        // derived output stale: document path, synthesis, embedding, sync.
        if record.categorized
            && record.category() != Some((main.as_str(), sub.as_str(), name.as_str()))
        {
            info!(
                main = %main,
                sub = %sub,
                name = %name,
                "category changed on re-run, clearing downstream outputs"
            );
            record.kb_item_generated = false;
            record.synthesized = false;
            record.embedded = false;
            record.synced = false;
            record.kb_item_path = None;
        }

        record.main_category = Some(main);
        record.sub_category = Some(sub);
        record.item_name = Some(name);
        Ok(())
    }
}

/// Parse and sanitize the model's categorization response.
fn parse_category_response(response: &str) -> Result<(String, String, String)> {
    let value: serde_json::Value = serde_json::from_str(response.trim())
        .map_err(|_| MagpieError::parse("model response is not valid JSON"))?;
    let Some(object) = value.as_object() else {
        return Err(MagpieError::parse("model response is not a JSON object"));
    };

    // Case-insensitive key lookup; a present key with a non-string value is
    // as unusable as an absent one.
    let lookup = |key: &str| -> Option<&str> {
        object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_str())
    };

    let main = lookup("main_category");
    let sub = lookup("sub_category");
    let name = lookup("item_name");

    let (Some(main), Some(sub), Some(name)) = (main, sub, name) else {
        let mut missing = Vec::new();
        if main.is_none() {
            missing.push("main_category");
        }
        if sub.is_none() {
            missing.push("sub_category");
        }
        if name.is_none() {
            missing.push("item_name");
        }
        return Err(MagpieError::parse(format!(
            "model response missing keys: {}",
            missing.join(", ")
        )));
    };

    let triple =
        [("main_category", main), ("sub_category", sub), ("item_name", name)]
            .map(|(field, value)| (field, sanitize_name(value)));
    for (field, value) in &triple {
        if value.is_empty() {
            return Err(MagpieError::validation(format!(
                "{field} is empty after sanitization"
            )));
        }
    }
    let [(_, main), (_, sub), (_, name)] = triple;
    Ok((main, sub, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use magpie_shared::{MediaItem, MediaKind, RawContent, FAILED_MEDIA_DESCRIPTION};

    struct ScriptedText {
        response: String,
        last_request: Mutex<Option<GenerationRequest>>,
    }

    impl ScriptedText {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                last_request: Mutex::new(None),
            })
        }

        fn last_request(&self) -> GenerationRequest {
            self.last_request
                .lock()
                .expect("lock")
                .clone()
                .expect("a request was made")
        }
    }

    #[async_trait]
    impl TextProvider for ScriptedText {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            *self.last_request.lock().expect("lock") = Some(request.clone());
            Ok(self.response.clone())
        }
    }

    struct Unavailable;

    #[async_trait]
    impl TextProvider for Unavailable {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            Err(MagpieError::Provider("ollama unreachable".into()))
        }
    }

    fn cached_record(text: &str) -> ItemRecord {
        let mut record = ItemRecord::new("100", "https://x.com/u/status/100");
        record.cached = true;
        record.raw_content = Some(RawContent {
            text_segments: vec![text.into()],
            fetched_at: Utc::now(),
        });
        record
    }

    fn phase_with(response: &str) -> (CategorizePhase, Arc<ScriptedText>) {
        let text = ScriptedText::new(response);
        let phase = CategorizePhase::new(text.clone(), CategorizationConfig::default());
        (phase, text)
    }

    #[tokio::test]
    async fn well_formed_response_sets_sanitized_triple() {
        let (phase, text) = phase_with(
            r#"{"main_category": "Software Engineering",
                "sub_category": "Async Programming",
                "item_name": "Async IO Tips!"}"#,
        );
        let mut record = cached_record("a thread about tokio");

        phase.execute(&mut record).await.expect("categorize");

        assert_eq!(record.main_category.as_deref(), Some("software-engineering"));
        assert_eq!(record.sub_category.as_deref(), Some("async-programming"));
        assert_eq!(record.item_name.as_deref(), Some("async-io-tips"));

        let request = text.last_request();
        assert_eq!(request.format, magpie_providers::ResponseFormat::Json);
        assert!(request.system.is_some());
        assert!(request.prompt.contains("a thread about tokio"));
    }

    #[tokio::test]
    async fn keys_match_case_insensitively() {
        let (phase, _) = phase_with(
            r#"{"Main_Category": "Rust", "SUB_CATEGORY": "Macros", "Item_Name": "derive tricks"}"#,
        );
        let mut record = cached_record("macro thread");

        phase.execute(&mut record).await.expect("categorize");
        assert_eq!(record.item_name.as_deref(), Some("derive-tricks"));
    }

    #[tokio::test]
    async fn non_json_response_fails() {
        let (phase, _) = phase_with("Sure! I'd categorize this as software engineering.");
        let mut record = cached_record("some thread");

        let err = phase.execute(&mut record).await.expect_err("must fail");
        assert!(err.to_string().contains("not valid JSON"));
        assert!(record.main_category.is_none());
        assert!(!record.categorized);
    }

    #[tokio::test]
    async fn non_object_response_fails() {
        let (phase, _) = phase_with(r#"["software", "engineering"]"#);
        let mut record = cached_record("some thread");

        let err = phase.execute(&mut record).await.expect_err("must fail");
        assert!(err.to_string().contains("not a JSON object"));
    }

    #[tokio::test]
    async fn missing_keys_are_named() {
        let (phase, _) = phase_with(r#"{"main_category": "Rust"}"#);
        let mut record = cached_record("some thread");

        let err = phase.execute(&mut record).await.expect_err("must fail");
        let message = err.to_string();
        assert!(message.contains("sub_category"));
        assert!(message.contains("item_name"));
        assert!(!message.contains("main_category"));
    }

    #[tokio::test]
    async fn empty_after_sanitization_fails() {
        let (phase, _) = phase_with(
            r#"{"main_category": "Rust", "sub_category": "Macros", "item_name": "!!!"}"#,
        );
        let mut record = cached_record("some thread");

        let err = phase.execute(&mut record).await.expect_err("must fail");
        assert!(err.to_string().contains("item_name"));
    }

    #[tokio::test]
    async fn valid_descriptions_feed_the_prompt() {
        let (phase, text) = phase_with(
            r#"{"main_category": "Rust", "sub_category": "Profiling", "item_name": "flamegraphs"}"#,
        );
        let mut record = cached_record("look at this");
        record.media_items = vec![
            MediaItem {
                kind: MediaKind::Image,
                uri: "cache/100/media_0.jpg".into(),
                description: Some("a flamegraph of an async runtime".into()),
            },
            MediaItem {
                kind: MediaKind::Image,
                uri: "cache/100/media_1.jpg".into(),
                description: Some(FAILED_MEDIA_DESCRIPTION.into()),
            },
        ];

        phase.execute(&mut record).await.expect("categorize");

        let prompt = text.last_request().prompt;
        assert!(prompt.contains("a flamegraph of an async runtime"));
        assert!(!prompt.contains(FAILED_MEDIA_DESCRIPTION));
    }

    #[tokio::test]
    async fn category_change_clears_downstream_outputs() {
        let (phase, _) = phase_with(
            r#"{"main_category": "Databases", "sub_category": "SQLite", "item_name": "wal mode"}"#,
        );
        let mut record = cached_record("sqlite thread");
        record.categorized = true;
        record.main_category = Some("rust".into());
        record.sub_category = Some("storage".into());
        record.item_name = Some("old-name".into());
        record.kb_item_generated = true;
        record.synthesized = true;
        record.embedded = true;
        record.synced = true;
        record.kb_item_path = Some("rust/storage/old-name/README.md".into());

        phase.execute(&mut record).await.expect("recategorize");

        assert_eq!(record.main_category.as_deref(), Some("databases"));
        assert!(!record.kb_item_generated);
        assert!(!record.synthesized);
        assert!(!record.embedded);
        assert!(!record.synced);
        assert!(record.kb_item_path.is_none());
    }

    #[tokio::test]
    async fn unchanged_category_keeps_downstream_outputs() {
        let (phase, _) = phase_with(
            r#"{"main_category": "Rust", "sub_category": "Storage", "item_name": "Old Name"}"#,
        );
        let mut record = cached_record("sqlite thread");
        record.categorized = true;
        record.main_category = Some("rust".into());
        record.sub_category = Some("storage".into());
        record.item_name = Some("old-name".into());
        record.kb_item_generated = true;
        record.kb_item_path = Some("rust/storage/old-name/README.md".into());

        phase.execute(&mut record).await.expect("recategorize");

        assert!(record.kb_item_generated);
        assert!(record.kb_item_path.is_some());
    }

    #[tokio::test]
    async fn provider_error_propagates() {
        let phase = CategorizePhase::new(Arc::new(Unavailable), CategorizationConfig::default());
        let mut record = cached_record("some thread");

        let err = phase.execute(&mut record).await.expect_err("provider down");
        assert!(matches!(err, MagpieError::Provider(_)));
    }
}
