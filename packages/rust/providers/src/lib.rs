//! AI provider traits and the Ollama implementation.
//!
//! Three narrow collaborator interfaces cover every model interaction in the
//! pipeline:
//! - [`TextProvider`] for categorization and kb item generation
//! - [`VisionProvider`] for media interpretation
//! - [`EmbeddingProvider`] for document embeddings
//!
//! [`OllamaClient`] implements all three against a local Ollama server.
//! Provider unavailability surfaces as an error per call; the pipeline maps
//! it to a per-item phase failure, never a crash.
//!
//! # Retry Strategy
//!
//! Transient failures use exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error): retry
//! - HTTP 4xx (client error, not 429): fail immediately
//! - Network errors: retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

mod ollama;

use std::path::Path;

use async_trait::async_trait;
use magpie_shared::Result;

pub use ollama::OllamaClient;

/// Output shape requested from the text model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// The model must answer with a single JSON object.
    Json,
    /// Free-form text.
    Text,
}

/// One text-generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Optional system instruction.
    pub system: Option<String>,
    pub format: ResponseFormat,
}

impl GenerationRequest {
    /// A free-form request with no system instruction.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            format: ResponseFormat::Text,
        }
    }

    /// A JSON-constrained request with no system instruction.
    pub fn json(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            format: ResponseFormat::Json,
        }
    }

    /// Attach a system instruction.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Text generation collaborator.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Run one generation request and return the raw model output.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Vision collaborator for describing a single local image.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Describe the image at `image_path` according to `prompt`.
    async fn describe(&self, prompt: &str, image_path: &Path) -> Result<String>;
}

/// Embedding collaborator.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The model identifier recorded alongside stored vectors.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
