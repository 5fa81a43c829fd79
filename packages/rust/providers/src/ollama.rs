//! Ollama HTTP client implementing all three provider traits.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use magpie_shared::{MagpieError, OllamaConfig, Result};

use crate::{EmbeddingProvider, GenerationRequest, ResponseFormat, TextProvider, VisionProvider};

/// Client for a local Ollama server.
///
/// One client serves text generation (`/api/generate`), vision (same
/// endpoint with base64 image payloads), and embeddings (`/api/embed`).
pub struct OllamaClient {
    url: String,
    text_model: String,
    vision_model: String,
    embed_model: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Build a client from configuration.
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MagpieError::Provider(e.to_string()))?;

        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            vision_model: config.vision_model.clone(),
            embed_model: config.embed_model.clone(),
            max_retries: config.max_retries,
            client,
        })
    }

    /// POST a JSON body with retry/backoff, returning the parsed response.
    ///
    /// Retry strategy:
    /// - HTTP 429 or 5xx: retry with exponential backoff
    /// - HTTP 4xx (not 429): fail immediately
    /// - Network error: retry
    async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let endpoint = format!("{}{path}", self.url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, delay_secs = delay.as_secs(), %endpoint, "retrying ollama request");
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&endpoint).json(body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| MagpieError::Provider(e.to_string()));
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(MagpieError::Provider(format!(
                            "ollama error {status}: {body_text}"
                        )));
                        continue;
                    }

                    // Client error (not 429): don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(MagpieError::Provider(format!(
                        "ollama error {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(MagpieError::Provider(format!(
                        "ollama connection error (is Ollama running at {}?): {e}",
                        self.url
                    )));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| MagpieError::Provider("ollama request failed after retries".into())))
    }
}

/// Extract the `response` field from an `/api/generate` reply.
fn extract_response_text(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| MagpieError::Provider("ollama reply missing 'response' field".into()))
}

#[async_trait]
impl TextProvider for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.text_model,
            "prompt": request.prompt,
            "stream": false,
        });
        if let Some(system) = &request.system {
            body["system"] = serde_json::Value::String(system.clone());
        }
        if request.format == ResponseFormat::Json {
            body["format"] = serde_json::Value::String("json".into());
        }

        tracing::debug!(model = %self.text_model, prompt_chars = request.prompt.len(), "text generation request");
        let json = self.post_json("/api/generate", &body).await?;
        extract_response_text(&json)
    }
}

#[async_trait]
impl VisionProvider for OllamaClient {
    async fn describe(&self, prompt: &str, image_path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| MagpieError::io(image_path, e))?;
        let encoded = STANDARD.encode(&bytes);

        let body = serde_json::json!({
            "model": self.vision_model,
            "prompt": prompt,
            "stream": false,
            "images": [encoded],
        });

        tracing::debug!(model = %self.vision_model, image = %image_path.display(), "vision request");
        let json = self.post_json("/api/generate", &body).await?;
        extract_response_text(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    fn model_name(&self) -> &str {
        &self.embed_model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.embed_model,
            "input": texts,
        });

        tracing::debug!(model = %self.embed_model, batch = texts.len(), "embedding request");
        let json = self.post_json("/api/embed", &body).await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                MagpieError::Provider("ollama reply missing 'embeddings' array".into())
            })?;

        let mut result = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            let vector: Vec<f32> = embedding
                .as_array()
                .ok_or_else(|| {
                    MagpieError::Provider("ollama embedding is not an array".into())
                })?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            result.push(vector);
        }
        Ok(result)
    }
}
