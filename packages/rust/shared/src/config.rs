//! Application configuration for Magpie.
//!
//! User config lives at `~/.magpie/magpie.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MagpieError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "magpie.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".magpie";

// ---------------------------------------------------------------------------
// Config structs (matching magpie.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Bookmark scraper companion service.
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Ollama provider settings.
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Categorization prompt settings.
    #[serde(default)]
    pub categorization: CategorizationConfig,

    /// Repository sync settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory holding the cache, kb tree, and registry database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Items processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_data_dir() -> String {
    "~/magpie-data".into()
}
fn default_concurrency() -> u32 {
    4
}

/// `[scraper]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Base URL of the scraper companion service. Unset means bookmark
    /// discovery is unavailable and runs proceed with known items only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_scraper_timeout")]
    pub timeout_secs: u64,
}

fn default_scraper_timeout() -> u64 {
    30
}

/// `[ollama]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama server URL.
    #[serde(default = "default_ollama_url")]
    pub url: String,

    /// Model for categorization and kb item generation.
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// Vision model for media interpretation.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Embedding model.
    #[serde(default = "default_embed_model")]
    pub embed_model: String,

    /// Request timeout in seconds. Generation can be slow on local hardware.
    #[serde(default = "default_ollama_timeout")]
    pub timeout_secs: u64,

    /// Retries on transient failures (429, 5xx, connection errors).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            text_model: default_text_model(),
            vision_model: default_vision_model(),
            embed_model: default_embed_model(),
            timeout_secs: default_ollama_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}
fn default_text_model() -> String {
    "llama3.1:8b".into()
}
fn default_vision_model() -> String {
    "llava:13b".into()
}
fn default_embed_model() -> String {
    "nomic-embed-text".into()
}
fn default_ollama_timeout() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

/// `[categorization]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizationConfig {
    /// Character budget for the categorization prompt content.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

fn default_max_prompt_chars() -> usize {
    12_000
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether the sync phase pushes at all. When false the phase is
    /// excluded from runs rather than failing.
    #[serde(default)]
    pub enabled: bool,

    /// Git remote to push to.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Branch to push.
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            remote: default_remote(),
            branch: default_branch(),
        }
    }
}

fn default_remote() -> String {
    "origin".into()
}
fn default_branch() -> String {
    "main".into()
}

// ---------------------------------------------------------------------------
// Data paths (runtime, resolved from config)
// ---------------------------------------------------------------------------

/// Resolved locations under the data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// Expanded data root.
    pub root: PathBuf,
}

impl DataPaths {
    /// Resolve the configured data directory, expanding a leading `~/`.
    pub fn resolve(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            root: expand_tilde(&config.defaults.data_dir)?,
        })
    }

    /// Raw tweet cache, one subdirectory per item id.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// The knowledge base tree (also the git working tree for sync).
    pub fn kb_dir(&self) -> PathBuf {
        self.root.join("kb")
    }

    /// Registry database file.
    pub fn db_path(&self) -> PathBuf {
        self.root.join("magpie.db")
    }
}

/// Expand a leading `~/` against the user's home directory.
fn expand_tilde(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| MagpieError::config("could not determine home directory"))?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.magpie/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| MagpieError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.magpie/magpie.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| MagpieError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| MagpieError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| MagpieError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| MagpieError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| MagpieError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
