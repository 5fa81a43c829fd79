//! Shared types, error model, and configuration for Magpie.
//!
//! This crate is the foundation depended on by all other Magpie crates.
//! It provides:
//! - [`MagpieError`], the unified error type
//! - Domain types ([`ItemRecord`], [`MediaItem`], [`Phase`], [`RunPrefs`])
//! - Name sanitization for kb path components
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod naming;
pub mod phase;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CategorizationConfig, DataPaths, DefaultsConfig, OllamaConfig, ScraperConfig,
    SyncConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{MagpieError, Result};
pub use naming::{MAX_NAME_LEN, sanitize_name};
pub use phase::{Phase, RunPrefs};
pub use types::{
    CURRENT_SCHEMA_VERSION, FAILED_MEDIA_DESCRIPTION, ItemRecord, MediaItem, MediaKind,
    RawContent, RunId,
};
