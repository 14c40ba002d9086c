// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Storyloom retrieval backend.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Storyloom configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoryloomConfig {
    /// Service identity and logging settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// OpenAI-compatible API settings (chat + embeddings).
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// ComRAG retrieval and memory-quality settings.
    #[serde(default)]
    pub comrag: ComragConfig,
}

/// Service identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Display name of the service.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_agent_name() -> String {
    "storyloom".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// OpenAI-compatible API configuration.
///
/// Covers both chat completions (answer scoring) and embeddings
/// (semantic retrieval). A custom `api_base` supports compatible
/// gateways such as Azure OpenAI or vLLM.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiConfig {
    /// Base URL for the API, without a trailing slash.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API key. Falls back to the `OPENAI_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Chat model used for answer scoring and formula generation.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Embedding model used for all vector generation.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Maximum tokens per chat completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable write-ahead logging.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|d| d.join("storyloom/storyloom.db").display().to_string())
        .unwrap_or_else(|| "storyloom.db".to_string())
}

fn default_wal_mode() -> bool {
    true
}

/// ComRAG retrieval and memory-quality configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ComragConfig {
    /// Composite quality score at/above which an item is rated "high".
    /// A fixed policy threshold, not derived from data.
    #[serde(default = "default_quality_cutoff")]
    pub quality_cutoff: f64,

    /// Divisor normalizing cluster distance variance into [0, 1].
    /// Calibrated to the embedding model's typical distance distribution.
    #[serde(default = "default_tightness_scale")]
    pub tightness_scale: f64,

    /// Minimum cosine similarity for a new memory item to join an
    /// existing centroid instead of minting a fresh one.
    #[serde(default = "default_centroid_attach_threshold")]
    pub centroid_attach_threshold: f64,

    /// Model used for answer scoring. Empty means the chat model.
    #[serde(default)]
    pub scoring_model: String,

    /// Sampling temperature for scoring calls. Kept low for stability.
    #[serde(default = "default_scoring_temperature")]
    pub scoring_temperature: f64,

    /// Maximum retrieved contexts included in a scoring prompt.
    #[serde(default = "default_max_scoring_contexts")]
    pub max_scoring_contexts: usize,
}

impl Default for ComragConfig {
    fn default() -> Self {
        Self {
            quality_cutoff: default_quality_cutoff(),
            tightness_scale: default_tightness_scale(),
            centroid_attach_threshold: default_centroid_attach_threshold(),
            scoring_model: String::new(),
            scoring_temperature: default_scoring_temperature(),
            max_scoring_contexts: default_max_scoring_contexts(),
        }
    }
}

fn default_quality_cutoff() -> f64 {
    0.7
}

fn default_tightness_scale() -> f64 {
    2.0
}

fn default_centroid_attach_threshold() -> f64 {
    0.8
}

fn default_scoring_temperature() -> f64 {
    0.1
}

fn default_max_scoring_contexts() -> usize {
    5
}
