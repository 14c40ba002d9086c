// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Storyloom workspace.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the type of adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Provider,
    Embedding,
    Storage,
}

/// Token usage reported by an LLM provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A single-shot completion request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Model identifier, e.g. "gpt-4o-mini".
    pub model: String,
    /// Optional system prompt prepended to the conversation.
    pub system_prompt: Option<String>,
    /// The user prompt.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature. Scoring calls use a low value for stability.
    pub temperature: f64,
}

/// A completed response from an LLM provider.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// The generated text content.
    pub content: String,
    /// The model that produced the response.
    pub model: String,
    /// Token usage, when the provider reports it.
    pub usage: Option<TokenUsage>,
}

/// Input for an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    /// Texts to embed, one vector returned per text.
    pub texts: Vec<String>,
    /// Model override; `None` uses the adapter's configured model.
    pub model: Option<String>,
}

/// Output from an embedding adapter.
///
/// Vectors have consistent dimensionality for a given model.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub embeddings: Vec<Vec<f32>>,
    pub dimensions: usize,
}
