// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding adapter trait for vector embedding generation.

use async_trait::async_trait;

use crate::error::StoryloomError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{EmbeddingInput, EmbeddingOutput};

/// Adapter for generating vector embeddings from text.
///
/// Embedding adapters power semantic search over the memory stores and
/// the static paragraph knowledge base by converting content into vector
/// representations.
#[async_trait]
pub trait EmbeddingAdapter: PluginAdapter {
    /// Generates embeddings for the given input, one vector per text.
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, StoryloomError>;
}
