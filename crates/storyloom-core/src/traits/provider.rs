// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider adapter trait for LLM provider integrations.

use async_trait::async_trait;

use crate::error::StoryloomError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ProviderRequest, ProviderResponse};

/// Adapter for LLM provider integrations.
///
/// Provider adapters handle communication with language model APIs.
/// The retrieval core uses single-shot completion only (answer scoring
/// and formula generation); streaming is not required here.
#[async_trait]
pub trait ProviderAdapter: PluginAdapter {
    /// Sends a completion request and returns the full response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, StoryloomError>;
}
