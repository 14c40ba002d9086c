// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Storyloom retrieval backend.
//!
//! This crate provides the foundational trait definitions, error types, and
//! common types used throughout the Storyloom workspace. All adapter plugins
//! implement traits defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::StoryloomError;
pub use types::{
    AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus, ProviderRequest,
    ProviderResponse, TokenUsage,
};

// Re-export all adapter traits at crate root.
pub use traits::{EmbeddingAdapter, PluginAdapter, ProviderAdapter};
