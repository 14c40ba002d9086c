// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ComRAG retrieval core for the Storyloom fiction-writing backend.
//!
//! Turns formula expressions (JSON or shorthand DSL) into retrieval plans,
//! evaluates them over quality-partitioned memory stores and a static
//! paragraph knowledge base, and maintains memory quality through
//! composite scoring, centroid clustering, and post-generation write-back.
//!
//! ## Architecture
//!
//! - **formula**: FormulaPlan parsing (JSON with repair, DSL fallback)
//! - **evaluator**: mode-dispatched tiered retrieval and meta filtering
//! - **store**: SQLite persistence for memory items and paragraphs
//! - **quality**: deterministic composite quality scoring
//! - **cluster**: centroid recomputation and tightness
//! - **answer**: LLM-rubric answer scoring with neutral fallback
//! - **writeback**: post-generation commit and re-scoring
//! - **repair**: best-effort JSON repair for LLM/client output

pub mod answer;
pub mod cluster;
pub mod evaluator;
pub mod formula;
pub mod quality;
pub mod repair;
pub mod store;
pub mod types;
pub mod writeback;

pub use answer::AnswerScorer;
pub use evaluator::FormulaEvaluator;
pub use formula::{ComragMode, FormulaPlan, SortOrder, parse};
pub use quality::QualityScorer;
pub use store::{CentroidRef, MemoryStore, ParagraphStore};
pub use types::*;
pub use writeback::MemoryWriteback;
