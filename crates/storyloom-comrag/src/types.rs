// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types for the ComRAG retrieval and memory-quality subsystem.

use serde::{Deserialize, Serialize};

/// Quality partition a memory item lives in.
///
/// An item never changes tier after insertion; re-scoring updates scores
/// in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryTier {
    High,
    Low,
}

impl MemoryTier {
    /// Convert to string for SQLite storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::High => "high",
            MemoryTier::Low => "low",
        }
    }

    /// Parse from SQLite string.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "high" => MemoryTier::High,
            _ => MemoryTier::Low,
        }
    }
}

/// Fixed metadata schema for paragraphs and memory items.
///
/// Populated once at ingestion time; meta filtering does typed lookups
/// against these fields rather than alias-matching free-form keys.
/// Unknown keys in persisted rows are dropped on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParagraphMeta {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub labels: Vec<String>,
    /// Serde name is exactly `isDialogue`; it is part of the wire format.
    #[serde(rename = "isDialogue")]
    pub is_dialogue: Option<bool>,
    pub characters: Vec<String>,
    pub emotion: Option<String>,
    pub style: Option<String>,
    pub scene: Option<String>,
}

/// A stored content unit in the high or low quality partition.
#[derive(Debug, Clone)]
pub struct MemoryItem {
    pub id: String,
    pub tier: MemoryTier,
    /// Cluster grouping key. Not a foreign entity; members of a cluster
    /// share this id and carry the cluster centroid redundantly.
    pub centroid_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    /// The cluster's current centroid, duplicated onto every member for
    /// read efficiency.
    pub centroid_embedding: Vec<f32>,
    pub quality_score: f64,
    pub llm_score: f64,
    pub user_feedback_score: f64,
    pub usage_count: u64,
    pub cluster_tightness: f64,
    pub source_paragraph_ids: Vec<String>,
    pub meta: ParagraphMeta,
    /// ISO 8601 timestamp.
    pub last_updated: String,
}

/// A row in the static paragraph knowledge base.
#[derive(Debug, Clone)]
pub struct Paragraph {
    pub id: String,
    pub book_id: String,
    pub chapter_id: Option<String>,
    pub content: String,
    pub embedding: Vec<f32>,
    pub meta: ParagraphMeta,
    pub created_at: String,
}

/// Which source produced a ranked result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOrigin {
    HighMemory,
    StaticKb,
}

/// A single ranked retrieval result returned by the evaluator.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub id: String,
    pub content: String,
    pub similarity: f32,
    pub meta: ParagraphMeta,
    pub origin: ResultOrigin,
}

/// Composite quality rating for a memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLevel {
    High,
    Low,
}

/// The deterministic composite quality score. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScore {
    pub final_score: f64,
    pub llm_score: f64,
    pub user_feedback_score: f64,
    pub usage_score: f64,
    pub cluster_score: f64,
    pub quality_level: QualityLevel,
}

/// User reaction to a retrieved memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackType {
    Like,
    Dislike,
    Report,
}

impl FeedbackType {
    /// Convert to string for SQLite storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Like => "like",
            FeedbackType::Dislike => "dislike",
            FeedbackType::Report => "report",
        }
    }

    /// Parse from SQLite string.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "like" => FeedbackType::Like,
            "report" => FeedbackType::Report,
            _ => FeedbackType::Dislike,
        }
    }
}

/// An append-only feedback record. Never mutates a memory item directly;
/// aggregated counts feed re-scoring.
#[derive(Debug, Clone)]
pub struct UserFeedback {
    pub memory_id: String,
    pub memory_tier: MemoryTier,
    pub feedback_type: FeedbackType,
    pub user_id: String,
    pub comment: Option<String>,
}

/// Convert f32 vector to bytes for SQLite BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert SQLite BLOB back to f32 vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have same length");
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Euclidean distance between two vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (x - y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Current timestamp in the ISO 8601 format used across the schema.
pub fn now_iso8601() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
