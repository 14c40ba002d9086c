// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-generation memory write-back: score new content, place it in a
//! quality tier, and maintain the centroid clusters.

use std::sync::Arc;
use uuid::Uuid;

use storyloom_core::{EmbeddingAdapter, EmbeddingInput, StoryloomError};
use storyloom_config::ComragConfig;
use tracing::debug;

use crate::answer::AnswerScorer;
use crate::cluster;
use crate::formula::FormulaPlan;
use crate::quality::{QualityScorer, clamp01};
use crate::store::MemoryStore;
use crate::types::{
    MemoryItem, MemoryTier, ParagraphMeta, QualityScore, cosine_similarity, now_iso8601,
};

/// Commits generated content into the quality-partitioned memory.
///
/// An item's tier is fixed at insertion; later re-scoring only updates
/// score fields in place. Concurrent commits to one centroid are
/// last-writer-wins: re-clustering runs post-write and is idempotent over
/// the final member set.
pub struct MemoryWriteback {
    memory: MemoryStore,
    embedder: Arc<dyn EmbeddingAdapter>,
    answer_scorer: AnswerScorer,
    quality_scorer: QualityScorer,
    attach_threshold: f64,
    tightness_scale: f64,
}

impl MemoryWriteback {
    pub fn new(
        memory: MemoryStore,
        embedder: Arc<dyn EmbeddingAdapter>,
        answer_scorer: AnswerScorer,
        config: &ComragConfig,
    ) -> Self {
        Self {
            memory,
            embedder,
            answer_scorer,
            quality_scorer: QualityScorer::new(config.quality_cutoff),
            attach_threshold: config.centroid_attach_threshold,
            tightness_scale: config.tightness_scale,
        }
    }

    /// Commit one generated answer into memory.
    ///
    /// Returns `Ok(None)` when the plan disables write-back. Otherwise the
    /// content is embedded, answer-scored against `query` and `contexts`,
    /// quality-scored with zero initial feedback and usage, placed in the
    /// tier selected by `plan.quality_threshold`, and attached to the
    /// nearest centroid when that centroid lives in the destination tier
    /// at similarity >= the configured attach threshold.
    pub async fn commit(
        &self,
        plan: &FormulaPlan,
        query: &str,
        content: &str,
        contexts: &[String],
        source_paragraph_ids: &[String],
        meta: ParagraphMeta,
    ) -> Result<Option<MemoryItem>, StoryloomError> {
        if !plan.update_memory {
            debug!("write-back disabled by plan");
            return Ok(None);
        }

        let embedding = self.embed(content).await?;

        // The nearest centroid across both tiers supplies the distance
        // signal even when attachment is ultimately refused.
        let nearest = self.memory.nearest_centroid(&embedding).await?;
        let centroid_distance = nearest
            .as_ref()
            .map(|c| clamp01(1.0 - c.similarity as f64))
            .unwrap_or(0.0);

        let mut scoring_contexts = Vec::with_capacity(contexts.len() + 1);
        if !query.trim().is_empty() {
            scoring_contexts.push(format!("Originating query: {query}"));
        }
        scoring_contexts.extend_from_slice(contexts);
        let llm_score = self.answer_scorer.score(content, &scoring_contexts).await;

        let score =
            self.quality_scorer
                .score(llm_score, 0, 0, 0, centroid_distance);
        let tier = if score.final_score >= plan.quality_threshold {
            MemoryTier::High
        } else {
            MemoryTier::Low
        };

        let attach = nearest.filter(|c| {
            c.tier == tier && c.similarity as f64 >= self.attach_threshold
        });
        let (centroid_id, centroid_embedding) = match attach {
            Some(c) => (c.centroid_id, c.embedding),
            None => (Uuid::new_v4().to_string(), embedding.clone()),
        };

        let item = MemoryItem {
            id: Uuid::new_v4().to_string(),
            tier,
            centroid_id: centroid_id.clone(),
            content: content.to_string(),
            embedding,
            centroid_embedding,
            quality_score: score.final_score,
            llm_score: score.llm_score,
            user_feedback_score: score.user_feedback_score,
            usage_count: 0,
            cluster_tightness: 0.0,
            source_paragraph_ids: source_paragraph_ids.to_vec(),
            meta,
            last_updated: now_iso8601(),
        };
        self.memory.insert(&item).await?;

        metrics::counter!(
            "storyloom_memory_writes_total",
            "tier" => tier.as_str()
        )
        .increment(1);
        debug!(
            id = %item.id,
            tier = tier.as_str(),
            final_score = score.final_score,
            centroid_id = %centroid_id,
            "memory item written"
        );

        self.recluster(&centroid_id).await?;

        Ok(Some(item))
    }

    /// Recompute an item's quality score from its accumulated feedback,
    /// usage, and current centroid distance, updating scores in place.
    /// The tier never changes.
    pub async fn rescore(
        &self,
        memory_id: &str,
    ) -> Result<Option<QualityScore>, StoryloomError> {
        let Some(item) = self.memory.get(memory_id).await? else {
            return Ok(None);
        };
        let (likes, dislikes) = self.memory.feedback_counts(memory_id).await?;

        let centroid_distance = if item.centroid_embedding.is_empty() {
            0.0
        } else {
            clamp01(1.0 - cosine_similarity(&item.embedding, &item.centroid_embedding) as f64)
        };

        let score = self.quality_scorer.score(
            item.llm_score,
            likes,
            dislikes,
            item.usage_count,
            centroid_distance,
        );
        self.memory.update_scores(memory_id, &score).await?;
        debug!(
            id = memory_id,
            final_score = score.final_score,
            likes,
            dislikes,
            "memory item re-scored"
        );
        Ok(Some(score))
    }

    /// Re-cluster a centroid once it has two or more members.
    async fn recluster(&self, centroid_id: &str) -> Result<(), StoryloomError> {
        let members = self.memory.members_of(centroid_id).await?;
        if members.len() < 2 {
            return Ok(());
        }
        if let Some((centroid, tightness)) =
            cluster::recompute(&members, self.tightness_scale)
        {
            self.memory
                .update_cluster(centroid_id, &centroid, tightness)
                .await?;
            debug!(centroid_id, members = members.len(), tightness, "cluster recomputed");
        }
        Ok(())
    }

    async fn embed(&self, content: &str) -> Result<Vec<f32>, StoryloomError> {
        let output = self
            .embedder
            .embed(EmbeddingInput {
                texts: vec![content.to_string()],
                model: None,
            })
            .await?;
        output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| StoryloomError::Embedding {
                message: "embedding provider returned no vectors".to_string(),
                source: None,
            })
    }
}
