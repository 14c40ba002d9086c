// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multidimensional quality scoring for memory items.
//!
//! The composite weighs four signals: LLM correctness dominates (0.4),
//! user feedback is a meaningful but noisy secondary signal (0.3), usage
//! frequency is a weak popularity proxy with log damping (0.2), and
//! cluster tightness is a tie-breaker rewarding semantic consistency
//! within a topic cluster (0.1).

use crate::types::{QualityLevel, QualityScore};

const WEIGHT_LLM: f64 = 0.4;
const WEIGHT_FEEDBACK: f64 = 0.3;
const WEIGHT_USAGE: f64 = 0.2;
const WEIGHT_CLUSTER: f64 = 0.1;

/// Usage saturates near usage_count ~ 147 (ln(148)/5 ~ 1.0).
const USAGE_LOG_DIVISOR: f64 = 5.0;

pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

/// Deterministic quality scorer.
///
/// The high/low cutoff is a configuration constant
/// (`[comrag] quality_cutoff`), not derived from data.
#[derive(Debug, Clone, Copy)]
pub struct QualityScorer {
    cutoff: f64,
}

impl QualityScorer {
    pub fn new(cutoff: f64) -> Self {
        Self {
            cutoff: clamp01(cutoff),
        }
    }

    /// Compute the composite quality score. Pure and total: float inputs
    /// are clamped into range rather than rejected.
    pub fn score(
        &self,
        llm_score: f64,
        likes: u64,
        dislikes: u64,
        usage_count: u64,
        centroid_distance: f64,
    ) -> QualityScore {
        let llm_score = clamp01(llm_score);
        let centroid_distance = clamp01(centroid_distance);

        let likes_f = likes as f64;
        let dislikes_f = dislikes as f64;
        let user_feedback_score =
            clamp01(((likes_f - dislikes_f) / (likes_f + dislikes_f + 1.0) + 1.0) / 2.0);
        let usage_score = clamp01(((usage_count as f64) + 1.0).ln() / USAGE_LOG_DIVISOR);
        let cluster_score = 1.0 - centroid_distance;

        let final_score = WEIGHT_LLM * llm_score
            + WEIGHT_FEEDBACK * user_feedback_score
            + WEIGHT_USAGE * usage_score
            + WEIGHT_CLUSTER * cluster_score;

        let quality_level = if final_score >= self.cutoff {
            QualityLevel::High
        } else {
            QualityLevel::Low
        };

        QualityScore {
            final_score,
            llm_score,
            user_feedback_score,
            usage_score,
            cluster_score,
            quality_level,
        }
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(0.7)
    }
}
