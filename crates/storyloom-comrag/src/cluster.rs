// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Centroid clustering over memory items sharing a `centroid_id`.
//!
//! The centroid is the element-wise mean of member embeddings; tightness
//! is the population variance of member-to-centroid Euclidean distances,
//! normalized by a configurable scale and clamped to <= 1.0.

use crate::types::{MemoryItem, euclidean_distance};

/// Recompute the centroid and tightness for a set of members sharing a
/// `centroid_id`.
///
/// Returns `None` for an empty member set. A singleton cluster
/// short-circuits, returning the member's existing values unchanged
/// (its own embedding when no centroid was recorded yet) so callers do
/// not need to special-case it.
///
/// `tightness_scale` divides the raw distance variance into [0, 1]; it is
/// calibrated to the embedding model's typical distance distribution
/// (`[comrag] tightness_scale`, default 2.0).
pub fn recompute(
    members: &[MemoryItem],
    tightness_scale: f64,
) -> Option<(Vec<f32>, f64)> {
    let first = members.first()?;

    if members.len() == 1 {
        let centroid = if first.centroid_embedding.is_empty() {
            first.embedding.clone()
        } else {
            first.centroid_embedding.clone()
        };
        return Some((centroid, first.cluster_tightness));
    }

    let dims = first.embedding.len();
    let embeddings: Vec<&[f32]> = members
        .iter()
        .map(|m| m.embedding.as_slice())
        .filter(|e| e.len() == dims)
        .collect();

    let mut centroid = vec![0.0f32; dims];
    for embedding in &embeddings {
        for (sum, value) in centroid.iter_mut().zip(embedding.iter()) {
            *sum += value;
        }
    }
    let count = embeddings.len() as f32;
    for value in centroid.iter_mut() {
        *value /= count;
    }

    let distances: Vec<f64> = embeddings
        .iter()
        .map(|e| euclidean_distance(e, &centroid))
        .collect();
    let mean = distances.iter().sum::<f64>() / distances.len() as f64;
    let variance = distances
        .iter()
        .map(|d| (d - mean) * (d - mean))
        .sum::<f64>()
        / distances.len() as f64;

    let tightness = (variance / tightness_scale).min(1.0);
    Some((centroid, tightness))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryTier, ParagraphMeta};

    fn member(id: &str, embedding: Vec<f32>) -> MemoryItem {
        MemoryItem {
            id: id.to_string(),
            tier: MemoryTier::High,
            centroid_id: "c-1".to_string(),
            content: format!("paragraph {id}"),
            embedding,
            centroid_embedding: vec![],
            quality_score: 0.0,
            llm_score: 0.0,
            user_feedback_score: 0.5,
            usage_count: 0,
            cluster_tightness: 0.0,
            source_paragraph_ids: vec![],
            meta: ParagraphMeta::default(),
            last_updated: String::new(),
        }
    }

    #[test]
    fn empty_input_returns_none() {
        assert!(recompute(&[], 2.0).is_none());
    }

    #[test]
    fn singleton_short_circuits_with_existing_values() {
        let mut item = member("m-1", vec![1.0, 0.0]);
        item.centroid_embedding = vec![0.5, 0.5];
        item.cluster_tightness = 0.25;
        let (centroid, tightness) = recompute(&[item], 2.0).unwrap();
        assert_eq!(centroid, vec![0.5, 0.5]);
        assert_eq!(tightness, 0.25);
    }

    #[test]
    fn singleton_without_centroid_uses_own_embedding() {
        let item = member("m-1", vec![1.0, 0.0]);
        let (centroid, tightness) = recompute(&[item], 2.0).unwrap();
        assert_eq!(centroid, vec![1.0, 0.0]);
        assert_eq!(tightness, 0.0);
    }

    #[test]
    fn centroid_is_elementwise_mean() {
        let members = vec![
            member("a", vec![1.0, 0.0, 0.0]),
            member("b", vec![0.0, 1.0, 0.0]),
        ];
        let (centroid, _) = recompute(&members, 2.0).unwrap();
        assert_eq!(centroid, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn equidistant_members_have_zero_tightness() {
        // Both members sit the same distance from the mean, so the
        // distance variance is zero.
        let members = vec![
            member("a", vec![1.0, 0.0]),
            member("b", vec![0.0, 1.0]),
        ];
        let (_, tightness) = recompute(&members, 2.0).unwrap();
        assert!(tightness.abs() < 1e-9);
    }

    #[test]
    fn spread_members_have_positive_tightness() {
        let members = vec![
            member("a", vec![0.0, 0.0]),
            member("b", vec![0.1, 0.0]),
            member("c", vec![10.0, 0.0]),
        ];
        let (_, tightness) = recompute(&members, 2.0).unwrap();
        assert!(tightness > 0.0);
    }

    #[test]
    fn tightness_clamps_to_one() {
        let members = vec![
            member("a", vec![0.0, 0.0]),
            member("b", vec![0.0, 0.0]),
            member("c", vec![1000.0, 0.0]),
        ];
        let (_, tightness) = recompute(&members, 2.0).unwrap();
        assert_eq!(tightness, 1.0);
    }

    #[test]
    fn recompute_is_idempotent() {
        let members = vec![
            member("a", vec![0.2, 0.9, 0.1]),
            member("b", vec![0.4, 0.7, 0.3]),
            member("c", vec![0.1, 0.8, 0.2]),
        ];
        let first = recompute(&members, 2.0).unwrap();
        let second = recompute(&members, 2.0).unwrap();
        assert_eq!(first, second, "no drift from repeated computation");
    }

    #[test]
    fn mismatched_dimensions_are_skipped() {
        let members = vec![
            member("a", vec![1.0, 0.0]),
            member("b", vec![0.0, 1.0]),
            member("broken", vec![0.5]),
        ];
        let (centroid, _) = recompute(&members, 2.0).unwrap();
        assert_eq!(centroid.len(), 2);
        assert_eq!(centroid, vec![0.5, 0.5]);
    }
}
