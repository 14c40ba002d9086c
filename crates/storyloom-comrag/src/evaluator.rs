// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Formula evaluation: tiered retrieval over the memory stores and the
//! static paragraph knowledge base.
//!
//! Evaluation is side-effect free. Usage counting is the explicit
//! separate [`FormulaEvaluator::mark_consumed`] call, made by the caller
//! after retrieved content is actually used, because an evaluation may be
//! speculative (a formula preview, for instance).

use std::sync::Arc;
use std::time::Instant;

use storyloom_core::{EmbeddingAdapter, EmbeddingInput, StoryloomError};
use tracing::{debug, warn};

use crate::formula::{ComragMode, FormulaPlan, SortOrder};
use crate::store::{MemoryStore, ParagraphStore};
use crate::types::{MemoryTier, ParagraphMeta, RankedResult, ResultOrigin};

/// Evaluates a [`FormulaPlan`] against the configured retrieval sources.
pub struct FormulaEvaluator {
    memory: MemoryStore,
    paragraphs: ParagraphStore,
    embedder: Arc<dyn EmbeddingAdapter>,
}

impl FormulaEvaluator {
    pub fn new(
        memory: MemoryStore,
        paragraphs: ParagraphStore,
        embedder: Arc<dyn EmbeddingAdapter>,
    ) -> Self {
        Self {
            memory,
            paragraphs,
            embedder,
        }
    }

    /// Evaluate a plan. A non-empty `supplemental_query` takes priority
    /// over `plan.query`; when both are absent the evaluation is a valid
    /// no-op returning an empty list without touching any provider.
    pub async fn evaluate(
        &self,
        plan: &FormulaPlan,
        supplemental_query: Option<&str>,
    ) -> Result<Vec<RankedResult>, StoryloomError> {
        let query = effective_query(plan, supplemental_query);
        let Some(query) = query else {
            debug!("empty effective query, returning empty result set");
            return Ok(Vec::new());
        };

        let started = Instant::now();
        metrics::counter!(
            "storyloom_formula_evaluations_total",
            "mode" => plan.comrag_mode.as_str().to_string()
        )
        .increment(1);

        let query_vec = self.embed_query(&query).await?;

        // Meta filtering happens after retrieval, so modes that filter
        // over-fetch to absorb the attrition.
        let limit = if plan.meta_filters.is_empty() {
            plan.top_k
        } else {
            plan.top_k * 2
        };

        let mut results = self.dispatch(plan, &query_vec, limit).await?;

        debug!(
            mode = plan.comrag_mode.as_str(),
            query_len = query.len(),
            fetched = results.len(),
            "retrieval complete"
        );

        if !plan.meta_filters.is_empty() {
            results.retain(|r| meta_matches(&r.meta, plan));
        }

        match plan.order {
            SortOrder::SimilarityDesc => results.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            SortOrder::SimilarityAsc => results.sort_by(|a, b| {
                a.similarity
                    .partial_cmp(&b.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
        // Trim after combine is the final step, bounding output size even
        // when per-source limits over-fetched.
        results.truncate(plan.top_k);

        metrics::histogram!("storyloom_retrieval_latency_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(results)
    }

    /// Record that retrieved results were actually consumed. Increments
    /// `usage_count` for high-memory results; static-KB paragraphs carry
    /// no usage state.
    pub async fn mark_consumed(
        &self,
        results: &[RankedResult],
    ) -> Result<(), StoryloomError> {
        let ids: Vec<String> = results
            .iter()
            .filter(|r| r.origin == ResultOrigin::HighMemory)
            .map(|r| r.id.clone())
            .collect();
        self.memory.increment_usage(&ids).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, StoryloomError> {
        let output = self
            .embedder
            .embed(EmbeddingInput {
                texts: vec![query.to_string()],
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

    /// Mode dispatch. Multi-source modes query concurrently, accumulate
    /// into per-source lists, and concatenate once both complete. The low
    /// memory store is never a retrieval source.
    async fn dispatch(
        &self,
        plan: &FormulaPlan,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<RankedResult>, StoryloomError> {
        let threshold = plan.threshold;
        let book_id = plan.book_id.as_deref();

        match &plan.comrag_mode {
            ComragMode::RetrieveHigh => {
                self.memory
                    .search(MemoryTier::High, query_vec, limit, threshold)
                    .await
            }
            ComragMode::GenerateWithHigh if !plan.static_kb => {
                self.memory
                    .search(MemoryTier::High, query_vec, limit, threshold)
                    .await
            }
            ComragMode::GenerateWithHigh | ComragMode::GenerateExcludingLow => {
                let (memory_results, kb_results) = tokio::join!(
                    self.memory
                        .search(MemoryTier::High, query_vec, limit, threshold),
                    self.paragraphs.search(query_vec, limit, threshold, book_id),
                );
                combine_sources(memory_results, kb_results)
            }
            ComragMode::Legacy(mode) => {
                debug!(mode, "unrecognized mode, static knowledge base only");
                self.paragraphs
                    .search(query_vec, limit, threshold, book_id)
                    .await
            }
        }
    }
}

/// Concatenate two source results. A single failed source is logged and
/// skipped; both failing surfaces the first error.
fn combine_sources(
    memory: Result<Vec<RankedResult>, StoryloomError>,
    kb: Result<Vec<RankedResult>, StoryloomError>,
) -> Result<Vec<RankedResult>, StoryloomError> {
    match (memory, kb) {
        (Ok(mut memory), Ok(mut kb)) => {
            memory.append(&mut kb);
            Ok(memory)
        }
        (Ok(memory), Err(e)) => {
            warn!(error = %e, source = "static_kb", "retrieval source failed, skipping");
            Ok(memory)
        }
        (Err(e), Ok(kb)) => {
            warn!(error = %e, source = "high_memory", "retrieval source failed, skipping");
            Ok(kb)
        }
        (Err(e), Err(other)) => {
            warn!(error = %other, source = "static_kb", "retrieval source failed");
            Err(e)
        }
    }
}

fn effective_query(plan: &FormulaPlan, supplemental: Option<&str>) -> Option<String> {
    let supplemental = supplemental.map(str::trim).filter(|s| !s.is_empty());
    match supplemental {
        Some(s) => Some(s.to_string()),
        None => plan
            .query
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

/// AND across filtered fields; OR within a field's expected values. A
/// field absent from the fixed meta schema falls back to a `labels`
/// lookup before excluding the result.
fn meta_matches(meta: &ParagraphMeta, plan: &FormulaPlan) -> bool {
    plan.meta_filters
        .iter()
        .all(|(field, expected)| field_matches(meta, field, expected))
}

fn field_matches(meta: &ParagraphMeta, field: &str, expected: &[String]) -> bool {
    let direct = match field {
        "labels" => list_field(&meta.labels, expected),
        "characters" => list_field(&meta.characters, expected),
        "isDialogue" | "is_dialogue" => meta
            .is_dialogue
            .map(|b| expected.iter().any(|e| e.eq_ignore_ascii_case(&b.to_string()))),
        "category" => scalar_field(meta.category.as_deref(), expected),
        "subcategory" => scalar_field(meta.subcategory.as_deref(), expected),
        "emotion" => scalar_field(meta.emotion.as_deref(), expected),
        "style" => scalar_field(meta.style.as_deref(), expected),
        "scene" => scalar_field(meta.scene.as_deref(), expected),
        _ => None,
    };
    match direct {
        Some(matched) => matched,
        // Field absent on this result: labels fallback.
        None => list_field(&meta.labels, expected).unwrap_or(false),
    }
}

/// `None` means the field is absent (empty list), deferring to fallback.
fn list_field(values: &[String], expected: &[String]) -> Option<bool> {
    if values.is_empty() {
        return None;
    }
    Some(expected.iter().any(|e| values.iter().any(|v| v == e)))
}

fn scalar_field(value: Option<&str>, expected: &[String]) -> Option<bool> {
    value.map(|v| expected.iter().any(|e| e == v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(labels: &[&str], emotion: Option<&str>) -> ParagraphMeta {
        ParagraphMeta {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            emotion: emotion.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    fn plan_with_filter(field: &str, values: &[&str]) -> FormulaPlan {
        let mut plan = FormulaPlan::default();
        plan.meta_filters.insert(
            field.to_string(),
            values.iter().map(|s| s.to_string()).collect(),
        );
        plan
    }

    #[test]
    fn effective_query_prefers_supplemental() {
        let mut plan = FormulaPlan::default();
        plan.query = Some("from the plan".into());
        assert_eq!(
            effective_query(&plan, Some("supplied at call time")).as_deref(),
            Some("supplied at call time")
        );
        assert_eq!(effective_query(&plan, None).as_deref(), Some("from the plan"));
        assert_eq!(effective_query(&plan, Some("  ")).as_deref(), Some("from the plan"));

        plan.query = None;
        assert_eq!(effective_query(&plan, None), None);
    }

    #[test]
    fn scalar_filter_exact_match() {
        let meta = meta_with(&[], Some("dread"));
        assert!(meta_matches(&meta, &plan_with_filter("emotion", &["dread", "awe"])));
        assert!(!meta_matches(&meta, &plan_with_filter("emotion", &["joy"])));
    }

    #[test]
    fn list_filter_any_value_matches() {
        let meta = ParagraphMeta {
            characters: vec!["mara".into(), "theo".into()],
            ..Default::default()
        };
        assert!(meta_matches(&meta, &plan_with_filter("characters", &["theo"])));
        assert!(!meta_matches(&meta, &plan_with_filter("characters", &["unknown"])));
    }

    #[test]
    fn boolean_filter_is_case_insensitive() {
        let meta = ParagraphMeta {
            is_dialogue: Some(true),
            ..Default::default()
        };
        assert!(meta_matches(&meta, &plan_with_filter("isDialogue", &["True"])));
        assert!(meta_matches(&meta, &plan_with_filter("is_dialogue", &["true"])));
        assert!(!meta_matches(&meta, &plan_with_filter("isDialogue", &["false"])));
    }

    #[test]
    fn absent_field_falls_back_to_labels() {
        let meta = meta_with(&["storm", "harbor"], None);
        // `emotion` is unset, but "storm" is present in labels.
        assert!(meta_matches(&meta, &plan_with_filter("emotion", &["storm"])));
        // Unknown schema field also goes through labels.
        assert!(meta_matches(&meta, &plan_with_filter("mood", &["harbor"])));
        assert!(!meta_matches(&meta, &plan_with_filter("mood", &["desert"])));
    }

    #[test]
    fn and_across_fields() {
        let meta = ParagraphMeta {
            emotion: Some("grief".into()),
            labels: vec!["funeral".into()],
            ..Default::default()
        };
        let mut plan = plan_with_filter("emotion", &["grief"]);
        plan.meta_filters
            .insert("labels".into(), vec!["funeral".into()]);
        assert!(meta_matches(&meta, &plan));

        plan.meta_filters
            .insert("labels".into(), vec!["wedding".into()]);
        assert!(!meta_matches(&meta, &plan));
    }

    #[test]
    fn combine_skips_single_failed_source() {
        let ok = vec![RankedResult {
            id: "m-1".into(),
            content: "kept".into(),
            similarity: 0.9,
            meta: ParagraphMeta::default(),
            origin: ResultOrigin::HighMemory,
        }];
        let failed: Result<Vec<RankedResult>, _> = Err(StoryloomError::Internal(
            "source down".into(),
        ));

        let combined = combine_sources(Ok(ok.clone()), failed).unwrap();
        assert_eq!(combined.len(), 1);

        let failed: Result<Vec<RankedResult>, _> = Err(StoryloomError::Internal(
            "source down".into(),
        ));
        let combined = combine_sources(failed, Ok(ok)).unwrap();
        assert_eq!(combined.len(), 1);
    }

    #[test]
    fn combine_errors_when_all_sources_fail() {
        let a: Result<Vec<RankedResult>, _> =
            Err(StoryloomError::Internal("memory down".into()));
        let b: Result<Vec<RankedResult>, _> =
            Err(StoryloomError::Internal("kb down".into()));
        assert!(combine_sources(a, b).is_err());
    }
}
