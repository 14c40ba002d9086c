// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed stores: quality-partitioned memory items and the static
//! paragraph knowledge base.
//!
//! Embeddings are stored as little-endian f32 BLOBs; similarity search is
//! a brute-force cosine scan with a threshold floor, computed on the
//! connection thread. Malformed persisted `meta` degrades to the default
//! schema rather than failing a read, since meta is advisory (used only
//! for filtering).

use serde_json::Value;
use storyloom_core::StoryloomError;
use storyloom_storage::{Database, map_tr_err};

use crate::repair::repair_and_parse;
use crate::types::{
    MemoryItem, MemoryTier, Paragraph, ParagraphMeta, QualityScore, RankedResult,
    ResultOrigin, UserFeedback, blob_to_vec, cosine_similarity, vec_to_blob,
};

/// A distinct cluster seen from a nearest-centroid lookup.
#[derive(Debug, Clone)]
pub struct CentroidRef {
    pub centroid_id: String,
    pub tier: MemoryTier,
    pub embedding: Vec<f32>,
    pub similarity: f32,
}

/// Decode a persisted meta column, repairing malformed JSON to defaults.
fn decode_meta(raw: &str) -> ParagraphMeta {
    match serde_json::from_str(raw) {
        Ok(meta) => meta,
        Err(_) => {
            let repaired = repair_and_parse(raw, Value::Object(Default::default()));
            serde_json::from_value(repaired).unwrap_or_default()
        }
    }
}

/// Decode a persisted string-list column, degrading to empty on damage.
fn decode_string_list(raw: &str) -> Vec<String> {
    match serde_json::from_str(raw) {
        Ok(list) => list,
        Err(_) => {
            let repaired = repair_and_parse(raw, Value::Array(vec![]));
            serde_json::from_value(repaired).unwrap_or_default()
        }
    }
}

const MEMORY_COLUMNS: &str = "id, tier, centroid_id, content, embedding, centroid_embedding, \
     quality_score, llm_score, user_feedback_score, usage_count, cluster_tightness, \
     source_paragraph_ids, meta, last_updated";

fn row_to_memory_item(row: &rusqlite::Row) -> Result<MemoryItem, rusqlite::Error> {
    let tier: String = row.get(1)?;
    let embedding: Vec<u8> = row.get(4)?;
    let centroid_embedding: Vec<u8> = row.get(5)?;
    let source_ids: String = row.get(11)?;
    let meta: String = row.get(12)?;
    Ok(MemoryItem {
        id: row.get(0)?,
        tier: MemoryTier::from_str_value(&tier),
        centroid_id: row.get(2)?,
        content: row.get(3)?,
        embedding: blob_to_vec(&embedding),
        centroid_embedding: blob_to_vec(&centroid_embedding),
        quality_score: row.get(6)?,
        llm_score: row.get(7)?,
        user_feedback_score: row.get(8)?,
        usage_count: row.get::<_, i64>(9)?.max(0) as u64,
        cluster_tightness: row.get(10)?,
        source_paragraph_ids: decode_string_list(&source_ids),
        meta: decode_meta(&meta),
        last_updated: row.get(13)?,
    })
}

/// Persistent store for quality-partitioned memory items.
///
/// Exclusively owns memory-item persistence: tiered vector search, usage
/// counting, cluster write-back, and the append-only feedback log.
#[derive(Clone)]
pub struct MemoryStore {
    db: Database,
}

impl MemoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new memory item into its tier.
    pub async fn insert(&self, item: &MemoryItem) -> Result<(), StoryloomError> {
        let item = item.clone();
        self.db
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO memory_items (id, tier, centroid_id, content, embedding, \
                     centroid_embedding, quality_score, llm_score, user_feedback_score, \
                     usage_count, cluster_tightness, source_paragraph_ids, meta, last_updated) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    rusqlite::params![
                        item.id,
                        item.tier.as_str(),
                        item.centroid_id,
                        item.content,
                        vec_to_blob(&item.embedding),
                        vec_to_blob(&item.centroid_embedding),
                        item.quality_score,
                        item.llm_score,
                        item.user_feedback_score,
                        item.usage_count as i64,
                        item.cluster_tightness,
                        serde_json::to_string(&item.source_paragraph_ids)
                            .unwrap_or_else(|_| "[]".to_string()),
                        serde_json::to_string(&item.meta)
                            .unwrap_or_else(|_| "{}".to_string()),
                        item.last_updated,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Fetch one memory item by id.
    pub async fn get(&self, id: &str) -> Result<Option<MemoryItem>, StoryloomError> {
        let id = id.to_string();
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM memory_items WHERE id = ?1"
                ))?;
                let mut rows = stmt.query_map(rusqlite::params![id], row_to_memory_item)?;
                match rows.next() {
                    Some(item) => Ok(Some(item?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(map_tr_err)
    }

    /// Cosine similarity search within one tier.
    ///
    /// Scans tier embeddings, applies the threshold floor, sorts by
    /// similarity descending, and truncates to `limit` before fetching
    /// full rows (similarity order is preserved).
    pub async fn search(
        &self,
        tier: MemoryTier,
        query: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<RankedResult>, StoryloomError> {
        let query = query.to_vec();
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT id, embedding FROM memory_items WHERE tier = ?1")?;
                let mut scored: Vec<(String, f32)> = stmt
                    .query_map(rusqlite::params![tier.as_str()], |row| {
                        let id: String = row.get(0)?;
                        let blob: Vec<u8> = row.get(1)?;
                        Ok((id, blob_to_vec(&blob)))
                    })?
                    .filter_map(|r| r.ok())
                    .filter(|(_, embedding)| embedding.len() == query.len())
                    .map(|(id, embedding)| (id, cosine_similarity(&query, &embedding)))
                    .filter(|(_, sim)| *sim as f64 >= threshold)
                    .collect();
                scored.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                scored.truncate(limit);

                let mut results = Vec::with_capacity(scored.len());
                let mut stmt = conn.prepare(
                    "SELECT content, meta FROM memory_items WHERE id = ?1",
                )?;
                for (id, similarity) in scored {
                    let (content, meta): (String, String) = stmt
                        .query_row(rusqlite::params![id], |row| {
                            Ok((row.get(0)?, row.get(1)?))
                        })?;
                    results.push(RankedResult {
                        id,
                        content,
                        similarity,
                        meta: decode_meta(&meta),
                        origin: ResultOrigin::HighMemory,
                    });
                }
                Ok(results)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Increment usage counts after retrieved content is actually consumed.
    pub async fn increment_usage(&self, ids: &[String]) -> Result<(), StoryloomError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.to_vec();
        self.db
            .connection()
            .call(move |conn| {
                let placeholders: Vec<String> =
                    (1..=ids.len()).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "UPDATE memory_items SET usage_count = usage_count + 1, \
                     last_updated = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
                     WHERE id IN ({})",
                    placeholders.join(", ")
                );
                let params: Vec<&dyn rusqlite::types::ToSql> =
                    ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
                conn.execute(&sql, params.as_slice())?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Append a feedback record. Never mutates the memory item.
    pub async fn record_feedback(
        &self,
        feedback: &UserFeedback,
    ) -> Result<(), StoryloomError> {
        let feedback = feedback.clone();
        self.db
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO user_feedback (memory_id, memory_tier, feedback_type, \
                     user_id, comment) VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        feedback.memory_id,
                        feedback.memory_tier.as_str(),
                        feedback.feedback_type.as_str(),
                        feedback.user_id,
                        feedback.comment,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Aggregate (likes, dislikes) for a memory item.
    pub async fn feedback_counts(
        &self,
        memory_id: &str,
    ) -> Result<(u64, u64), StoryloomError> {
        let memory_id = memory_id.to_string();
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT feedback_type, COUNT(*) FROM user_feedback \
                     WHERE memory_id = ?1 GROUP BY feedback_type",
                )?;
                let mut likes = 0u64;
                let mut dislikes = 0u64;
                let rows = stmt.query_map(rusqlite::params![memory_id], |row| {
                    let kind: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((kind, count))
                })?;
                for row in rows {
                    let (kind, count) = row?;
                    match kind.as_str() {
                        "like" => likes = count.max(0) as u64,
                        "dislike" => dislikes = count.max(0) as u64,
                        _ => {}
                    }
                }
                Ok((likes, dislikes))
            })
            .await
            .map_err(map_tr_err)
    }

    /// All members of one cluster.
    pub async fn members_of(
        &self,
        centroid_id: &str,
    ) -> Result<Vec<MemoryItem>, StoryloomError> {
        let centroid_id = centroid_id.to_string();
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM memory_items WHERE centroid_id = ?1"
                ))?;
                let items = stmt
                    .query_map(rusqlite::params![centroid_id], row_to_memory_item)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Find the centroid (across both tiers) closest to `query`.
    ///
    /// Every member carries the cluster centroid redundantly, so one row
    /// per distinct `centroid_id` suffices.
    pub async fn nearest_centroid(
        &self,
        query: &[f32],
    ) -> Result<Option<CentroidRef>, StoryloomError> {
        let query = query.to_vec();
        self.db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT centroid_id, tier, centroid_embedding FROM memory_items \
                     GROUP BY centroid_id",
                )?;
                let best = stmt
                    .query_map([], |row| {
                        let centroid_id: String = row.get(0)?;
                        let tier: String = row.get(1)?;
                        let blob: Vec<u8> = row.get(2)?;
                        Ok((centroid_id, tier, blob_to_vec(&blob)))
                    })?
                    .filter_map(|r| r.ok())
                    .filter(|(_, _, embedding)| embedding.len() == query.len())
                    .map(|(centroid_id, tier, embedding)| {
                        let similarity = cosine_similarity(&query, &embedding);
                        CentroidRef {
                            centroid_id,
                            tier: MemoryTier::from_str_value(&tier),
                            embedding,
                            similarity,
                        }
                    })
                    .max_by(|a, b| {
                        a.similarity
                            .partial_cmp(&b.similarity)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                Ok(best)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Overwrite the centroid and tightness of every cluster member
    /// identically. Member embeddings are untouched.
    pub async fn update_cluster(
        &self,
        centroid_id: &str,
        centroid: &[f32],
        tightness: f64,
    ) -> Result<(), StoryloomError> {
        let centroid_id = centroid_id.to_string();
        let blob = vec_to_blob(centroid);
        self.db
            .connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE memory_items SET centroid_embedding = ?1, \
                     cluster_tightness = ?2, \
                     last_updated = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
                     WHERE centroid_id = ?3",
                    rusqlite::params![blob, tightness, centroid_id],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Re-score an item in place. The tier never changes.
    pub async fn update_scores(
        &self,
        id: &str,
        score: &QualityScore,
    ) -> Result<(), StoryloomError> {
        let id = id.to_string();
        let (final_score, llm_score, feedback_score) =
            (score.final_score, score.llm_score, score.user_feedback_score);
        self.db
            .connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE memory_items SET quality_score = ?1, llm_score = ?2, \
                     user_feedback_score = ?3, \
                     last_updated = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
                     WHERE id = ?4",
                    rusqlite::params![final_score, llm_score, feedback_score, id],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }
}

/// Persistent store for the static paragraph knowledge base.
#[derive(Clone)]
pub struct ParagraphStore {
    db: Database,
}

impl ParagraphStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a paragraph ingested by the chapter pipeline.
    pub async fn insert(&self, paragraph: &Paragraph) -> Result<(), StoryloomError> {
        let p = paragraph.clone();
        self.db
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO paragraphs (id, book_id, chapter_id, content, embedding, \
                     meta, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        p.id,
                        p.book_id,
                        p.chapter_id,
                        p.content,
                        vec_to_blob(&p.embedding),
                        serde_json::to_string(&p.meta).unwrap_or_else(|_| "{}".to_string()),
                        p.created_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Cosine similarity search, optionally scoped to one book.
    pub async fn search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f64,
        book_id: Option<&str>,
    ) -> Result<Vec<RankedResult>, StoryloomError> {
        let query = query.to_vec();
        let book_id = book_id.map(|s| s.to_string());
        self.db
            .connection()
            .call(move |conn| {
                let (sql, params): (&str, Vec<&dyn rusqlite::types::ToSql>) = match &book_id
                {
                    Some(book) => (
                        "SELECT id, content, embedding, meta FROM paragraphs \
                         WHERE book_id = ?1",
                        vec![book as &dyn rusqlite::types::ToSql],
                    ),
                    None => ("SELECT id, content, embedding, meta FROM paragraphs", vec![]),
                };
                let mut stmt = conn.prepare(sql)?;
                let mut results: Vec<RankedResult> = stmt
                    .query_map(params.as_slice(), |row| {
                        let id: String = row.get(0)?;
                        let content: String = row.get(1)?;
                        let blob: Vec<u8> = row.get(2)?;
                        let meta: String = row.get(3)?;
                        Ok((id, content, blob_to_vec(&blob), meta))
                    })?
                    .filter_map(|r| r.ok())
                    .filter(|(_, _, embedding, _)| embedding.len() == query.len())
                    .filter_map(|(id, content, embedding, meta)| {
                        let similarity = cosine_similarity(&query, &embedding);
                        if similarity as f64 >= threshold {
                            Some(RankedResult {
                                id,
                                content,
                                similarity,
                                meta: decode_meta(&meta),
                                origin: ResultOrigin::StaticKb,
                            })
                        } else {
                            None
                        }
                    })
                    .collect();
                results.sort_by(|a, b| {
                    b.similarity
                        .partial_cmp(&a.similarity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                results.truncate(limit);
                Ok(results)
            })
            .await
            .map_err(map_tr_err)
    }
}
