// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `storyloom search` command implementation.

use std::sync::Arc;

use storyloom_comrag::{FormulaEvaluator, MemoryStore, ParagraphStore, ResultOrigin};
use storyloom_config::StoryloomConfig;
use storyloom_core::StoryloomError;
use storyloom_openai::OpenAiEmbedder;
use storyloom_storage::Database;
use tracing::debug;

/// Parse the formula expression, evaluate it, and print ranked results.
pub async fn run_search(
    config: &StoryloomConfig,
    formula: &str,
    query: Option<&str>,
) -> Result<(), StoryloomError> {
    let plan = storyloom_comrag::parse(formula);
    debug!(?plan, "formula parsed");

    let db = Database::open(&config.storage.database_path, config.storage.wal_mode).await?;
    let embedder = Arc::new(OpenAiEmbedder::new(config)?);
    let evaluator = FormulaEvaluator::new(
        MemoryStore::new(db.clone()),
        ParagraphStore::new(db.clone()),
        embedder,
    );

    let results = evaluator.evaluate(&plan, query).await?;
    if results.is_empty() {
        println!("no results");
    }
    for (rank, result) in results.iter().enumerate() {
        let origin = match result.origin {
            ResultOrigin::HighMemory => "memory",
            ResultOrigin::StaticKb => "static",
        };
        println!(
            "{:>3}. [{origin}] {:.4} {} {}",
            rank + 1,
            result.similarity,
            result.id,
            preview(&result.content)
        );
    }

    db.close().await
}

/// First line of the content, capped for terminal output.
fn preview(content: &str) -> String {
    const MAX: usize = 96;
    let line = content.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(MAX).collect();
    if line.chars().count() > MAX {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_lines() {
        let long = "x".repeat(200);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 99);
    }

    #[test]
    fn preview_keeps_first_line() {
        assert_eq!(preview("first\nsecond"), "first");
        assert_eq!(preview(""), "");
    }
}
