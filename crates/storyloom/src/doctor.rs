// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `storyloom doctor` command implementation.
//!
//! Runs diagnostic checks against the Storyloom environment to identify
//! configuration, storage, and adapter problems before they surface as
//! runtime failures.

use std::time::{Duration, Instant};

use storyloom_config::StoryloomConfig;
use storyloom_core::{HealthStatus, PluginAdapter, StoryloomError};
use storyloom_openai::{OpenAiEmbedder, OpenAiProvider};
use storyloom_storage::Database;

/// Status of a diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Result of a single diagnostic check.
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    message: String,
    duration: Duration,
}

/// Run the `storyloom doctor` command. Errors if any check fails.
pub async fn run_doctor(config: &StoryloomConfig) -> Result<(), StoryloomError> {
    let results = vec![
        check_database(config).await,
        check_adapter("provider", || OpenAiProvider::new(config)).await,
        check_adapter("embedder", || OpenAiEmbedder::new(config)).await,
    ];

    println!();
    println!("  storyloom doctor");
    println!("  {}", "-".repeat(50));

    let mut fail_count = 0;
    for result in &results {
        let tag = match result.status {
            CheckStatus::Pass => "[OK]  ",
            CheckStatus::Warn => "[WARN]",
            CheckStatus::Fail => {
                fail_count += 1;
                "[FAIL]"
            }
        };
        println!(
            "    {tag} {:<12} {} ({}ms)",
            result.name,
            result.message,
            result.duration.as_millis()
        );
    }
    println!();

    if fail_count > 0 {
        return Err(StoryloomError::Internal(format!(
            "{fail_count} diagnostic check(s) failed"
        )));
    }
    Ok(())
}

/// Open the database and apply migrations.
async fn check_database(config: &StoryloomConfig) -> CheckResult {
    let start = Instant::now();
    let outcome = match Database::open(&config.storage.database_path, config.storage.wal_mode)
        .await
    {
        Ok(db) => {
            let message = format!("opened {}", config.storage.database_path);
            match db.close().await {
                Ok(()) => (CheckStatus::Pass, message),
                Err(e) => (CheckStatus::Warn, format!("close failed: {e}")),
            }
        }
        Err(e) => (CheckStatus::Fail, e.to_string()),
    };
    CheckResult {
        name: "database",
        status: outcome.0,
        message: outcome.1,
        duration: start.elapsed(),
    }
}

/// Construct an adapter and run its health check.
async fn check_adapter<A, F>(name: &'static str, build: F) -> CheckResult
where
    A: PluginAdapter,
    F: FnOnce() -> Result<A, StoryloomError>,
{
    let start = Instant::now();
    let (status, message) = match build() {
        Ok(adapter) => match adapter.health_check().await {
            Ok(HealthStatus::Healthy) => (CheckStatus::Pass, format!("{} ok", adapter.name())),
            Ok(HealthStatus::Degraded(reason)) => (CheckStatus::Warn, reason),
            Ok(HealthStatus::Unhealthy(reason)) => (CheckStatus::Fail, reason),
            Err(e) => (CheckStatus::Fail, e.to_string()),
        },
        Err(e) => (CheckStatus::Fail, e.to_string()),
    };
    CheckResult {
        name,
        status,
        message,
        duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn database_check_passes_with_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoryloomConfig::default();
        config.storage.database_path = dir
            .path()
            .join("doctor.db")
            .display()
            .to_string();

        let result = check_database(&config).await;
        assert_eq!(result.status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn adapter_check_fails_without_api_key() {
        let mut config = StoryloomConfig::default();
        config.openai.api_key = Some(String::new());
        // Force resolution through the (empty) config and a scrubbed env.
        if std::env::var("OPENAI_API_KEY").is_err() {
            let result = check_adapter("provider", || OpenAiProvider::new(&config)).await;
            assert_eq!(result.status, CheckStatus::Fail);
        }
    }
}
