// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. Do NOT create additional Connection instances for writes.

use std::path::Path;

use tokio_rusqlite::Connection;
use tracing::debug;

use storyloom_core::StoryloomError;

use crate::migrations::run_migrations;

/// Helper to convert tokio_rusqlite errors into StoryloomError::Storage.
pub fn map_tr_err(e: tokio_rusqlite::Error) -> StoryloomError {
    StoryloomError::Storage {
        source: Box::new(e),
    }
}

/// A handle to the single-writer SQLite database.
///
/// Cloning is cheap; all clones share one background connection thread,
/// which serializes writes and eliminates SQLITE_BUSY under concurrency.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path`, apply PRAGMAs, and run
    /// all pending migrations.
    pub async fn open(path: impl AsRef<Path>, wal_mode: bool) -> Result<Self, StoryloomError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoryloomError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = Connection::open(path).await.map_err(map_tr_err)?;
        Self::initialize(conn, wal_mode).await
    }

    /// Open an in-memory database with the full migrated schema.
    ///
    /// Used by tests; WAL mode is meaningless in memory and skipped.
    pub async fn open_in_memory() -> Result<Self, StoryloomError> {
        let conn = Connection::open_in_memory().await.map_err(map_tr_err)?;
        Self::initialize(conn, false).await
    }

    async fn initialize(conn: Connection, wal: bool) -> Result<Self, StoryloomError> {
        conn.call(move |conn| {
            // journal_mode returns a row, so execute_batch rather than execute.
            if wal {
                conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            }
            conn.execute_batch(
                "PRAGMA synchronous=NORMAL;
                 PRAGMA foreign_keys=ON;
                 PRAGMA busy_timeout=5000;",
            )?;
            run_migrations(conn)
                .map_err(|e| tokio_rusqlite::Error::Other(e.to_string().into()))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        debug!("database opened, PRAGMAs applied, migrations current");
        Ok(Self { conn })
    }

    /// Returns the shared connection handle.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Checkpoint the WAL and release resources.
    pub async fn close(&self) -> Result<(), StoryloomError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_database_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loom.db");
        let _db = Database::open(&path, true).await.unwrap();
        assert!(path.exists(), "database file should be created");
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/loom.db");
        let _db = Database::open(&path, true).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn migrations_create_core_tables() {
        let db = Database::open_in_memory().await.unwrap();
        let tables: Vec<String> = db
            .connection()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .unwrap();

        assert!(tables.contains(&"paragraphs".to_string()));
        assert!(tables.contains(&"memory_items".to_string()));
        assert!(tables.contains(&"user_feedback".to_string()));
    }

    #[tokio::test]
    async fn reopen_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");
        {
            let db = Database::open(&path, true).await.unwrap();
            db.close().await.unwrap();
        }
        // Migrations already applied; second open must not fail.
        let _db = Database::open(&path, true).await.unwrap();
    }
}
