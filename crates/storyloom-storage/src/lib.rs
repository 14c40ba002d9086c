// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Storyloom retrieval backend.
//!
//! Provides WAL-mode SQLite storage with embedded migrations and a
//! single-writer concurrency model via `tokio-rusqlite`. The schema holds
//! the static paragraph knowledge base, the quality-partitioned memory
//! items, and the append-only user feedback log; typed access lives in
//! `storyloom-comrag`.

pub mod database;
pub mod migrations;

pub use database::{Database, map_tr_err};
