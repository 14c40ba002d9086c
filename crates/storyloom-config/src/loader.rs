// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./storyloom.toml` > `~/.config/storyloom/storyloom.toml`
//! > `/etc/storyloom/storyloom.toml` with environment variable overrides via
//! the `STORYLOOM_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::StoryloomConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/storyloom/storyloom.toml` (system-wide)
/// 3. `~/.config/storyloom/storyloom.toml` (user XDG config)
/// 4. `./storyloom.toml` (local directory)
/// 5. `STORYLOOM_*` environment variables
pub fn load_config() -> Result<StoryloomConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(StoryloomConfig::default()))
        .merge(Toml::file("/etc/storyloom/storyloom.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("storyloom/storyloom.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("storyloom.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env vars).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<StoryloomConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(StoryloomConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<StoryloomConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(StoryloomConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names. For example, `STORYLOOM_OPENAI_API_KEY`
/// must map to `openai.api_key`, not `openai.api.key`.
fn env_provider() -> Env {
    Env::prefixed("STORYLOOM_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: STORYLOOM_OPENAI_API_KEY -> "openai_api_key"
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("agent_", "agent.", 1)
            .replacen("openai_", "openai.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("comrag_", "comrag.", 1);
        mapped.into()
    })
}
