// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes, such as threshold ranges and non-empty paths.

use crate::diagnostic::ConfigError;
use crate::model::StoryloomConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &StoryloomConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.agent.log_level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "agent.log_level must be one of {}, got `{}`",
                LOG_LEVELS.join(", "),
                config.agent.log_level
            ),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.openai.api_base.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "openai.api_base must not be empty".to_string(),
        });
    }

    if config.openai.max_tokens < 1 {
        errors.push(ConfigError::Validation {
            message: format!(
                "openai.max_tokens must be at least 1, got {}",
                config.openai.max_tokens
            ),
        });
    }

    for (key, value) in [
        ("comrag.quality_cutoff", config.comrag.quality_cutoff),
        (
            "comrag.centroid_attach_threshold",
            config.comrag.centroid_attach_threshold,
        ),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ConfigError::Validation {
                message: format!("{key} must be within [0, 1], got {value}"),
            });
        }
    }

    if config.comrag.tightness_scale <= 0.0 {
        errors.push(ConfigError::Validation {
            message: format!(
                "comrag.tightness_scale must be positive, got {}",
                config.comrag.tightness_scale
            ),
        });
    }

    if !(0.0..=2.0).contains(&config.comrag.scoring_temperature) {
        errors.push(ConfigError::Validation {
            message: format!(
                "comrag.scoring_temperature must be within [0, 2], got {}",
                config.comrag.scoring_temperature
            ),
        });
    }

    if config.comrag.max_scoring_contexts < 1 {
        errors.push(ConfigError::Validation {
            message: "comrag.max_scoring_contexts must be at least 1".to_string(),
        });
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = StoryloomConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn bad_log_level_rejected() {
        let mut config = StoryloomConfig::default();
        config.agent.log_level = "verbose".to_string();
        let errors = validate_config(&config).expect_err("should fail");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("log_level"));
    }

    #[test]
    fn out_of_range_thresholds_rejected() {
        let mut config = StoryloomConfig::default();
        config.comrag.quality_cutoff = 1.5;
        config.comrag.centroid_attach_threshold = -0.1;
        let errors = validate_config(&config).expect_err("should fail");
        assert_eq!(errors.len(), 2, "errors are collected, not fail-fast");
    }

    #[test]
    fn zero_tightness_scale_rejected() {
        let mut config = StoryloomConfig::default();
        config.comrag.tightness_scale = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn empty_database_path_rejected() {
        let mut config = StoryloomConfig::default();
        config.storage.database_path = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }
}
