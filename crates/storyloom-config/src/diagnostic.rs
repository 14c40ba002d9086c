// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-to-miette error bridge with fuzzy match suggestions.
//!
//! Converts Figment deserialization errors into miette diagnostics with
//! valid key listings and "did you mean?" suggestions using Jaro-Winkler
//! string similarity.

use miette::Diagnostic;
use thiserror::Error;

/// Minimum Jaro-Winkler similarity score to suggest a correction.
/// 0.75 catches common typos like `qulity_cutoff` -> `quality_cutoff`
/// while filtering noise.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration error with diagnostic information.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// An unknown key was found in the configuration.
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(storyloom::config::unknown_key),
        help("{}", format_unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        /// The unrecognized key name, section-qualified where known.
        key: String,
        /// Suggested correction via fuzzy matching, if any.
        suggestion: Option<String>,
        /// List of valid keys for the section.
        valid_keys: String,
    },

    /// A configuration value has the wrong type.
    #[error("invalid type for key `{key}`: {detail}")]
    #[diagnostic(code(storyloom::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        /// The key with the wrong type.
        key: String,
        /// Description of the type mismatch.
        detail: String,
        /// What type was expected.
        expected: String,
    },

    /// A parse error not attributable to a specific key.
    #[error("configuration parse error: {message}")]
    #[diagnostic(code(storyloom::config::parse))]
    Parse {
        /// The underlying figment error message.
        message: String,
    },

    /// A semantic validation error for a config value.
    #[error("validation error: {message}")]
    #[diagnostic(code(storyloom::config::validation))]
    Validation {
        /// Description of the violated constraint.
        message: String,
    },
}

fn format_unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? valid keys are: {valid_keys}"),
        None => format!("valid keys are: {valid_keys}"),
    }
}

/// Convert a figment error into one `ConfigError` per underlying problem.
pub fn figment_to_config_errors(err: figment::Error) -> Vec<ConfigError> {
    err.into_iter()
        .map(|e| {
            let path = e.path.join(".");
            match &e.kind {
                figment::error::Kind::UnknownField(field, expected) => {
                    let key = if path.is_empty() {
                        field.clone()
                    } else {
                        format!("{path}.{field}")
                    };
                    ConfigError::UnknownKey {
                        key,
                        suggestion: suggest(field, expected),
                        valid_keys: expected.join(", "),
                    }
                }
                figment::error::Kind::InvalidType(actual, expected) => {
                    ConfigError::InvalidType {
                        key: path,
                        detail: format!("found {actual}"),
                        expected: expected.clone(),
                    }
                }
                _ => ConfigError::Parse {
                    message: e.to_string(),
                },
            }
        })
        .collect()
}

/// Find the closest valid key to a mistyped one, if any is close enough.
fn suggest(field: &str, valid: &[&str]) -> Option<String> {
    valid
        .iter()
        .map(|candidate| (candidate, strsim::jaro_winkler(field, candidate)))
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(candidate, _)| candidate.to_string())
}

/// Render configuration errors to stderr, one diagnostic per error.
pub fn render_errors(errors: &[ConfigError]) {
    for error in errors {
        eprintln!("error: {error}");
        if let Some(help) = error.help() {
            eprintln!("  help: {help}");
        }
    }
    eprintln!(
        "\n{} configuration error(s) found -- fix storyloom.toml and retry",
        errors.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggest_close_typo() {
        let valid = ["quality_cutoff", "tightness_scale", "scoring_model"];
        assert_eq!(
            suggest("qulity_cutoff", &valid),
            Some("quality_cutoff".to_string())
        );
    }

    #[test]
    fn suggest_nothing_for_distant_key() {
        let valid = ["name", "log_level"];
        assert_eq!(suggest("zzzzzz", &valid), None);
    }

    #[test]
    fn unknown_key_help_mentions_suggestion() {
        let err = ConfigError::UnknownKey {
            key: "agent.nmae".into(),
            suggestion: Some("name".into()),
            valid_keys: "name, log_level".into(),
        };
        let help = err.help().expect("should have help").to_string();
        assert!(help.contains("did you mean `name`?"));
    }

    #[test]
    fn figment_error_converts_to_diagnostics() {
        let err = crate::loader::load_config_from_str(
            r#"
            [agent]
            nmae = "typo"
            "#,
        )
        .expect_err("typo key must fail");
        let errors = figment_to_config_errors(err);
        assert!(!errors.is_empty());
    }
}
