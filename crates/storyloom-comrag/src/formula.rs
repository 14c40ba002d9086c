// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Formula parsing: structured (JSON) or shorthand (DSL) retrieval requests.
//!
//! Formula authors mix hand-written shorthand and machine-generated JSON,
//! so `parse` degrades gracefully instead of hard-failing: JSON first
//! (with a repair pass), then line-oriented DSL, and in the worst case an
//! all-defaults plan whose empty query evaluates to an empty result set.
//!
//! The serialized JSON shape of [`FormulaPlan`] is an external format:
//! client-authored formulas are persisted and re-parsed, so field names
//! must be preserved bit-for-bit.

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::repair::repair_and_parse;

/// Result ordering for ranked retrieval output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    SimilarityDesc,
    SimilarityAsc,
}

/// Retrieval mode selecting which stores an evaluation queries.
///
/// Unrecognized mode strings are preserved as [`ComragMode::Legacy`] and
/// dispatch to the static knowledge base only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComragMode {
    RetrieveHigh,
    GenerateWithHigh,
    GenerateExcludingLow,
    Legacy(String),
}

impl Default for ComragMode {
    fn default() -> Self {
        ComragMode::RetrieveHigh
    }
}

impl ComragMode {
    pub fn as_str(&self) -> &str {
        match self {
            ComragMode::RetrieveHigh => "retrieve_high",
            ComragMode::GenerateWithHigh => "generate_with_high",
            ComragMode::GenerateExcludingLow => "generate_excluding_low",
            ComragMode::Legacy(s) => s.as_str(),
        }
    }

    pub fn from_str_value(s: &str) -> Self {
        match s {
            "retrieve_high" => ComragMode::RetrieveHigh,
            "generate_with_high" => ComragMode::GenerateWithHigh,
            "generate_excluding_low" => ComragMode::GenerateExcludingLow,
            other => ComragMode::Legacy(other.to_string()),
        }
    }
}

impl Serialize for ComragMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ComragMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ComragMode::from_str_value(&s))
    }
}

/// A typed retrieval plan: the evaluation request produced by [`parse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormulaPlan {
    /// Free-text semantic query. May be empty only if a supplemental query
    /// is supplied at evaluation time.
    pub query: Option<String>,
    /// Maximum results returned.
    pub top_k: usize,
    /// Minimum cosine similarity to include a result.
    pub threshold: f64,
    pub order: SortOrder,
    /// AND across fields; OR within a field's values.
    pub meta_filters: BTreeMap<String, Vec<String>>,
    /// Optional scope restriction for static-knowledge search.
    pub book_id: Option<String>,
    pub comrag_mode: ComragMode,
    /// Whether evaluation triggers write-back after downstream scoring.
    pub update_memory: bool,
    /// Score at/above which a new memory item lands in the high store.
    pub quality_threshold: f64,
    /// Whether modes that support it also query the static knowledge base.
    pub static_kb: bool,
}

impl Default for FormulaPlan {
    fn default() -> Self {
        Self {
            query: None,
            top_k: 10,
            threshold: 0.7,
            order: SortOrder::default(),
            meta_filters: BTreeMap::new(),
            book_id: None,
            comrag_mode: ComragMode::default(),
            update_memory: true,
            quality_threshold: 0.7,
            static_kb: true,
        }
    }
}

/// Parse a formula expression into a plan. Total: never errors.
///
/// 1. If the trimmed input starts with `{` or `[`, attempt JSON parsing
///    with a repair pass. A structural error (non-coercible numeric)
///    abandons the JSON branch entirely rather than partially populating.
/// 2. Otherwise, or on JSON failure, the ORIGINAL trimmed string goes
///    through line-oriented DSL parsing. Unrecognized lines are ignored.
pub fn parse(expression: &str) -> FormulaPlan {
    let trimmed = expression.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value = repair_and_parse(trimmed, Value::Null);
        if let Some(plan) = plan_from_json(&value) {
            return plan;
        }
    }
    parse_dsl(trimmed)
}

/// Populate a plan from a parsed JSON object. Returns `None` when the
/// value is not an object or a numeric field cannot be coerced.
fn plan_from_json(value: &Value) -> Option<FormulaPlan> {
    let obj = value.as_object()?;
    let mut plan = FormulaPlan::default();

    if let Some(v) = present(obj.get("query")) {
        plan.query = Some(coerce_string(v)?).filter(|s| !s.is_empty());
    }
    if let Some(v) = present(obj.get("top_k")) {
        plan.top_k = coerce_usize(v)?.max(1);
    }
    if let Some(v) = present(obj.get("threshold")) {
        plan.threshold = clamp01(coerce_f64(v)?);
    }
    if let Some(v) = present(obj.get("quality_threshold")) {
        plan.quality_threshold = clamp01(coerce_f64(v)?);
    }
    if let Some(v) = present(obj.get("order")) {
        plan.order = parse_order(&coerce_string(v)?);
    }
    if let Some(v) = present(obj.get("comrag_mode")) {
        plan.comrag_mode = ComragMode::from_str_value(&coerce_string(v)?);
    }
    if let Some(v) = present(obj.get("book_id")) {
        plan.book_id = Some(coerce_string(v)?).filter(|s| !s.is_empty());
    }
    if let Some(v) = present(obj.get("update_memory")) {
        plan.update_memory = coerce_bool(v).unwrap_or(plan.update_memory);
    }
    if let Some(v) = present(obj.get("static_kb")) {
        plan.static_kb = coerce_bool(v).unwrap_or(plan.static_kb);
    }
    if let Some(filters) = present(obj.get("meta_filters")).and_then(Value::as_object) {
        for (field, expected) in filters {
            let values = filter_values(expected);
            if !values.is_empty() {
                plan.meta_filters.insert(field.clone(), values);
            }
        }
    }

    Some(plan)
}

/// Treat explicit JSON null the same as a missing key.
fn present(v: Option<&Value>) -> Option<&Value> {
    v.filter(|v| !v.is_null())
}

fn coerce_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integer coercion: accepts numbers and numeric strings.
fn coerce_usize(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|n| n as usize),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    }
}

/// Float coercion: accepts numbers and numeric strings.
fn coerce_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn coerce_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A filter value may be a single scalar or a list of scalars.
fn filter_values(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items.iter().filter_map(coerce_string).collect(),
        other => coerce_string(other).into_iter().collect(),
    }
}

fn parse_order(s: &str) -> SortOrder {
    if s.eq_ignore_ascii_case("similarity_asc") || s.eq_ignore_ascii_case("asc") {
        SortOrder::SimilarityAsc
    } else {
        SortOrder::SimilarityDesc
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Line-oriented DSL fallback with case-insensitive keyword prefixes.
/// Later directives override earlier ones; unset fields keep defaults.
fn parse_dsl(expression: &str) -> FormulaPlan {
    let mut plan = FormulaPlan::default();

    for line in expression.lines() {
        let line = line.trim();
        let Some((keyword, rest)) = line.split_once(':') else {
            continue;
        };
        let rest = rest.trim();
        match keyword.trim().to_ascii_uppercase().as_str() {
            "QUERY" => {
                if !rest.is_empty() {
                    plan.query = Some(rest.to_string());
                }
            }
            "TAKE" => {
                if let Ok(n) = rest.parse::<usize>() {
                    plan.top_k = n.max(1);
                }
            }
            "THRESHOLD" => {
                if let Ok(t) = rest.parse::<f64>() {
                    plan.threshold = clamp01(t);
                }
            }
            "ORDER" => plan.order = parse_order(rest),
            "FILTER" => {
                // Semicolon-separated `key=value1,value2` groups.
                for group in rest.split(';') {
                    let Some((field, values)) = group.split_once('=') else {
                        continue;
                    };
                    let field = field.trim();
                    let values: Vec<String> = values
                        .split(',')
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                        .collect();
                    if !field.is_empty() && !values.is_empty() {
                        plan.meta_filters.insert(field.to_string(), values);
                    }
                }
            }
            _ => {}
        }
    }

    plan
}
