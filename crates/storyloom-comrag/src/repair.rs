// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Best-effort JSON repair and parsing.
//!
//! LLM output and client-authored formulas routinely arrive wrapped in
//! markdown fences, with trailing commas, bare keys, or unclosed brackets.
//! `repair_and_parse` never errors: it either recovers a value or returns
//! the caller-supplied default.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Matches an unquoted object key: `{foo:` or `, bar :`.
static BARE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("static regex")
});

/// Parse `text` as JSON, repairing common defects first. Returns `default`
/// on total failure.
///
/// Repair pipeline: strip markdown code fences, isolate the outermost
/// JSON-looking span, remove trailing commas, quote bare object keys,
/// balance unclosed brackets. Each parse attempt short-circuits.
pub fn repair_and_parse(text: &str, default: Value) -> Value {
    let stripped = strip_code_fences(text);
    let candidate = isolate_json_span(stripped.trim());
    if candidate.is_empty() {
        return default;
    }

    if let Ok(value) = serde_json::from_str(candidate) {
        return value;
    }

    let repaired = balance_brackets(&quote_bare_keys(&strip_trailing_commas(candidate)));
    match serde_json::from_str(&repaired) {
        Ok(value) => value,
        Err(_) => default,
    }
}

/// Remove markdown code fences, keeping the fenced body when present.
fn strip_code_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    // Skip the fence line itself (which may carry a language tag).
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// Take from the first `{` or `[` through the matching close bracket, or
/// through the end of input when unbalanced.
fn isolate_json_span(text: &str) -> &str {
    let Some(start) = text.find(['{', '[']) else {
        return "";
    };
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &text[start..=i];
                }
            }
            _ => {}
        }
    }
    &text[start..]
}

/// Remove commas immediately preceding a closing bracket, outside strings.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '}' | ']' => {
                // Drop a dangling comma (and whitespace after it).
                while let Some(last) = out.chars().last() {
                    if last.is_whitespace() || last == ',' {
                        out.pop();
                    } else {
                        break;
                    }
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Quote unquoted object keys.
fn quote_bare_keys(text: &str) -> String {
    BARE_KEY.replace_all(text, "$1\"$2\":").into_owned()
}

/// Append closers for any brackets left open at end of input.
fn balance_brackets(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    let mut out = text.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}
