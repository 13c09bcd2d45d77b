//! Parse model output into a field map
//!
//! Models wrap JSON in prose or fenced code blocks and sometimes leave
//! trailing commas behind. The parser tries candidates in order (the whole
//! reply, each fenced block, the outermost brace span) and applies a small
//! fixed set of repairs before giving up.

use crate::error::ParseError;
use serde_json::{Map, Value};
use tracing::debug;

/// Parse a model reply into a JSON object
///
/// A top-level array holding exactly one object is accepted as that object.
pub fn parse_response(raw: &str) -> Result<Map<String, Value>, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::new("empty response", raw));
    }

    for candidate in candidates(trimmed) {
        if let Some(obj) = try_parse(&candidate) {
            return Ok(obj);
        }
        let repaired = repair(&candidate);
        if repaired != candidate {
            if let Some(obj) = try_parse(&repaired) {
                debug!("Parsed model output after repair");
                return Ok(obj);
            }
        }
    }

    Err(ParseError::new("no JSON object found in response", raw))
}

/// Texts that may hold the object, most specific first
fn candidates(text: &str) -> Vec<String> {
    let mut out = vec![text.to_string()];
    out.extend(fenced_blocks(text));
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            out.push(text[start..=end].to_string());
        }
    }
    out
}

/// Contents of ``` fenced blocks, with any language tag dropped
fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|n| n + 1).unwrap_or(0);
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(body[..close].trim().to_string());
                rest = &body[close + 3..];
            }
            None => {
                // Unterminated fence: take the remainder
                blocks.push(body.trim().to_string());
                break;
            }
        }
    }
    blocks
}

fn try_parse(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(obj) => Some(obj),
        Value::Array(mut items) if items.len() == 1 => match items.pop() {
            Some(Value::Object(obj)) => Some(obj),
            _ => None,
        },
        _ => None,
    }
}

/// Drop trailing separators and anything after the final closing brace
fn repair(text: &str) -> String {
    let mut fixed = strip_trailing_commas(text.trim());
    if let Some(end) = fixed.rfind('}') {
        fixed.truncate(end + 1);
    }
    if let Some(start) = fixed.find('{') {
        fixed.replace_range(..start, "");
    }
    fixed.trim_end_matches([',', ';']).to_string()
}

/// Remove commas that directly precede a closing brace or bracket
///
/// Text inside string literals is left untouched.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = text[i + 1..].trim_start().chars().next();
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}
