//! Per-field validation and type coercion
//!
//! Validation never fails a chunk. Every requested field ends up in the
//! output, as null or an empty list when absent, and each problem found
//! along the way is recorded as a [`ValidationIssue`].

use crate::error::PipelineError;
use crate::temporal::normalize_date;
use crate::types::{ExtractedFields, IssueKind, ValidationIssue};
use fieldwise_domain::{Confidence, FieldSpec, FieldType, TokenUsage};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use tracing::debug;

struct CompiledField {
    spec: FieldSpec,
    pattern: Option<Regex>,
}

/// Validates parsed model output against a set of field specs
pub struct FieldValidator {
    fields: Vec<CompiledField>,
}

impl FieldValidator {
    /// Check the specs and compile their patterns
    pub fn new(specs: &[FieldSpec]) -> Result<Self, PipelineError> {
        let mut fields = Vec::with_capacity(specs.len());
        for spec in specs {
            spec.validate().map_err(|reason| PipelineError::InvalidFieldSpec {
                field: spec.name.clone(),
                reason,
            })?;
            let pattern = spec
                .pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| PipelineError::InvalidFieldSpec {
                    field: spec.name.clone(),
                    reason: format!("invalid pattern: {}", e),
                })?;
            fields.push(CompiledField {
                spec: spec.clone(),
                pattern,
            });
        }
        Ok(Self { fields })
    }

    /// Coerce and check one chunk's parsed output
    pub fn validate(&self, chunk_index: usize, parsed: &Map<String, Value>) -> ExtractedFields {
        let mut values = BTreeMap::new();
        let mut confidence = BTreeMap::new();
        let mut issues = Vec::new();

        for field in &self.fields {
            let name = field.spec.name.as_str();
            let raw = blank_to_null(parsed.get(name).cloned().unwrap_or(Value::Null));
            let before = issues.len();

            let value = match field.spec.field_type {
                FieldType::Timeline => validate_timeline(&field.spec, raw, &mut issues),
                _ if field.spec.unique => field.validate_scalar(raw, &mut issues),
                _ => field.validate_list(raw, &mut issues),
            };

            let present = !is_absent(&value);
            if !present && field.spec.required {
                issues.push(ValidationIssue::new(name, IssueKind::Missing, "required field not found"));
            }

            let score = if !present {
                Confidence::ABSENT
            } else if issues.len() > before {
                Confidence::WITH_ISSUE
            } else {
                Confidence::VALID
            };

            values.insert(name.to_string(), value);
            confidence.insert(name.to_string(), score);
        }

        for key in parsed.keys() {
            if !values.contains_key(key) {
                debug!(chunk = chunk_index, key = %key, "Ignoring unrequested field");
            }
        }

        ExtractedFields {
            chunk_index,
            values,
            confidence,
            issues,
            token_usage: TokenUsage::default(),
        }
    }
}

impl CompiledField {
    fn validate_scalar(&self, raw: Value, issues: &mut Vec<ValidationIssue>) -> Value {
        let name = self.spec.name.as_str();
        let value = match raw {
            Value::Array(items) => {
                let mut present: Vec<Value> = items
                    .into_iter()
                    .map(blank_to_null)
                    .filter(|v| !v.is_null())
                    .collect();
                if present.len() > 1 {
                    issues.push(ValidationIssue::new(
                        name,
                        IssueKind::UnexpectedList,
                        format!("expected one value, got {}; kept the first", present.len()),
                    ));
                }
                if present.is_empty() {
                    Value::Null
                } else {
                    present.swap_remove(0)
                }
            }
            other => other,
        };
        if value.is_null() {
            return value;
        }
        self.check_item(value, issues)
    }

    fn validate_list(&self, raw: Value, issues: &mut Vec<ValidationIssue>) -> Value {
        let items = match raw {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            single => vec![single],
        };
        let checked = items
            .into_iter()
            .map(blank_to_null)
            .filter(|v| !v.is_null())
            .map(|v| self.check_item(v, issues))
            .collect();
        Value::Array(checked)
    }

    /// Coerce one item and apply the pattern; failures keep the raw value
    fn check_item(&self, value: Value, issues: &mut Vec<ValidationIssue>) -> Value {
        let name = self.spec.name.as_str();
        let value = match coerce(&value, self.spec.field_type) {
            Ok(coerced) => coerced,
            Err((kind, message)) => {
                issues.push(ValidationIssue::new(name, kind, message));
                value
            }
        };

        if let Some(pattern) = &self.pattern {
            let text = text_form(&value);
            if !pattern.is_match(&text) {
                issues.push(ValidationIssue::new(
                    name,
                    IssueKind::PatternMismatch,
                    format!("'{}' does not match pattern '{}'", text, pattern.as_str()),
                ));
            }
        }
        value
    }
}

/// Timeline fields always hold a list of event objects
fn validate_timeline(spec: &FieldSpec, raw: Value, issues: &mut Vec<ValidationIssue>) -> Value {
    let items = match raw {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            issues.push(ValidationIssue::new(
                &spec.name,
                IssueKind::TypeMismatch,
                format!("expected a list of events, got {}", type_name(&other)),
            ));
            Vec::new()
        }
    };

    let mut events = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(obj) => events.push(Value::Object(obj)),
            Value::Null => {}
            other => issues.push(ValidationIssue::new(
                &spec.name,
                IssueKind::InvalidEvent,
                format!("dropped non-object event {}", other),
            )),
        }
    }
    Value::Array(events)
}

type CoerceError = (IssueKind, String);

fn coerce(value: &Value, field_type: FieldType) -> Result<Value, CoerceError> {
    match field_type {
        FieldType::String => coerce_string(value),
        FieldType::Date => coerce_date(value),
        FieldType::Number => coerce_number(value),
        FieldType::Boolean => coerce_bool(value),
        // Handled by validate_timeline
        FieldType::Timeline => Ok(value.clone()),
    }
}

fn coerce_string(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(mismatch("text", other)),
    }
}

/// Dates are checked here and rewritten later by the normalizer
fn coerce_date(value: &Value) -> Result<Value, CoerceError> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => return Err(mismatch("a date", other)),
    };
    let (_, ok) = normalize_date(&text);
    if ok {
        Ok(Value::String(text))
    } else {
        Err((
            IssueKind::MalformedDate,
            format!("could not read '{}' as a date", text),
        ))
    }
}

fn coerce_number(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(*c, ',' | '$' | '€' | '£' | '¥' | ' ' | '_'))
                .collect();
            let parsed: f64 = cleaned
                .parse()
                .map_err(|_| (IssueKind::TypeMismatch, format!("could not read '{}' as a number", s)))?;
            Ok(number_value(parsed))
        }
        other => Err(mismatch("a number", other)),
    }
}

/// Integral values stay integers so "3" and 3 compare equal downstream
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn coerce_bool(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "n" | "0" => Ok(Value::Bool(false)),
            _ => Err((IssueKind::TypeMismatch, format!("could not read '{}' as true/false", s))),
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Ok(Value::Bool(true)),
            Some(0) => Ok(Value::Bool(false)),
            _ => Err(mismatch("true/false", value)),
        },
        other => Err(mismatch("true/false", other)),
    }
}

fn mismatch(expected: &str, got: &Value) -> CoerceError {
    (
        IssueKind::TypeMismatch,
        format!("expected {}, got {}", expected, type_name(got)),
    )
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn text_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Models say "nothing" in many ways; treat them all as null
fn blank_to_null(value: Value) -> Value {
    let blank = match &value {
        Value::String(s) => {
            let t = s.trim().to_lowercase();
            t.is_empty() || matches!(t.as_str(), "null" | "none" | "n/a" | "unknown" | "not_found")
        }
        _ => false,
    };
    if blank {
        Value::Null
    } else {
        value
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
