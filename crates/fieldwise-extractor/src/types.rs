//! Data passed between pipeline stages and returned to callers

use crate::progress::ChunkStatus;
use fieldwise_domain::{Confidence, RunId, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A worked example shown to the model before the real chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    /// Example source text
    pub text: String,
    /// The JSON object the model should produce for `text`
    pub output: String,
}

/// Category of a per-field validation problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A required field was absent or null
    Missing,
    /// The value could not be coerced to the field's type
    TypeMismatch,
    /// The value did not match the field's validation pattern
    PatternMismatch,
    /// A date could not be normalized and was kept as written
    MalformedDate,
    /// A unique field received several values; the first was kept
    UnexpectedList,
    /// A timeline entry was not an object and was dropped
    InvalidEvent,
}

/// A problem found while validating one field of one chunk
///
/// Issues are data, never errors: the field stays in the record as null or
/// as a best-effort value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Field the issue belongs to
    pub field: String,
    /// Category
    pub kind: IssueKind,
    /// Human-readable detail
    pub message: String,
}

impl ValidationIssue {
    pub(crate) fn new(field: &str, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validated field values from one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFields {
    /// Chunk the values came from
    pub chunk_index: usize,
    /// Field name to value (null when absent)
    pub values: BTreeMap<String, Value>,
    /// Field name to confidence
    pub confidence: BTreeMap<String, Confidence>,
    /// Validation issues found in this chunk
    pub issues: Vec<ValidationIssue>,
    /// Tokens spent on the successful attempt
    pub token_usage: TokenUsage,
}

impl ExtractedFields {
    /// Confidence for `field` (0.0 when unknown)
    pub fn confidence_of(&self, field: &str) -> Confidence {
        self.confidence.get(field).copied().unwrap_or(Confidence::ABSENT)
    }
}

/// Extracted fields after temporal normalization
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFields {
    /// Values with date fields standardized to ISO 8601 where possible
    pub fields: ExtractedFields,
    /// Timeline derived from this chunk's timeline fields, if any
    pub timeline: Option<Vec<TimelineEntry>>,
}

/// One date on a timeline, with everything observed on that date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// ISO 8601 date, or the raw text when normalization failed
    pub date: String,
    /// Whether `date` is a normalized ISO value
    pub normalized: bool,
    /// Event payload; keys seen with several values hold a list
    pub data: Map<String, Value>,
}

impl TimelineEntry {
    /// JSON form used inside merged timeline fields
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("date".to_string(), Value::String(self.date.clone()));
        obj.insert("data".to_string(), Value::Object(self.data.clone()));
        Value::Object(obj)
    }
}

/// A value for a unique field that lost to the promoted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// The losing value
    pub value: Value,
    /// Chunk that reported it
    pub chunk_index: usize,
    /// Confidence it was reported with
    pub confidence: f64,
}

/// The single merged result of a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    /// Field name to merged value: scalar or null for unique fields, list otherwise
    pub fields: BTreeMap<String, Value>,
    /// Field name to the chunks that contributed the merged value
    pub provenance: BTreeMap<String, Vec<usize>>,
    /// Field name to merged confidence
    pub confidence: BTreeMap<String, f64>,
    /// Field name to competing values (unique fields only)
    pub conflicts: BTreeMap<String, Vec<Conflict>>,
    /// Combined chronology of all timeline fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Vec<TimelineEntry>>,
}

impl MergedRecord {
    /// Merged value of `field`
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Conflicts recorded for `field` (empty slice when none)
    pub fn conflicts_for(&self, field: &str) -> &[Conflict] {
        self.conflicts.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A non-fatal problem surfaced alongside a successful result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// A chunk failed every attempt and was left out of the merge
    ChunkFailed {
        /// Failed chunk
        chunk: usize,
        /// Attempts made
        attempts: u32,
        /// Last error
        reason: String,
    },
    /// A chunk was still running when the document deadline expired
    ChunkAbandoned {
        /// Abandoned chunk
        chunk: usize,
    },
    /// A field of a successful chunk failed validation
    Validation {
        /// Chunk the issue came from
        chunk: usize,
        /// The issue
        issue: ValidationIssue,
    },
}

impl PipelineWarning {
    /// Chunk the warning refers to
    pub fn chunk(&self) -> usize {
        match self {
            PipelineWarning::ChunkFailed { chunk, .. }
            | PipelineWarning::ChunkAbandoned { chunk }
            | PipelineWarning::Validation { chunk, .. } => *chunk,
        }
    }
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::ChunkFailed { chunk, attempts, reason } => {
                write!(f, "chunk {} failed after {} attempt(s): {}", chunk, attempts, reason)
            }
            PipelineWarning::ChunkAbandoned { chunk } => {
                write!(f, "chunk {} abandoned at document timeout", chunk)
            }
            PipelineWarning::Validation { chunk, issue } => {
                write!(f, "chunk {}: {}", chunk, issue)
            }
        }
    }
}

/// Final state of one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Chunk index
    pub index: usize,
    /// Terminal status
    pub status: ChunkStatus,
    /// Attempts made
    pub attempts: u32,
    /// Last error, if the chunk did not complete
    pub last_error: Option<String>,
}

/// Metadata about an extraction run
#[derive(Debug, Clone)]
pub struct ExtractionMetadata {
    /// Run identifier
    pub run_id: RunId,
    /// Name of the model used
    pub model_name: String,
    /// Chunks produced from the document
    pub total_chunks: usize,
    /// Chunks whose values reached the merge
    pub chunks_succeeded: usize,
    /// Chunks that failed or were abandoned
    pub chunks_failed: usize,
    /// Tokens spent by successful attempts
    pub token_usage: TokenUsage,
    /// Per-chunk results, in chunk order
    pub chunk_outcomes: Vec<ChunkOutcome>,
    /// Wall time in milliseconds
    pub processing_time_ms: u64,
}

/// Result of a successful `extract` call
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// The merged record
    pub record: MergedRecord,
    /// Non-fatal problems, in chunk order
    pub warnings: Vec<PipelineWarning>,
    /// Run metadata
    pub metadata: ExtractionMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_warning_names_chunk() {
        let warning = PipelineWarning::ChunkFailed {
            chunk: 3,
            attempts: 3,
            reason: "inference timed out".into(),
        };
        assert_eq!(warning.chunk(), 3);
        assert_eq!(
            warning.to_string(),
            "chunk 3 failed after 3 attempt(s): inference timed out"
        );
    }

    #[test]
    fn test_warning_serializes_with_kind_tag() {
        let warning = PipelineWarning::ChunkAbandoned { chunk: 2 };
        let value = serde_json::to_value(&warning).unwrap();
        assert_eq!(value, json!({"kind": "chunk_abandoned", "chunk": 2}));
    }

    #[test]
    fn test_timeline_entry_value_shape() {
        let mut data = Map::new();
        data.insert("event".into(), json!("Admission"));
        let entry = TimelineEntry {
            date: "2023-01-05".into(),
            normalized: true,
            data,
        };
        assert_eq!(
            entry.to_value(),
            json!({"date": "2023-01-05", "data": {"event": "Admission"}})
        );
    }

    #[test]
    fn test_conflicts_for_missing_field() {
        let record = MergedRecord::default();
        assert!(record.conflicts_for("nothing").is_empty());
        assert!(record.get("nothing").is_none());
    }

    #[test]
    fn test_confidence_of_unknown_field() {
        let fields = ExtractedFields {
            chunk_index: 0,
            values: BTreeMap::new(),
            confidence: BTreeMap::new(),
            issues: Vec::new(),
            token_usage: TokenUsage::default(),
        };
        assert_eq!(fields.confidence_of("x"), Confidence::ABSENT);
    }
}
