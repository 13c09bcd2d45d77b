//! Field specifications
//!
//! A `FieldSpec` describes one target field of the output record. Specs are
//! supplied by the caller (usually loaded from a catalog file) and are
//! read-only to the pipeline.

use serde::{Deserialize, Serialize};

/// Value type of a target field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Free text
    String,
    /// A calendar date, normalized to ISO 8601
    Date,
    /// A numeric value
    Number,
    /// true / false
    Boolean,
    /// A list of date-bearing events
    Timeline,
}

impl FieldType {
    /// Lowercase name used in prompts and catalogs
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Date => "date",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Timeline => "timeline",
        }
    }
}

/// Declarative description of a target field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name as it appears in the output record
    pub name: String,

    /// Human-readable description shown to the model
    #[serde(default)]
    pub description: String,

    /// Value type
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// A unique field holds one scalar (or null); otherwise a list
    #[serde(default)]
    pub unique: bool,

    /// Whether absence should be reported as a validation issue
    #[serde(default)]
    pub required: bool,

    /// Optional regex the value's text form must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// For timeline fields: the event key holding the date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_field: Option<String>,

    /// For timeline fields: event keys kept in each entry (empty = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_fields: Vec<String>,
}

impl FieldSpec {
    /// Create a non-unique, optional field
    pub fn new(name: impl Into<String>, description: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            field_type,
            unique: false,
            required: false,
            pattern: None,
            date_field: None,
            payload_fields: Vec::new(),
        }
    }

    /// Mark the field as holding a single value
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark the field as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach a validation pattern
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Designate the event key holding the date (timeline fields)
    pub fn with_date_field(mut self, date_field: impl Into<String>) -> Self {
        self.date_field = Some(date_field.into());
        self
    }

    /// Restrict the event keys kept in timeline entries
    pub fn with_payload_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.payload_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Whether merged output for this field is a scalar
    ///
    /// Timeline fields are always lists regardless of the uniqueness flag.
    pub fn is_scalar(&self) -> bool {
        self.unique && self.field_type != FieldType::Timeline
    }

    /// Check internal consistency of the spec
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("field name is empty".to_string());
        }
        if self.field_type == FieldType::Timeline && self.date_field.is_none() {
            return Err(format!("timeline field '{}' has no date_field", self.name));
        }
        if self.field_type == FieldType::Timeline && self.unique {
            return Err(format!("timeline field '{}' cannot be unique", self.name));
        }
        Ok(())
    }
}
