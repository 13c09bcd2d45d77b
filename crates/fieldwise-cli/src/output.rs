//! Output formatting for the CLI.

use crate::config::OutputFormat;
use crate::error::Result;
use colored::*;
use fieldwise_domain::Chunk;
use fieldwise_extractor::{ExtractionOutcome, MergedRecord, TimelineEntry};
use serde_json::Value;
use tabled::{
    builder::Builder,
    settings::{object::Rows, Alignment, Modify, Style},
};

/// Characters of chunk text shown in the chunk table
const PREVIEW_CHARS: usize = 48;

/// Output formatter.
pub struct Formatter {
    format: OutputFormat,
    color_enabled: bool,
}

impl Formatter {
    /// Create a new formatter.
    pub fn new(format: OutputFormat, color_enabled: bool) -> Self {
        Self {
            format,
            color_enabled,
        }
    }

    /// Format an extraction outcome.
    pub fn format_outcome(&self, outcome: &ExtractionOutcome) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.format_outcome_json(outcome),
            OutputFormat::Table => Ok(self.format_outcome_table(outcome)),
        }
    }

    /// Format the chunks of a document.
    pub fn format_chunks(&self, chunks: &[Chunk]) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(chunks)?),
            OutputFormat::Table => Ok(self.format_chunks_table(chunks)),
        }
    }

    fn format_outcome_json(&self, outcome: &ExtractionOutcome) -> Result<String> {
        let meta = &outcome.metadata;
        let chunks: Vec<Value> = meta
            .chunk_outcomes
            .iter()
            .map(|c| {
                serde_json::json!({
                    "index": c.index,
                    "status": c.status,
                    "attempts": c.attempts,
                    "last_error": c.last_error,
                })
            })
            .collect();

        let json = serde_json::json!({
            "record": outcome.record,
            "warnings": outcome.warnings,
            "metadata": {
                "run_id": meta.run_id.to_string(),
                "model": meta.model_name,
                "total_chunks": meta.total_chunks,
                "chunks_succeeded": meta.chunks_succeeded,
                "chunks_failed": meta.chunks_failed,
                "token_usage": meta.token_usage,
                "processing_time_ms": meta.processing_time_ms,
                "chunks": chunks,
            }
        });

        Ok(serde_json::to_string_pretty(&json)?)
    }

    fn format_outcome_table(&self, outcome: &ExtractionOutcome) -> String {
        let mut sections = vec![self.record_table(&outcome.record)];

        if let Some(timeline) = &outcome.record.timeline {
            if !timeline.is_empty() {
                sections.push(timeline_table(timeline));
            }
        }

        for warning in &outcome.warnings {
            sections.push(self.warning(&warning.to_string()));
        }

        let meta = &outcome.metadata;
        let summary = format!(
            "{}/{} chunk(s) succeeded, {} token(s), {} ms (run {})",
            meta.chunks_succeeded,
            meta.total_chunks,
            meta.token_usage.total(),
            meta.processing_time_ms,
            meta.run_id
        );
        sections.push(if meta.chunks_failed == 0 {
            self.success(&summary)
        } else {
            self.info(&summary)
        });

        sections.join("\n")
    }

    fn record_table(&self, record: &MergedRecord) -> String {
        if record.fields.is_empty() {
            return self.colorize("No fields extracted.", "yellow");
        }

        let mut builder = Builder::default();
        builder.push_record(["Field", "Value", "Confidence", "Chunks", "Conflicts"]);

        for (name, value) in &record.fields {
            let confidence = record
                .confidence
                .get(name)
                .map(|c| format!("{:.2}", c))
                .unwrap_or_default();
            let chunks = record
                .provenance
                .get(name)
                .map(|p| join_indices(p))
                .unwrap_or_default();
            let conflicts = record
                .conflicts_for(name)
                .iter()
                .map(|c| format!("{} (chunk {})", display_value(&c.value), c.chunk_index))
                .collect::<Vec<_>>()
                .join("; ");
            builder.push_record([name.clone(), display_value(value), confidence, chunks, conflicts]);
        }

        let mut table = builder.build();
        table
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()));

        table.to_string()
    }

    fn format_chunks_table(&self, chunks: &[Chunk]) -> String {
        if chunks.is_empty() {
            return self.colorize("Document is empty.", "yellow");
        }

        let mut builder = Builder::default();
        builder.push_record(["#", "Range", "Bytes", "Boundary", "Overlap", "Preview"]);

        for chunk in chunks {
            builder.push_record([
                chunk.index.to_string(),
                format!("{}..{}", chunk.start, chunk.end),
                chunk.text.len().to_string(),
                chunk.boundary.as_str().to_string(),
                chunk.overlap_len.to_string(),
                preview(chunk.core_text()),
            ]);
        }

        let mut table = builder.build();
        table
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()));

        table.to_string()
    }

    /// Format a success message.
    pub fn success(&self, message: &str) -> String {
        self.colorize(&format!("✓ {}", message), "green")
    }

    /// Format an info message.
    pub fn info(&self, message: &str) -> String {
        self.colorize(&format!("ℹ {}", message), "blue")
    }

    /// Format a warning message.
    pub fn warning(&self, message: &str) -> String {
        self.colorize(&format!("⚠ {}", message), "yellow")
    }

    /// Colorize text if color is enabled.
    fn colorize(&self, text: &str, color: &str) -> String {
        if !self.color_enabled {
            return text.to_string();
        }

        match color {
            "green" => text.green().to_string(),
            "blue" => text.blue().to_string(),
            "yellow" => text.yellow().to_string(),
            _ => text.to_string(),
        }
    }
}

fn timeline_table(timeline: &[TimelineEntry]) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Date", "Details"]);

    for entry in timeline {
        let details = entry
            .data
            .iter()
            .map(|(k, v)| format!("{}: {}", k, display_value(v)))
            .collect::<Vec<_>>()
            .join("; ");
        let date = if entry.normalized {
            entry.date.clone()
        } else {
            format!("{} (?)", entry.date)
        };
        builder.push_record([date, details]);
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

/// Render a JSON value for a table cell.
fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "-".to_string(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

fn join_indices(indices: &[usize]) -> String {
    indices.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{}…", cut)
}
