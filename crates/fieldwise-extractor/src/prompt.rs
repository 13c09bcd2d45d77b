//! Prompt construction for field extraction

use crate::types::FewShotExample;
use fieldwise_domain::{FieldSpec, FieldType};

/// Few-shot examples beyond this count are not embedded
pub const MAX_EXAMPLES: usize = 5;

/// Builds the prompt that asks the model for one chunk's field values
pub struct PromptBuilder<'a> {
    text: &'a str,
    fields: &'a [FieldSpec],
    examples: &'a [FewShotExample],
}

impl<'a> PromptBuilder<'a> {
    /// Create a new prompt builder
    pub fn new(text: &'a str, fields: &'a [FieldSpec]) -> Self {
        Self {
            text,
            fields,
            examples: &[],
        }
    }

    /// Add worked examples shown before the text
    pub fn with_examples(mut self, examples: &'a [FewShotExample]) -> Self {
        self.examples = examples;
        self
    }

    /// Build the complete extraction prompt
    pub fn build(&self) -> String {
        let mut prompt = String::new();

        // 1. Instructions
        prompt.push_str(EXTRACTION_INSTRUCTIONS);
        prompt.push_str("\n\n");

        // 2. Field list
        prompt.push_str("Fields:\n");
        for field in self.fields {
            prompt.push_str(&field_line(field));
            prompt.push('\n');
        }
        prompt.push('\n');

        // 3. Worked examples (if any)
        if !self.examples.is_empty() {
            prompt.push_str("Examples:\n");
            for example in self.examples.iter().take(MAX_EXAMPLES) {
                prompt.push_str("Text:\n---\n");
                prompt.push_str(example.text.trim());
                prompt.push_str("\n---\nOutput:\n");
                prompt.push_str(example.output.trim());
                prompt.push_str("\n\n");
            }
        }

        // 4. The text to analyze
        prompt.push_str("Text to analyze:\n");
        prompt.push_str("---\n");
        prompt.push_str(self.text);
        prompt.push_str("\n---\n\n");

        // 5. Output shape
        prompt.push_str(OUTPUT_FORMAT_REMINDER);
        prompt.push('\n');
        prompt.push_str(&self.shape_template());

        prompt
    }

    /// JSON object with one placeholder per field
    fn shape_template(&self) -> String {
        let entries: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("  \"{}\": {}", f.name, placeholder(f)))
            .collect();
        format!("{{\n{}\n}}", entries.join(",\n"))
    }
}

fn field_line(field: &FieldSpec) -> String {
    let arity = if field.unique { "single value" } else { "list" };
    let mut line = format!(
        "- {} ({}, {}): {}",
        field.name,
        field.field_type.as_str(),
        arity,
        field.description
    );
    if let Some(date_field) = &field.date_field {
        line.push_str(&format!(" Each event must include \"{}\".", date_field));
    }
    line
}

fn placeholder(field: &FieldSpec) -> String {
    let scalar = match field.field_type {
        FieldType::String => "\"text\"".to_string(),
        FieldType::Date => "\"YYYY-MM-DD\"".to_string(),
        FieldType::Number => "0".to_string(),
        FieldType::Boolean => "true".to_string(),
        FieldType::Timeline => {
            let key = field.date_field.as_deref().unwrap_or("date");
            let mut keys = vec![format!("\"{}\": \"YYYY-MM-DD\"", key)];
            keys.extend(
                field
                    .payload_fields
                    .iter()
                    .map(|p| format!("\"{}\": \"...\"", p)),
            );
            return format!("[{{{}}}]", keys.join(", "));
        }
    };
    if field.unique {
        format!("{} or null", scalar)
    } else {
        format!("[{}]", scalar)
    }
}

const EXTRACTION_INSTRUCTIONS: &str = r#"Extract the requested fields from the text below.

Rules:
- Only report values stated in the text; never guess
- Use null for a single-value field that is not mentioned
- Use [] for a list field that is not mentioned
- Copy names and terms as written in the text
- Write dates as YYYY-MM-DD when the full date is known
- Write numbers without units or currency symbols
- The text may start mid-sentence; it is one part of a longer document"#;

const OUTPUT_FORMAT_REMINDER: &str =
    "Output format (a single JSON object only, no additional text):";
