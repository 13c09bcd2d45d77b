//! Document chunks

use serde::{Deserialize, Serialize};

/// How a chunk's leading edge was cut from the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    /// The whole document fit in one chunk
    Document,
    /// Cut at a heading or section marker
    Section,
    /// Cut at a blank-line paragraph break
    Paragraph,
    /// Cut at the end of a sentence
    Sentence,
    /// Cut at an arbitrary character position
    Fixed,
}

impl BoundaryType {
    /// Short lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryType::Document => "document",
            BoundaryType::Section => "section",
            BoundaryType::Paragraph => "paragraph",
            BoundaryType::Sentence => "sentence",
            BoundaryType::Fixed => "fixed",
        }
    }
}

/// A bounded slice of a source document
///
/// `start..end` is the byte range of the chunk's own region in the source.
/// When `overlaps_previous` is set, `text` additionally begins with the last
/// `overlap_len` bytes of the previous chunk's region. Chunks are immutable
/// once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in document order, 0..n-1
    pub index: usize,

    /// Text sent for extraction, including any overlap prefix
    pub text: String,

    /// Byte offset where this chunk's own region starts
    pub start: usize,

    /// Byte offset where this chunk's own region ends (exclusive)
    pub end: usize,

    /// Length in bytes of the overlap prefix at the front of `text`
    pub overlap_len: usize,

    /// Whether `text` starts with context copied from the previous chunk
    pub overlaps_previous: bool,

    /// Whether the tail of this chunk is repeated at the front of the next one
    pub overlaps_next: bool,

    /// Kind of boundary this chunk starts at
    pub boundary: BoundaryType,
}

impl Chunk {
    /// The chunk's own region, without the overlap prefix
    pub fn core_text(&self) -> &str {
        &self.text[self.overlap_len..]
    }

    /// The overlap prefix copied from the previous chunk (empty if none)
    pub fn overlap_text(&self) -> &str {
        &self.text[..self.overlap_len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_overlap() -> Chunk {
        Chunk {
            index: 1,
            text: "tail. Next part".to_string(),
            start: 20,
            end: 29,
            overlap_len: 6,
            overlaps_previous: true,
            overlaps_next: false,
            boundary: BoundaryType::Sentence,
        }
    }

    #[test]
    fn test_core_and_overlap_text() {
        let chunk = chunk_with_overlap();
        assert_eq!(chunk.overlap_text(), "tail. ");
        assert_eq!(chunk.core_text(), "Next part");
        assert_eq!(chunk.core_text().len(), chunk.end - chunk.start);
    }

    #[test]
    fn test_boundary_labels() {
        assert_eq!(BoundaryType::Document.as_str(), "document");
        assert_eq!(BoundaryType::Fixed.as_str(), "fixed");
    }

    #[test]
    fn test_boundary_serializes_snake_case() {
        let json = serde_json::to_string(&BoundaryType::Paragraph).unwrap();
        assert_eq!(json, "\"paragraph\"");
    }
}
