//! Text chunking for large documents
//!
//! Documents are cut into contiguous regions that together cover the whole
//! text, so concatenating every chunk's `core_text()` reproduces the input.
//! Regions are found top-down: headings first, then paragraph breaks, then
//! sentence ends, and finally fixed windows for text with no usable
//! boundary. Adjacent small regions are then packed into chunks up to the
//! budget. Each chunk after the first is prefixed with the tail of the
//! previous chunk so that facts spanning a cut stay visible to the model.

use crate::config::ChunkStrategy;
use crate::error::ChunkingError;
use fieldwise_domain::{BoundaryType, Chunk, SizeEstimator};
use regex::Regex;
use std::ops::Range;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Markdown headings, numbered headings and ALL-CAPS title lines
static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:#{1,6}[ \t]+\S|\d+(?:\.\d+)*[.)][ \t]+[A-Z]|[A-Z][A-Z0-9 ,/&()'-]{2,}:?[ \t]*$)",
    )
    .unwrap()
});

/// A blank line, with any following whitespace
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").unwrap());

/// Sentence-final punctuation, closing quotes/brackets, then whitespace
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?]["')\]]*\s+"#).unwrap());

/// Measures size as a count of Unicode scalar values
#[derive(Debug, Clone, Copy, Default)]
pub struct CharCountEstimator;

impl SizeEstimator for CharCountEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count()
    }
}

/// Approximates tokens as one per four characters, rounded up
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenEstimator;

impl SizeEstimator for ApproxTokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// A contiguous region of the source, tagged with how its front was cut
#[derive(Debug, Clone)]
struct Piece {
    range: Range<usize>,
    boundary: BoundaryType,
}

/// Chunks text according to the configured strategy
pub struct TextChunker {
    strategy: ChunkStrategy,
    max_chunk_size: usize,
    overlap_size: usize,
    estimator: Arc<dyn SizeEstimator>,
}

impl TextChunker {
    /// Create a chunker that measures size in characters
    pub fn new(strategy: ChunkStrategy, max_chunk_size: usize, overlap_size: usize) -> Self {
        Self {
            strategy,
            max_chunk_size,
            overlap_size,
            estimator: Arc::new(CharCountEstimator),
        }
    }

    /// Measure size with a different estimator (e.g. a tokenizer)
    pub fn with_estimator(mut self, estimator: Arc<dyn SizeEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Split `text` into ordered chunks
    ///
    /// - Blank input yields no chunks.
    /// - Input within `max_chunk_size` yields one chunk with no overlap.
    /// - Otherwise each chunk's own region fits `max_chunk_size - overlap_size`
    ///   so the region plus its overlap prefix fits the full budget.
    pub fn chunk(&self, text: &str) -> Result<Vec<Chunk>, ChunkingError> {
        if self.max_chunk_size == 0 || self.overlap_size >= self.max_chunk_size {
            return Err(ChunkingError::BudgetTooSmall {
                max_size: self.max_chunk_size,
                overlap: self.overlap_size,
            });
        }

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        if self.size(text) <= self.max_chunk_size {
            return Ok(vec![Chunk {
                index: 0,
                text: text.to_string(),
                start: 0,
                end: text.len(),
                overlap_len: 0,
                overlaps_previous: false,
                overlaps_next: false,
                boundary: BoundaryType::Document,
            }]);
        }

        let budget = self.max_chunk_size - self.overlap_size;
        let whole = Piece {
            range: 0..text.len(),
            boundary: BoundaryType::Document,
        };

        let mut pieces = Vec::new();
        self.refine(text, whole, self.levels(), budget, &mut pieces)?;
        let regions = self.pack(text, pieces, budget);

        debug!(
            regions = regions.len(),
            budget,
            strategy = ?self.strategy,
            "Chunked document"
        );

        Ok(self.with_overlap(text, regions))
    }

    fn size(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    /// Boundary kinds to try, coarsest first
    fn levels(&self) -> &'static [BoundaryType] {
        match self.strategy {
            ChunkStrategy::Auto => &[
                BoundaryType::Section,
                BoundaryType::Paragraph,
                BoundaryType::Sentence,
            ],
            ChunkStrategy::BySection => &[BoundaryType::Section],
            ChunkStrategy::ByParagraph => &[BoundaryType::Paragraph, BoundaryType::Sentence],
            ChunkStrategy::BySentence => &[BoundaryType::Sentence],
            ChunkStrategy::FixedWindow => &[],
        }
    }

    /// Recursively cut `piece` until every part fits `budget`
    fn refine(
        &self,
        text: &str,
        piece: Piece,
        levels: &[BoundaryType],
        budget: usize,
        out: &mut Vec<Piece>,
    ) -> Result<(), ChunkingError> {
        if self.size(&text[piece.range.clone()]) <= budget {
            out.push(piece);
            return Ok(());
        }

        let Some((&level, finer)) = levels.split_first() else {
            return self.split_fixed(text, piece, budget, out);
        };

        let cuts = boundary_offsets(text, &piece.range, level);
        if cuts.is_empty() {
            return self.refine(text, piece, finer, budget, out);
        }

        let mut start = piece.range.start;
        let mut boundary = piece.boundary;
        for cut in cuts.into_iter().chain(std::iter::once(piece.range.end)) {
            if cut <= start {
                continue;
            }
            let sub = Piece {
                range: start..cut,
                boundary,
            };
            self.refine(text, sub, finer, budget, out)?;
            start = cut;
            boundary = level;
        }
        Ok(())
    }

    /// Cut into the largest windows that fit, at character boundaries
    fn split_fixed(
        &self,
        text: &str,
        piece: Piece,
        budget: usize,
        out: &mut Vec<Piece>,
    ) -> Result<(), ChunkingError> {
        let mut start = piece.range.start;
        let mut boundary = piece.boundary;

        while start < piece.range.end {
            let segment = &text[start..piece.range.end];
            // Candidate end offsets (exclusive), relative to `start`
            let ends: Vec<usize> = segment
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .collect();
            let fitting = ends.partition_point(|&end| self.size(&segment[..end]) <= budget);
            if fitting == 0 {
                return Err(ChunkingError::Unsplittable { offset: start, budget });
            }
            let end = start + ends[fitting - 1];
            out.push(Piece {
                range: start..end,
                boundary,
            });
            start = end;
            boundary = BoundaryType::Fixed;
        }
        Ok(())
    }

    /// Greedily merge adjacent pieces while the merged region fits
    fn pack(&self, text: &str, pieces: Vec<Piece>, budget: usize) -> Vec<Piece> {
        let mut regions: Vec<Piece> = Vec::new();
        for piece in pieces {
            match regions.last_mut() {
                Some(current) if self.size(&text[current.range.start..piece.range.end]) <= budget => {
                    current.range.end = piece.range.end;
                }
                _ => regions.push(piece),
            }
        }
        regions
    }

    fn with_overlap(&self, text: &str, regions: Vec<Piece>) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::with_capacity(regions.len());

        for (index, region) in regions.into_iter().enumerate() {
            let overlap_start = match chunks.last() {
                Some(prev) if self.overlap_size > 0 => {
                    self.overlap_start(text, prev.start..prev.end)
                }
                _ => region.range.start,
            };
            let overlap_len = region.range.start - overlap_start;

            if overlap_len > 0 {
                if let Some(prev) = chunks.last_mut() {
                    prev.overlaps_next = true;
                }
            }

            chunks.push(Chunk {
                index,
                text: text[overlap_start..region.range.end].to_string(),
                start: region.range.start,
                end: region.range.end,
                overlap_len,
                overlaps_previous: overlap_len > 0,
                overlaps_next: false,
                boundary: region.boundary,
            });
        }

        chunks
    }

    /// Start of the longest suffix of `prev` fitting `overlap_size`, moved
    /// forward to a word start when the suffix contains whitespace
    fn overlap_start(&self, text: &str, prev: Range<usize>) -> usize {
        let region = &text[prev.clone()];
        let starts: Vec<usize> = region.char_indices().map(|(i, _)| i).collect();
        let first_fitting =
            starts.partition_point(|&i| self.size(&region[i..]) > self.overlap_size);
        let Some(&offset) = starts.get(first_fitting) else {
            return prev.end;
        };

        let suffix = &region[offset..];
        let at_word_start = offset == 0 || region[..offset].ends_with(char::is_whitespace);
        let snapped = match suffix.find(char::is_whitespace) {
            _ if at_word_start => 0,
            Some(ws) if ws > 0 => {
                let after = suffix[ws..]
                    .find(|c: char| !c.is_whitespace())
                    .map(|n| ws + n);
                after.unwrap_or(0)
            }
            _ => 0,
        };
        prev.start + offset + snapped
    }
}

/// Offsets inside `range` where a new `level` segment begins
fn boundary_offsets(text: &str, range: &Range<usize>, level: BoundaryType) -> Vec<usize> {
    let slice = &text[range.clone()];
    let offsets: Vec<usize> = match level {
        BoundaryType::Section => HEADING.find_iter(slice).map(|m| m.start()).collect(),
        BoundaryType::Paragraph => PARAGRAPH_BREAK.find_iter(slice).map(|m| m.end()).collect(),
        BoundaryType::Sentence => SENTENCE_END.find_iter(slice).map(|m| m.end()).collect(),
        BoundaryType::Document | BoundaryType::Fixed => Vec::new(),
    };
    offsets
        .into_iter()
        .filter(|&o| o > 0 && o < slice.len())
        .map(|o| range.start + o)
        .collect()
}

/// Split `document` into chunks
///
/// Convenience wrapper around [`TextChunker`].
pub fn chunk(
    document: &str,
    max_size: usize,
    overlap_size: usize,
    strategy: ChunkStrategy,
    estimator: Arc<dyn SizeEstimator>,
) -> Result<Vec<Chunk>, ChunkingError> {
    TextChunker::new(strategy, max_size, overlap_size)
        .with_estimator(estimator)
        .chunk(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(strategy: ChunkStrategy, max: usize, overlap: usize) -> TextChunker {
        TextChunker::new(strategy, max, overlap)
    }

    fn reconstruct(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.core_text()).collect()
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        let chunks = chunker(ChunkStrategy::Auto, 100, 10).chunk("").unwrap();
        assert!(chunks.is_empty());
        let chunks = chunker(ChunkStrategy::Auto, 100, 10).chunk("  \n\n ").unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_small_document_is_single_chunk() {
        let text = "Short text here.";
        let chunks = chunker(ChunkStrategy::Auto, 100, 10).chunk(text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].boundary, BoundaryType::Document);
        assert!(!chunks[0].overlaps_previous);
        assert!(!chunks[0].overlaps_next);
    }

    #[test]
    fn test_sections_split_first() {
        let text = "# Intro\nSome opening words here.\n# History\nMore words about history.\n# Plan\nFinal words.";
        let chunks = chunker(ChunkStrategy::Auto, 40, 0).chunk(text).unwrap();

        assert!(chunks.len() >= 2);
        assert!(chunks[1].core_text().starts_with("# "));
        assert_eq!(chunks[1].boundary, BoundaryType::Section);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_caps_headings_detected() {
        let text = "HISTORY\nPatient reports mild pain.\nMEDICATIONS\nMetformin 500 mg daily.";
        let chunks = chunker(ChunkStrategy::Auto, 35, 0).chunk(text).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].core_text().starts_with("MEDICATIONS"));
    }

    #[test]
    fn test_paragraph_fallback() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let chunks = chunker(ChunkStrategy::Auto, 30, 0).chunk(text).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].boundary, BoundaryType::Paragraph);
        assert!(chunks[1].core_text().starts_with("Second"));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_sentence_hard_split() {
        let text = "First sentence here. Second sentence here. Third sentence here.";
        let chunks = chunker(ChunkStrategy::Auto, 25, 0).chunk(text).unwrap();

        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 25);
        }
        assert_eq!(chunks[1].boundary, BoundaryType::Sentence);
        assert_eq!(chunks[1].core_text(), "Second sentence here. ");
    }

    #[test]
    fn test_no_markers_uses_fixed_windows() {
        let text = "a".repeat(100);
        let chunks = chunker(ChunkStrategy::Auto, 20, 0).chunk(&text).unwrap();

        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().skip(1).all(|c| c.boundary == BoundaryType::Fixed));
        assert!(chunks.iter().all(|c| c.text.len() == 20));
    }

    #[test]
    fn test_overlap_prefixes_next_chunk() {
        let text = "alpha beta gamma delta. epsilon zeta eta theta. iota kappa lambda mu.";
        let chunks = chunker(ChunkStrategy::BySentence, 40, 12).chunk(text).unwrap();

        assert!(chunks.len() > 1);
        assert!(!chunks[0].overlaps_previous);
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(prev.overlaps_next);
            assert!(next.overlaps_previous);
            assert!(prev.core_text().ends_with(next.overlap_text()));
            assert!(next.overlap_text().chars().count() <= 12);
            assert!(next.text.chars().count() <= 40);
        }
        assert!(!chunks.last().unwrap().overlaps_next);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_overlap_starts_at_word() {
        let text = "one two three four. five six seven eight.";
        let chunks = chunker(ChunkStrategy::BySentence, 30, 8).chunk(text).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].overlap_text(), "four. ");
    }

    #[test]
    fn test_indices_contiguous() {
        let text = "Paragraph.\n\n".repeat(30);
        let chunks = chunker(ChunkStrategy::ByParagraph, 50, 5).chunk(&text).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_multibyte_text_respects_char_boundaries() {
        let text = "é".repeat(50);
        let chunks = chunker(ChunkStrategy::FixedWindow, 7, 2).chunk(&text).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_token_estimator_budget() {
        let text = "word ".repeat(200);
        let chunks = chunker(ChunkStrategy::Auto, 50, 5)
            .with_estimator(Arc::new(ApproxTokenEstimator))
            .chunk(&text)
            .unwrap();
        for chunk in &chunks {
            assert!(ApproxTokenEstimator.estimate(&chunk.text) <= 50);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_budget_too_small() {
        let result = chunker(ChunkStrategy::Auto, 10, 10).chunk("text");
        assert!(matches!(result, Err(ChunkingError::BudgetTooSmall { .. })));
        let result = chunker(ChunkStrategy::Auto, 0, 0).chunk("text");
        assert!(matches!(result, Err(ChunkingError::BudgetTooSmall { .. })));
    }

    struct WideCharEstimator;

    impl SizeEstimator for WideCharEstimator {
        fn estimate(&self, text: &str) -> usize {
            text.chars().count() * 10
        }
    }

    #[test]
    fn test_unsplittable_character() {
        let result = chunker(ChunkStrategy::FixedWindow, 12, 5)
            .with_estimator(Arc::new(WideCharEstimator))
            .chunk("abcdef");
        assert!(matches!(result, Err(ChunkingError::Unsplittable { .. })));
    }

    #[test]
    fn test_free_function_matches_chunker() {
        let text = "Para one.\n\nPara two.\n\nPara three.";
        let a = chunk(text, 15, 3, ChunkStrategy::Auto, Arc::new(CharCountEstimator)).unwrap();
        let b = chunker(ChunkStrategy::Auto, 15, 3).chunk(text).unwrap();
        assert_eq!(a, b);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: chunk regions concatenate back to the document
        #[test]
        fn test_coverage(
            text in "[a-zA-Z .!?\n#]{0,400}",
            max in 10usize..80,
            overlap_pct in 0usize..50,
        ) {
            let overlap = max * overlap_pct / 100;
            let chunks = TextChunker::new(ChunkStrategy::Auto, max, overlap).chunk(&text).unwrap();
            if text.trim().is_empty() {
                prop_assert!(chunks.is_empty());
            } else {
                let rebuilt: String = chunks.iter().map(|c| c.core_text()).collect();
                prop_assert_eq!(rebuilt, text);
            }
        }

        /// Property: every chunk fits the budget and indices are gapless
        #[test]
        fn test_size_bound(
            text in "[a-z .\n]{1,400}",
            max in 10usize..80,
        ) {
            let chunks = TextChunker::new(ChunkStrategy::Auto, max, max / 5).chunk(&text).unwrap();
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert!(chunk.text.chars().count() <= max);
            }
        }
    }
}
