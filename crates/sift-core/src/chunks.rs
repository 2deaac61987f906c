//! Splits document text into overlapping chunks for embedding and search.
//!
//! Tries paragraph breaks first, then line breaks, sentence ends, spaces, and
//! finally single characters, recursing into any piece still larger than the
//! chunk size. Small pieces are packed back together up to the chunk size, and
//! the tail of each packed chunk is carried into the next as overlap.

use std::collections::VecDeque;
use std::ops::Range;

use crate::config::{validate_chunking, ConfigError};
use crate::documents::Document;

/// Separators in order of preference. The empty separator means "any character".
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", " ", ""];

/// A chunk of text from a document, with source reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Byte offset of `text` within the document text.
    pub start_offset: usize,
    pub source: String,
    /// Position of this chunk within its document (0, 1, 2, …).
    pub sequence_index: usize,
}

/// Validated chunking parameters, measured in characters.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

/// A span of the document with its length in characters.
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        validate_chunking(chunk_size, overlap)?;
        Ok(Self { chunk_size, overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk a single document. Empty or whitespace-only text yields no chunks.
    pub fn split(&self, doc: &Document) -> Vec<Chunk> {
        self.split_ranges(&doc.text)
            .into_iter()
            .enumerate()
            .map(|(i, r)| Chunk {
                text: doc.text[r.clone()].to_string(),
                start_offset: r.start,
                source: doc.source.clone(),
                sequence_index: i,
            })
            .collect()
    }

    /// Chunk all documents. Returns chunks from all documents in order.
    pub fn split_all(&self, docs: &[Document]) -> Vec<Chunk> {
        docs.iter().flat_map(|d| self.split(d)).collect()
    }

    fn split_ranges(&self, text: &str) -> Vec<Range<usize>> {
        let mut out = Vec::new();
        if text.chars().count() <= self.chunk_size {
            push_trimmed(text, 0..text.len(), &mut out);
            return out;
        }
        self.split_recursive(text, 0..text.len(), SEPARATORS, &mut out);
        out
    }

    fn split_recursive(
        &self,
        text: &str,
        span: Range<usize>,
        separators: &[&str],
        out: &mut Vec<Range<usize>>,
    ) {
        let segment = &text[span.clone()];
        let (sep, finer) = pick_separator(segment, separators);

        let mut small = Vec::new();
        for piece in split_keeping_separator(text, span, sep) {
            if piece.chars <= self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                self.merge(text, &small, out);
                small.clear();
            }
            if finer.is_empty() {
                // Only reachable with a non-empty last separator; single characters always fit.
                push_trimmed(text, piece.start..piece.end, out);
            } else {
                self.split_recursive(text, piece.start..piece.end, finer, out);
            }
        }
        if !small.is_empty() {
            self.merge(text, &small, out);
        }
    }

    /// Packs adjacent pieces into chunks of at most `chunk_size` characters. After
    /// each emitted chunk, leading pieces are dropped until at most `overlap`
    /// characters remain to start the next one.
    fn merge(&self, text: &str, pieces: &[Piece], out: &mut Vec<Range<usize>>) {
        let mut window: VecDeque<Piece> = VecDeque::new();
        let mut total = 0;
        for &piece in pieces {
            if total + piece.chars > self.chunk_size {
                if let (Some(first), Some(last)) = (window.front(), window.back()) {
                    push_trimmed(text, first.start..last.end, out);
                }
                while total > self.overlap || (total > 0 && total + piece.chars > self.chunk_size) {
                    match window.pop_front() {
                        Some(dropped) => total -= dropped.chars,
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += piece.chars;
        }
        if let (Some(first), Some(last)) = (window.front(), window.back()) {
            push_trimmed(text, first.start..last.end, out);
        }
    }
}

/// First separator present in `segment`, plus the finer ones to fall back on.
fn pick_separator<'a>(segment: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || segment.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Splits `text[span]` after every occurrence of `sep` (the separator stays at the
/// end of the preceding piece), or into single characters when `sep` is empty.
fn split_keeping_separator(text: &str, span: Range<usize>, sep: &str) -> Vec<Piece> {
    let base = span.start;
    let segment = &text[span];
    let piece = |start: usize, end: usize| Piece {
        start: base + start,
        end: base + end,
        chars: segment[start..end].chars().count(),
    };

    if sep.is_empty() {
        return segment
            .char_indices()
            .map(|(i, c)| piece(i, i + c.len_utf8()))
            .collect();
    }

    let mut pieces = Vec::new();
    let mut last = 0;
    for (i, _) in segment.match_indices(sep) {
        let end = i + sep.len();
        pieces.push(piece(last, end));
        last = end;
    }
    if last < segment.len() {
        pieces.push(piece(last, segment.len()));
    }
    pieces
}

/// Pushes `range` with surrounding whitespace removed, unless nothing is left.
fn push_trimmed(text: &str, range: Range<usize>, out: &mut Vec<Range<usize>>) {
    let s = &text[range.clone()];
    let trimmed_start = s.trim_start();
    let lead = s.len() - trimmed_start.len();
    let trimmed = trimmed_start.trim_end();
    if trimmed.is_empty() {
        return;
    }
    let start = range.start + lead;
    out.push(start..start + trimmed.len());
}
