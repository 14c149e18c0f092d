//! Splitting a transcript into model-sized chunks.
//!
//! Chunks are contiguous runs of whole segments. Every segment lands in
//! exactly one chunk and chunk order follows segment order.

use crate::subtitle::{Segment, SubtitleDocument};

/// How the size of a segment is measured against the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitCost {
    /// Unicode scalar values
    #[default]
    Chars,
    /// Rough token estimate, about four characters per token
    EstimatedTokens,
}

impl UnitCost {
    pub fn cost(&self, text: &str) -> usize {
        let chars = text.chars().count();
        match self {
            Self::Chars => chars,
            Self::EstimatedTokens => chars.div_ceil(4).max(1),
        }
    }
}

/// Contiguous run of segments sent to the model in one call
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position of this chunk in the document, used to order the merge
    pub index: usize,
    /// Document position of the first segment in this chunk
    pub first_segment: usize,
    pub segments: Vec<Segment>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Start of the first segment to end of the last, in ms
    pub fn span(&self) -> Option<(u64, u64)> {
        Some((self.segments.first()?.start_ms, self.segments.last()?.end_ms))
    }

    /// Segment texts in order
    pub fn texts(&self) -> Vec<String> {
        self.segments.iter().map(|s| s.text.clone()).collect()
    }
}

/// Greedily pack segments into chunks of at most `max_budget` units.
///
/// A segment that is larger than the budget on its own still gets its own
/// chunk; segments are never cut.
pub fn split(document: &SubtitleDocument, max_budget: usize, unit_cost: UnitCost) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<Segment> = Vec::new();
    let mut current_cost = 0usize;
    let mut first_segment = 0usize;

    for (position, segment) in document.segments().iter().enumerate() {
        let cost = unit_cost.cost(&segment.text);
        if !current.is_empty() && current_cost + cost > max_budget {
            chunks.push(Chunk {
                index: chunks.len(),
                first_segment,
                segments: std::mem::take(&mut current),
            });
            current_cost = 0;
        }
        if current.is_empty() {
            first_segment = position;
        }
        current_cost += cost;
        current.push(segment.clone());
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            index: chunks.len(),
            first_segment,
            segments: current,
        });
    }
    chunks
}
