/*!
 * Tests for budgeted chunking
 */

use videoscribe::chunker::{self, UnitCost};
use videoscribe::subtitle::{Segment, SubtitleDocument};

use crate::common;

fn document(texts: &[&str]) -> SubtitleDocument {
    let segments = texts
        .iter()
        .enumerate()
        .map(|(i, t)| Segment::new(i as u64 * 1000, i as u64 * 1000 + 1000, *t))
        .collect();
    SubtitleDocument::from_segments(segments).unwrap()
}

#[test]
fn test_split_withinBudget_shouldProduceOneChunk() {
    let chunks = chunker::split(&common::pythagoras_document(), 1000, UnitCost::Chars);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].len(), 3);
    assert_eq!(chunks[0].span(), Some((0, 6000)));
}

#[test]
fn test_split_shouldCloseChunkBeforeExceedingBudget() {
    // 4 + 4 fits a budget of 10, the third segment does not
    let chunks = chunker::split(&document(&["aaaa", "bbbb", "cccc", "dd"]), 10, UnitCost::Chars);
    let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
    assert_eq!(sizes, vec![2, 2]);
    assert_eq!(chunks[1].first_segment, 2);
    assert_eq!(chunks[1].index, 1);
}

#[test]
fn test_split_withOversizedSegment_shouldIsolateIt() {
    let chunks = chunker::split(&document(&["ab", "a very long caption", "cd"]), 5, UnitCost::Chars);
    let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
    assert_eq!(sizes, vec![1, 1, 1]);
    assert_eq!(chunks[1].segments[0].text, "a very long caption");
}

#[test]
fn test_split_shouldReconstructDocumentExactly() {
    let doc = common::numbered_document(57);
    for budget in [1, 13, 40, 200, 10_000] {
        let chunks = chunker::split(&doc, budget, UnitCost::EstimatedTokens);
        let rebuilt: Vec<Segment> = chunks.iter().flat_map(|c| c.segments.clone()).collect();
        assert_eq!(rebuilt, doc.segments(), "budget {}", budget);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(doc.segments()[chunk.first_segment], chunk.segments[0]);
        }
    }
}

#[test]
fn test_split_withEmptyDocument_shouldReturnNoChunks() {
    assert!(chunker::split(&SubtitleDocument::default(), 100, UnitCost::Chars).is_empty());
}
