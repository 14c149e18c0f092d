/*!
 * Parse and serialize laws over whole subtitle files
 */

use videoscribe::chunker::{self, UnitCost};
use videoscribe::subtitle::{Segment, SubtitleDocument};

use crate::common;

#[test]
fn test_serializeParse_shouldBeStableAfterFirstPass() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_subtitle(dir.path(), "sample.srt").unwrap();
    let original = SubtitleDocument::parse_srt(&std::fs::read_to_string(&path).unwrap()).unwrap();

    let once = original.to_srt();
    let reparsed = SubtitleDocument::parse_srt(&once).unwrap();

    assert_eq!(reparsed, original);
    assert_eq!(reparsed.to_srt(), once);
}

#[test]
fn test_parse_withGappedIndices_shouldRenumberOnSerialize() {
    let input = "3\n00:00:00,000 --> 00:00:01,000\nA\n\n7\n00:00:01,000 --> 00:00:02,000\nB\n";
    let srt = SubtitleDocument::parse_srt(input).unwrap().to_srt();
    assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,000\nA\n"));
    assert!(srt.contains("\n2\n00:00:01,000 --> 00:00:02,000\nB\n"));
}

#[test]
fn test_chunksOfParsedFile_shouldConcatenateToDocument() {
    let segments: Vec<Segment> = (0..40)
        .map(|i| Segment::new(i * 1500, i * 1500 + 1400, format!("caption {} with\nsecond line", i)))
        .collect();
    let doc = SubtitleDocument::from_segments(segments).unwrap();
    let reparsed = SubtitleDocument::parse_srt(&doc.to_srt()).unwrap();

    let chunks = chunker::split(&reparsed, 120, UnitCost::Chars);
    let rejoined: Vec<Segment> = chunks.into_iter().flat_map(|c| c.segments).collect();

    assert_eq!(rejoined, doc.segments());
}

#[test]
fn test_toTxt_andToJson_shouldAgreeOnSegmentCount() {
    let doc = common::numbered_document(15);
    let json: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&doc.to_json()).unwrap();
    assert_eq!(json.len(), 15);
    assert_eq!(doc.to_txt().lines().count(), 15);
}
