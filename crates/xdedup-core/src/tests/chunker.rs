use crate::chunker::{validate_bounds, Chunker};
use crate::config::ChunkerConfig;
use crate::testutil::pseudo_random;

fn test_config() -> ChunkerConfig {
    ChunkerConfig {
        min_size: 256,
        avg_size: 1024,
        max_size: 4096,
    }
}

#[test]
fn spans_cover_input_contiguously() {
    let data = pseudo_random(1, 100_000);
    let mut chunker = Chunker::new(&test_config()).unwrap();
    let spans = chunker.chunk(&data);

    let mut offset = 0;
    for span in &spans {
        assert_eq!(span.offset, offset);
        offset = span.end();
    }
    assert_eq!(offset, data.len());
    assert_eq!(chunker.chunks_emitted(), spans.len() as u64);
    assert_eq!(chunker.bytes_chunked(), data.len() as u64);
}

#[test]
fn chunk_sizes_respect_bounds() {
    let data = pseudo_random(2, 200_000);
    let mut chunker = Chunker::new(&test_config()).unwrap();
    let spans = chunker.chunk(&data);
    let (last, rest) = spans.split_last().unwrap();
    for span in rest {
        assert!(span.length >= 256, "chunk too small: {}", span.length);
        assert!(span.length <= 4096, "chunk too large: {}", span.length);
    }
    assert!(last.length <= 4096);
}

#[test]
fn all_zero_input_is_forced_to_max_size() {
    let data = vec![0u8; 40_960];
    let mut chunker = Chunker::new(&test_config()).unwrap();
    let spans = chunker.chunk(&data);
    assert!(spans.len() >= 10);
    assert!(spans.iter().all(|s| s.length <= 4096));
    assert_eq!(spans.iter().map(|s| s.length).sum::<usize>(), data.len());
}

#[test]
fn short_input_is_one_chunk() {
    let mut chunker = Chunker::new(&test_config()).unwrap();
    let spans = chunker.chunk(&[7u8; 100]);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].length, 100);
    assert!(chunker.chunk(&[]).is_empty());
    assert_eq!(chunker.next_cut(&[]), 0);
}

#[test]
fn chunking_is_deterministic() {
    let data = pseudo_random(3, 64 * 1024);
    let a = Chunker::new(&test_config()).unwrap().chunk(&data);
    let b = Chunker::new(&test_config()).unwrap().chunk(&data);
    assert_eq!(a, b);
}

#[test]
fn cut_points_resynchronize_after_an_insertion() {
    let data = pseudo_random(4, 128 * 1024);
    let mut shifted = vec![0xABu8; 17];
    shifted.extend_from_slice(&data);

    let mut chunker = Chunker::new(&test_config()).unwrap();
    let ends = |spans: Vec<crate::chunker::ChunkSpan>, skew: usize| {
        spans
            .iter()
            .map(|s| s.end() - skew)
            .collect::<std::collections::HashSet<_>>()
    };
    let original = ends(chunker.chunk(&data), 0);
    let moved = ends(chunker.chunk(&shifted), 17);
    let shared = original.intersection(&moved).count();
    assert!(
        shared * 10 >= original.len() * 8,
        "only {shared} of {} cut points survived",
        original.len()
    );
}

#[test]
fn next_cut_matches_first_span() {
    let data = pseudo_random(5, 32 * 1024);
    let mut chunker = Chunker::new(&test_config()).unwrap();
    let first = chunker.chunk(&data)[0];
    assert_eq!(chunker.next_cut(&data), first.length);
}

#[test]
fn invalid_bounds_are_rejected() {
    assert!(validate_bounds(32, 1024, 4096).is_err());
    assert!(validate_bounds(2048, 1024, 4096).is_err());
    assert!(validate_bounds(256, 8192, 4096).is_err());
    assert!(validate_bounds(256, 1024, 4096).is_ok());
    let bad = ChunkerConfig {
        min_size: 4096,
        avg_size: 1024,
        max_size: 8192,
    };
    assert!(Chunker::new(&bad).is_err());
}
