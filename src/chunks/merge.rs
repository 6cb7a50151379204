//! Chunk Merger
//!
//! Reduces an ordered chunk set to one newline-delimited byte stream.
//!
//! ## Algorithm
//!
//! 1. Zero chunks merge to empty output; one chunk is returned verbatim.
//! 2. `max_line` is the highest `last` line over all chunks. Beyond
//!    `MergeLimits::max_lines` the merge fails before allocating anything.
//! 3. A dense slot array of `max_line` entries is filled chunk by chunk,
//!    in the order given. A later chunk overwrites an earlier one's line
//!    (last write wins under listing order).
//! 4. Occupied slots are emitted in line order, each followed by `\n`.
//!    Unoccupied slots (gaps) are skipped, never emitted as blank lines.
//!
//! Line payloads are `Bytes` slices of the downloaded chunk, so moving
//! them into slots never copies line data.

use crate::chunks::error::{ChunkError, ChunkResult};
use crate::chunks::key::LineRange;
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

/// Hard ceiling on `max_line`: 30,000 chunks x ~100 lines, with ~3x headroom
pub const MAX_MERGE_LINES: u64 = 10_000_000;

/// `max_line` above which a merge logs a warning but proceeds
pub const LARGE_MERGE_WARNING_LINES: u64 = 1_000_000;

/// A downloaded chunk: key, decoded line range and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub key: String,
    pub range: LineRange,
    pub data: Bytes,
}

impl ChunkInfo {
    pub fn new(key: impl Into<String>, range: LineRange, data: impl Into<Bytes>) -> Self {
        ChunkInfo {
            key: key.into(),
            range,
            data: data.into(),
        }
    }
}

/// Memory-safety limits applied to a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeLimits {
    /// Merges with a higher `max_line` fail with `MergeSafetyLimit`
    pub max_lines: u64,
    /// Merges with a higher `max_line` log a warning
    pub warn_lines: u64,
}

impl Default for MergeLimits {
    fn default() -> Self {
        MergeLimits {
            max_lines: MAX_MERGE_LINES,
            warn_lines: LARGE_MERGE_WARNING_LINES,
        }
    }
}

/// Merge chunks with last-write-wins per line, in the given order
///
/// The caller must pass chunks in ascending key order (as returned by the
/// lister and preserved by the downloader).
pub fn merge_chunks(mut chunks: Vec<ChunkInfo>, limits: &MergeLimits) -> ChunkResult<Bytes> {
    if chunks.len() <= 1 {
        // Verbatim: keeps the original trailing-newline state
        return Ok(chunks.pop().map(|c| c.data).unwrap_or_default());
    }

    let max_line = chunks.iter().map(|c| c.range.last).max().unwrap_or(0);

    if max_line > limits.max_lines {
        return Err(ChunkError::MergeSafetyLimit {
            max_line,
            limit: limits.max_lines,
        });
    }
    let slot_count = usize::try_from(max_line).map_err(|_| ChunkError::MergeSafetyLimit {
        max_line,
        limit: limits.max_lines,
    })?;

    if max_line > limits.warn_lines {
        warn!(
            max_line,
            chunk_count = chunks.len(),
            threshold = limits.warn_lines,
            "Large chunk merge operation"
        );
    }

    let chunk_count = chunks.len();
    let mut slots: Vec<Option<Bytes>> = vec![None; slot_count];
    let mut conflicts: u64 = 0;

    for chunk in chunks {
        for (offset, line) in split_lines(&chunk.data).into_iter().enumerate() {
            let line_num = chunk.range.first + offset as u64;
            // Out-of-range lines (first_line 0, payload longer than the key claims) are dropped
            if line_num < 1 || line_num > max_line {
                continue;
            }
            let slot = &mut slots[(line_num - 1) as usize];
            if let Some(previous) = slot.as_ref() {
                if previous != &line {
                    conflicts += 1;
                    warn!(
                        line_num,
                        chunk = %chunk.key,
                        old_len = previous.len(),
                        new_len = line.len(),
                        "Chunk overlap with differing content"
                    );
                }
            }
            *slot = Some(line);
        }
    }

    let (occupied, total_len) = slots
        .iter()
        .flatten()
        .fold((0usize, 0usize), |(n, len), line| (n + 1, len + line.len() + 1));

    let mut merged = BytesMut::with_capacity(total_len);
    for line in slots.into_iter().flatten() {
        merged.extend_from_slice(&line);
        merged.extend_from_slice(b"\n");
    }

    debug!(
        chunk_count,
        max_line,
        lines = occupied,
        gaps = slot_count - occupied,
        conflicts,
        bytes = merged.len(),
        "Merged chunks"
    );

    Ok(merged.freeze())
}

/// Split on `\n` without copying; a final line without a trailing newline is kept
pub fn split_lines(data: &Bytes) -> Vec<Bytes> {
    let mut lines = Vec::new();
    let mut start = 0;
    for end in memchr::memchr_iter(b'\n', data) {
        lines.push(data.slice(start..end));
        start = end + 1;
    }
    if start < data.len() {
        lines.push(data.slice(start..));
    }
    lines
}

/// Plain concatenation, for chunks known to be sequential and non-overlapping
pub fn merge_chunks_simple(chunks: &[Bytes]) -> Bytes {
    match chunks {
        [] => Bytes::new(),
        [only] => only.clone(),
        _ => {
            let total = chunks.iter().map(Bytes::len).sum();
            let mut merged = BytesMut::with_capacity(total);
            for chunk in chunks {
                merged.extend_from_slice(chunk);
            }
            merged.freeze()
        }
    }
}

/// True if any two chunks cover a common line
///
/// Reversed ranges (`first > last`) cover no line and are ignored. For the
/// rest this equals testing every pair for `a.first <= b.last && b.first <= a.last`.
pub fn chunks_overlap(chunks: &[ChunkInfo]) -> bool {
    let mut ranges: Vec<LineRange> = chunks
        .iter()
        .map(|c| c.range)
        .filter(|r| r.first <= r.last)
        .collect();
    if ranges.len() <= 1 {
        return false;
    }
    ranges.sort_unstable();

    let mut reach = ranges[0].last;
    for range in &ranges[1..] {
        if range.first <= reach {
            return true;
        }
        reach = reach.max(range.last);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::key::encode_chunk_name;

    fn chunk(first: u64, last: u64, data: &str) -> ChunkInfo {
        ChunkInfo::new(
            encode_chunk_name(first, last),
            LineRange::new(first, last),
            data.to_string(),
        )
    }

    fn numbered(prefix: &str, first: u64, last: u64) -> String {
        (first..=last)
            .map(|i| format!("{}{}\n", prefix, i))
            .collect()
    }

    fn merge(chunks: Vec<ChunkInfo>) -> Bytes {
        merge_chunks(chunks, &MergeLimits::default()).unwrap()
    }

    #[test]
    fn test_empty_set_is_empty() {
        assert!(merge(Vec::new()).is_empty());
    }

    #[test]
    fn test_single_chunk_is_verbatim() {
        for data in ["a\nb\n", "a\nb", "", "\n\n"] {
            let merged = merge(vec![chunk(1, 2, data)]);
            assert_eq!(merged, data.as_bytes());
        }
    }

    #[test]
    fn test_non_overlapping_concatenation() {
        let merged = merge(vec![chunk(1, 2, "line1\nline2\n"), chunk(3, 4, "line3\nline4\n")]);
        assert_eq!(merged, &b"line1\nline2\nline3\nline4\n"[..]);
    }

    #[test]
    fn test_full_overlap_last_write_wins() {
        let merged = merge(vec![
            chunk(1, 5, &numbered("old", 1, 5)),
            chunk(1, 10, &numbered("new", 1, 10)),
        ]);
        assert_eq!(merged, numbered("new", 1, 10).as_bytes());
    }

    #[test]
    fn test_partial_overlap_keeps_earlier_lines() {
        let merged = merge(vec![
            chunk(1, 5, &numbered("A", 1, 5)),
            chunk(3, 10, &numbered("B", 3, 10)),
        ]);
        let expected = format!("{}{}", numbered("A", 1, 2), numbered("B", 3, 10));
        assert_eq!(merged, expected.as_bytes());
    }

    #[test]
    fn test_identical_overlap_is_stable() {
        let merged = merge(vec![
            chunk(1, 3, &numbered("x", 1, 3)),
            chunk(2, 4, &numbered("x", 2, 4)),
        ]);
        assert_eq!(merged, numbered("x", 1, 4).as_bytes());
    }

    #[test]
    fn test_gap_is_skipped() {
        let merged = merge(vec![
            chunk(1, 3, &numbered("l", 1, 3)),
            chunk(6, 8, &numbered("l", 6, 8)),
        ]);
        let text = String::from_utf8(merged.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["l1", "l2", "l3", "l6", "l7", "l8"]);
        assert!(!text.contains("\n\n"));
    }

    #[test]
    fn test_missing_trailing_newline_contributes_last_line() {
        let merged = merge(vec![chunk(1, 2, "a\nb"), chunk(3, 3, "c")]);
        assert_eq!(merged, &b"a\nb\nc\n"[..]);
    }

    #[test]
    fn test_out_of_range_lines_are_dropped() {
        // Key claims [1,2] and [3,3]; first payload carries an extra line
        // that lands on 3 and is then overwritten, second payload overflows max_line.
        let merged = merge(vec![chunk(1, 2, "a\nb\nextra\n"), chunk(3, 3, "c\nd\n")]);
        assert_eq!(merged, &b"a\nb\nc\n"[..]);

        // first_line 0 cannot address a slot
        let merged = merge(vec![chunk(0, 1, "zero\none\n"), chunk(2, 2, "two\n")]);
        assert_eq!(merged, &b"one\ntwo\n"[..]);
    }

    #[test]
    fn test_safety_limit_fails_without_output() {
        let limits = MergeLimits {
            max_lines: 100,
            warn_lines: 50,
        };
        let err = merge_chunks(vec![chunk(1, 1, "a\n"), chunk(101, 101, "b\n")], &limits)
            .unwrap_err();
        assert!(matches!(
            err,
            ChunkError::MergeSafetyLimit {
                max_line: 101,
                limit: 100
            }
        ));
        assert!(err.to_string().contains("exceeds safety limit"));
    }

    #[test]
    fn test_default_safety_limit() {
        let err = merge_chunks(
            vec![chunk(1, 1, "a\n"), chunk(MAX_MERGE_LINES + 1, MAX_MERGE_LINES + 1, "b\n")],
            &MergeLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ChunkError::MergeSafetyLimit { .. }));
    }

    #[test]
    fn test_warning_threshold_still_merges() {
        let limits = MergeLimits {
            max_lines: 100,
            warn_lines: 2,
        };
        let merged = merge_chunks(vec![chunk(1, 2, "a\nb\n"), chunk(3, 3, "c\n")], &limits).unwrap();
        assert_eq!(merged, &b"a\nb\nc\n"[..]);
    }

    #[test]
    fn test_split_lines() {
        let lines = split_lines(&Bytes::from_static(b"a\nb\nc\n"));
        assert_eq!(lines, vec!["a", "b", "c"]);

        let lines = split_lines(&Bytes::from_static(b"a\nb\nc"));
        assert_eq!(lines, vec!["a", "b", "c"]);

        assert!(split_lines(&Bytes::new()).is_empty());

        let lines = split_lines(&Bytes::from_static(b"only"));
        assert_eq!(lines, vec!["only"]);

        let lines = split_lines(&Bytes::from_static(b"\n\nx"));
        assert_eq!(lines, vec!["", "", "x"]);
    }

    #[test]
    fn test_chunks_overlap() {
        let set = |ranges: &[(u64, u64)]| -> Vec<ChunkInfo> {
            ranges.iter().map(|&(f, l)| chunk(f, l, "")).collect()
        };

        assert!(!chunks_overlap(&[]));
        assert!(!chunks_overlap(&set(&[(1, 10)])));
        assert!(!chunks_overlap(&set(&[(1, 5), (6, 10)])));
        assert!(chunks_overlap(&set(&[(1, 5), (5, 10)])));
        assert!(chunks_overlap(&set(&[(1, 7), (5, 10)])));
        assert!(chunks_overlap(&set(&[(1, 10), (3, 7)])));
        // Unsorted input, overlap between first and last
        assert!(chunks_overlap(&set(&[(20, 30), (1, 5), (6, 10), (25, 26)])));
        assert!(!chunks_overlap(&set(&[(20, 30), (1, 5), (6, 10)])));
    }

    #[test]
    fn test_chunks_overlap_ignores_reversed_ranges() {
        let set = |ranges: &[(u64, u64)]| -> Vec<ChunkInfo> {
            ranges.iter().map(|&(f, l)| chunk(f, l, "")).collect()
        };
        let pairwise = |chunks: &[ChunkInfo]| {
            let valid: Vec<LineRange> = chunks
                .iter()
                .map(|c| c.range)
                .filter(|r| r.first <= r.last)
                .collect();
            valid.iter().enumerate().any(|(i, a)| {
                valid[i + 1..]
                    .iter()
                    .any(|b| a.first <= b.last && b.first <= a.last)
            })
        };

        // A reversed range sorts ahead of the range it would otherwise shadow
        let reversed = set(&[(5, 3), (4, 6)]);
        assert!(!chunks_overlap(&reversed));
        assert_eq!(chunks_overlap(&reversed), pairwise(&reversed));

        assert!(!chunks_overlap(&set(&[(9, 2), (1, 20)])));
        assert!(chunks_overlap(&set(&[(9, 2), (1, 20), (15, 16)])));

        for ranges in [
            vec![(3, 1), (2, 2), (2, 4)],
            vec![(10, 1), (1, 4), (5, 9), (8, 8)],
            vec![(7, 6), (1, 5), (6, 6), (8, 12)],
        ] {
            let chunks = set(&ranges);
            assert_eq!(chunks_overlap(&chunks), pairwise(&chunks), "{:?}", ranges);
        }
    }

    #[test]
    fn test_merge_chunks_simple() {
        assert!(merge_chunks_simple(&[]).is_empty());
        assert_eq!(
            merge_chunks_simple(&[Bytes::from_static(b"only")]),
            &b"only"[..]
        );
        assert_eq!(
            merge_chunks_simple(&[
                Bytes::from_static(b"a\nb\n"),
                Bytes::from_static(b"c\n"),
                Bytes::new(),
            ]),
            &b"a\nb\nc\n"[..]
        );
    }

    #[test]
    fn test_simple_agrees_with_line_merge_when_sequential() {
        let chunks = vec![
            chunk(1, 2, &numbered("s", 1, 2)),
            chunk(3, 5, &numbered("s", 3, 5)),
            chunk(6, 6, &numbered("s", 6, 6)),
        ];
        assert!(!chunks_overlap(&chunks));
        let payloads: Vec<Bytes> = chunks.iter().map(|c| c.data.clone()).collect();
        assert_eq!(merge_chunks_simple(&payloads), merge(chunks));
    }
}
