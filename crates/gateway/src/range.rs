//! HTTP byte ranges and their translation into fixed-size chunk fetches.

use crate::error::GatewayError;

/// A single range parsed from a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=from-to` or `bytes=from-`.
    FromTo { from: u64, to: Option<u64> },
    /// `bytes=-n`: the last `n` bytes.
    Suffix(u64),
}

/// Parse a `Range` header value.
///
/// Only single `bytes` ranges are understood. Anything else (other units,
/// multiple ranges, malformed numbers, `bytes=-0`) yields `None`, which
/// callers treat as a whole-file request.
pub fn parse_range_header(value: &str) -> Option<RangeSpec> {
    let spec = value.trim().strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let suffix: u64 = end.parse().ok()?;
        return (suffix > 0).then_some(RangeSpec::Suffix(suffix));
    }

    let from: u64 = start.parse().ok()?;
    let to = if end.is_empty() {
        None
    } else {
        Some(end.parse::<u64>().ok()?)
    };
    Some(RangeSpec::FromTo { from, to })
}

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub from: u64,
    pub to: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    /// `Content-Range` value for a file of `file_size` bytes.
    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{file_size}", self.from, self.to)
    }
}

/// Resolve a requested range against the file size.
///
/// `None` spec means the whole file; the result is `None` only for a
/// zero-byte file, which has no bytes to address. Ranges ending past the
/// last byte, or ending before they start, are unsatisfiable.
pub fn resolve_range(
    spec: Option<RangeSpec>,
    file_size: u64,
) -> Result<Option<ByteRange>, GatewayError> {
    let Some(spec) = spec else {
        return Ok(file_size.checked_sub(1).map(|to| ByteRange { from: 0, to }));
    };
    let last = file_size
        .checked_sub(1)
        .ok_or(GatewayError::RangeUnsatisfiable { file_size })?;

    let (from, to) = match spec {
        RangeSpec::FromTo { from, to } => (from, to.unwrap_or(last)),
        RangeSpec::Suffix(n) => (file_size.saturating_sub(n), last),
    };
    if to > last || to < from {
        return Err(GatewayError::RangeUnsatisfiable { file_size });
    }
    Ok(Some(ByteRange { from, to }))
}

/// Chunk fetch plan covering one byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: u64,
    /// Offset of the first chunk, aligned down to the chunk size.
    pub aligned_offset: u64,
    /// Bytes dropped from the head of the first chunk.
    pub leading_trim: u64,
    /// Bytes kept from the head of the last chunk.
    pub trailing_keep: u64,
    /// Number of chunks fetched.
    pub chunk_count: u64,
}

impl ChunkPlan {
    /// Plan the fetches for `range`. `chunk_size` must be non-zero.
    pub fn new(range: ByteRange, chunk_size: u64) -> Self {
        let aligned_offset = range.from - range.from % chunk_size;
        Self {
            chunk_size,
            aligned_offset,
            leading_trim: range.from - aligned_offset,
            trailing_keep: range.to % chunk_size + 1,
            chunk_count: range.to / chunk_size - aligned_offset / chunk_size + 1,
        }
    }

    /// Backend offset of chunk `i`.
    pub fn chunk_offset(&self, i: u64) -> u64 {
        self.aligned_offset + i * self.chunk_size
    }

    /// Slice `[start, end)` of chunk `i` that belongs to the range.
    pub fn keep(&self, i: u64) -> (u64, u64) {
        let start = if i == 0 { self.leading_trim } else { 0 };
        let end = if i + 1 == self.chunk_count {
            self.trailing_keep
        } else {
            self.chunk_size
        };
        (start, end)
    }

    /// Total bytes the plan yields.
    pub fn payload_len(&self) -> u64 {
        (self.chunk_count - 1) * self.chunk_size + self.trailing_keep - self.leading_trim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1_048_576;

    #[test]
    fn parses_supported_forms() {
        assert_eq!(
            parse_range_header("bytes=0-499"),
            Some(RangeSpec::FromTo {
                from: 0,
                to: Some(499)
            })
        );
        assert_eq!(
            parse_range_header("bytes=500-"),
            Some(RangeSpec::FromTo { from: 500, to: None })
        );
        assert_eq!(parse_range_header("bytes=-200"), Some(RangeSpec::Suffix(200)));
        assert_eq!(
            parse_range_header(" bytes= 10 - 20 "),
            Some(RangeSpec::FromTo {
                from: 10,
                to: Some(20)
            })
        );
    }

    #[test]
    fn rejects_unsupported_forms() {
        assert_eq!(parse_range_header("bytes=0-1,5-9"), None);
        assert_eq!(parse_range_header("items=0-1"), None);
        assert_eq!(parse_range_header("bytes=-0"), None);
        assert_eq!(parse_range_header("bytes=abc-"), None);
        assert_eq!(parse_range_header("bytes=-"), None);
        assert_eq!(parse_range_header("bytes=5"), None);
    }

    #[test]
    fn whole_file_and_open_ranges() {
        assert_eq!(
            resolve_range(None, 100).unwrap(),
            Some(ByteRange { from: 0, to: 99 })
        );
        assert_eq!(resolve_range(None, 0).unwrap(), None);
        let open = RangeSpec::FromTo { from: 40, to: None };
        assert_eq!(
            resolve_range(Some(open), 100).unwrap(),
            Some(ByteRange { from: 40, to: 99 })
        );
        assert_eq!(
            resolve_range(Some(RangeSpec::Suffix(500)), 100).unwrap(),
            Some(ByteRange { from: 0, to: 99 })
        );
    }

    #[test]
    fn inverted_range_is_unsatisfiable() {
        let spec = RangeSpec::FromTo {
            from: 5,
            to: Some(2),
        };
        let err = resolve_range(Some(spec), 100).unwrap_err();
        assert!(matches!(err, GatewayError::RangeUnsatisfiable { file_size: 100 }));
    }

    #[test]
    fn range_past_end_is_unsatisfiable() {
        let spec = RangeSpec::FromTo {
            from: 0,
            to: Some(100),
        };
        assert!(resolve_range(Some(spec), 100).is_err());
        let start_past = RangeSpec::FromTo {
            from: 100,
            to: None,
        };
        assert!(resolve_range(Some(start_past), 100).is_err());
        assert!(resolve_range(Some(RangeSpec::Suffix(1)), 0).is_err());
    }

    #[test]
    fn single_chunk_plan() {
        let plan = ChunkPlan::new(ByteRange { from: 10, to: 20 }, 1024);
        assert_eq!(plan.aligned_offset, 0);
        assert_eq!(plan.chunk_count, 1);
        assert_eq!(plan.keep(0), (10, 21));
        assert_eq!(plan.payload_len(), 11);
    }

    #[test]
    fn multi_chunk_plan() {
        let plan = ChunkPlan::new(
            ByteRange {
                from: 1_048_570,
                to: 2_097_160,
            },
            MIB,
        );
        assert_eq!(plan.aligned_offset, 0);
        assert_eq!(plan.leading_trim, 1_048_570);
        assert_eq!(plan.trailing_keep, 9);
        assert_eq!(plan.chunk_count, 3);
        assert_eq!(plan.keep(0), (1_048_570, MIB));
        assert_eq!(plan.keep(1), (0, MIB));
        assert_eq!(plan.keep(2), (0, 9));
        assert_eq!(plan.chunk_offset(2), 2 * MIB);
        assert_eq!(plan.payload_len(), 2_097_160 - 1_048_570 + 1);
    }

    #[test]
    fn range_ending_on_chunk_boundary() {
        let plan = ChunkPlan::new(ByteRange { from: 0, to: 1024 }, 1024);
        assert_eq!(plan.chunk_count, 2);
        assert_eq!(plan.keep(1), (0, 1));

        let first_byte = ChunkPlan::new(ByteRange { from: 0, to: 0 }, 1024);
        assert_eq!(first_byte.chunk_count, 1);
        assert_eq!(first_byte.keep(0), (0, 1));
    }

    #[test]
    fn plan_length_matches_range_for_many_shapes() {
        for chunk_size in [1, 3, 7, 64, 1000] {
            for from in [0, 1, 5, 63, 64, 65, 999] {
                for extra in [0, 1, 6, 63, 64, 500, 2000] {
                    let range = ByteRange {
                        from,
                        to: from + extra,
                    };
                    let plan = ChunkPlan::new(range, chunk_size);
                    assert_eq!(plan.payload_len(), range.len(), "{range:?} / {chunk_size}");
                    let summed: u64 = (0..plan.chunk_count)
                        .map(|i| {
                            let (s, e) = plan.keep(i);
                            e - s
                        })
                        .sum();
                    assert_eq!(summed, range.len());
                }
            }
        }
    }

    #[test]
    fn content_range_format() {
        let range = ByteRange { from: 0, to: 99 };
        assert_eq!(range.content_range(100), "bytes 0-99/100");
        assert_eq!(range.len(), 100);
    }
}
