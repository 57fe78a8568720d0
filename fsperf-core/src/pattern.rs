// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Self-describing test data.
//!
//! Every 1024-byte block of a test file starts with an 8-byte little-endian
//! marker holding the block's absolute offset; the remaining bytes carry a
//! filler byte. A buffer read back from any offset can therefore be checked
//! without keeping a copy of what was written.
//!
//! The fixed pattern table used by the remote `writepattern` command lives
//! here too, but it shares nothing with the marker scheme.

use std::fmt;

use crate::types::PatternIndex;

/// Marker spacing in bytes.
pub const BLOCK_SIZE: u64 = 1024;
/// Marker width in bytes.
pub const MARKER_SIZE: u64 = 8;
/// Filler used by the initial file preparation.
pub const DEFAULT_FILLER: u8 = 0xf6;
/// Mismatches recorded before verification gives up.
pub const MAX_RECORDED_MISMATCHES: usize = 32;

/// Expected byte at an absolute file offset.
#[inline]
pub fn expected_byte(offset: u64, filler: u8) -> u8 {
    let in_block = offset % BLOCK_SIZE;
    if in_block < MARKER_SIZE {
        (offset - in_block).to_le_bytes()[in_block as usize]
    } else {
        filler
    }
}

/// One byte that did not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Absolute file offset.
    pub offset: u64,
    /// Position inside the verified buffer.
    pub index: usize,
    pub actual: u8,
    pub expected: u8,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mismatch at {:#x} (buffer +{:#x}): {:#04x}, expected {:#04x}",
            self.offset, self.index, self.actual, self.expected
        )
    }
}

/// Outcome of [`PatternBuffer::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub mismatches: Vec<Mismatch>,
    /// Set when checking stopped early after too many mismatches.
    pub truncated: bool,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// First mismatch, if any.
    pub fn first(&self) -> Option<&Mismatch> {
        self.mismatches.first()
    }

    fn record(&mut self, mismatch: Mismatch) -> bool {
        self.mismatches.push(mismatch);
        if self.mismatches.len() >= MAX_RECORDED_MISMATCHES {
            self.truncated = true;
            return false;
        }
        true
    }
}

/// Deterministic fill and verification of file content.
pub struct PatternBuffer;

impl PatternBuffer {
    /// Fill `buf` with the content expected at file offset `offset`.
    pub fn fill(offset: u64, buf: &mut [u8], filler: u8) {
        buf.fill(filler);

        let end = offset + buf.len() as u64;
        let mut block = offset - offset % BLOCK_SIZE;
        while block < end {
            let marker = block.to_le_bytes();
            let first = block.max(offset);
            let last = (block + MARKER_SIZE).min(end);
            for pos in first..last {
                buf[(pos - offset) as usize] = marker[(pos - block) as usize];
            }
            block += BLOCK_SIZE;
        }
    }

    /// Check `buf` against the content expected at file offset `offset`.
    pub fn verify(offset: u64, buf: &[u8], filler: u8) -> VerifyReport {
        let mut report = VerifyReport::default();
        let end = offset + buf.len() as u64;
        let mut pos = offset;

        while pos < end {
            let in_block = pos % BLOCK_SIZE;
            if in_block < MARKER_SIZE {
                let expected = expected_byte(pos, filler);
                let index = (pos - offset) as usize;
                if buf[index] != expected
                    && !report.record(Mismatch {
                        offset: pos,
                        index,
                        actual: buf[index],
                        expected,
                    })
                {
                    break;
                }
                pos += 1;
                continue;
            }

            // Filler run up to the next marker.
            let run_end = (pos - in_block + BLOCK_SIZE).min(end);
            let run = &buf[(pos - offset) as usize..(run_end - offset) as usize];
            let mut stopped = false;
            for (i, &actual) in run.iter().enumerate() {
                if actual != filler {
                    let at = pos + i as u64;
                    if !report.record(Mismatch {
                        offset: at,
                        index: (at - offset) as usize,
                        actual,
                        expected: filler,
                    }) {
                        stopped = true;
                        break;
                    }
                }
            }
            if stopped {
                break;
            }
            pos = run_end;
        }

        if !report.is_ok() {
            tracing::debug!(
                offset = offset,
                len = buf.len(),
                mismatches = report.mismatches.len(),
                "Pattern verification failed"
            );
        }
        report
    }
}

/// Fixed write patterns addressable by [`PatternIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSpec {
    bytes: &'static [u8],
}

const PATTERN_TABLE: [&[u8]; PatternIndex::COUNT] = [
    &[0xf0],
    &[0xf1],
    &[0xf2],
    &[0xf3],
    &[0xf4],
    &[0xf5],
    &[0xf6],
    &[0xf7],
    &[0xf8],
    &[0xf9],
    &[
        0x1f, 0x4e, 0x99, 0xec, 0x71, 0x71, 0x48, 0x0f, 0xa7, 0x5c, 0xb4, 0x5a, 0x1f, 0xc7, 0xd0,
        0x93,
    ],
];

impl PatternSpec {
    /// Look up a pattern.
    pub fn get(index: PatternIndex) -> Self {
        Self {
            bytes: PATTERN_TABLE[index.position()],
        }
    }

    /// Raw pattern bytes.
    pub fn bytes(&self) -> &'static [u8] {
        self.bytes
    }

    /// The byte value when the pattern is a single repeated byte.
    pub fn single_byte(&self) -> Option<u8> {
        match self.bytes {
            [b] => Some(*b),
            _ => None,
        }
    }

    /// Expected byte `distance` bytes after the start of a pattern write.
    pub fn byte_at(&self, distance: u64) -> u8 {
        self.bytes[(distance % self.bytes.len() as u64) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pattern(index: u32) -> PatternSpec {
        PatternSpec::get(PatternIndex::new(index).unwrap())
    }

    #[test]
    fn test_marker_layout() {
        let mut buf = vec![0u8; 2048];
        PatternBuffer::fill(0, &mut buf, 0xf6);
        assert_eq!(&buf[0..8], &0u64.to_le_bytes());
        assert!(buf[8..1024].iter().all(|&b| b == 0xf6));
        assert_eq!(&buf[1024..1032], &1024u64.to_le_bytes());
    }

    #[test]
    fn test_fill_verify_unaligned() {
        for &(offset, len) in &[(0u64, 1usize), (3, 10), (1020, 20), (4093, 9000), (1 << 33, 777)] {
            let mut buf = vec![0u8; len];
            PatternBuffer::fill(offset, &mut buf, 0xf1);
            assert!(PatternBuffer::verify(offset, &buf, 0xf1).is_ok(), "offset {}", offset);
        }
    }

    #[test]
    fn test_split_fills_match_single_fill() {
        let mut whole = vec![0u8; 5000];
        PatternBuffer::fill(100, &mut whole, 0xf6);

        let mut pieces = vec![0u8; 5000];
        let (a, rest) = pieces.split_at_mut(7);
        PatternBuffer::fill(100, a, 0xf6);
        let (b, c) = rest.split_at_mut(1500);
        PatternBuffer::fill(107, b, 0xf6);
        PatternBuffer::fill(1607, c, 0xf6);

        assert_eq!(whole, pieces);
    }

    #[test]
    fn test_verify_reports_offsets() {
        let mut buf = vec![0u8; 4096];
        PatternBuffer::fill(8192, &mut buf, 0xf6);
        buf[1030] ^= 0xff;
        buf[2000] = 0;

        let report = PatternBuffer::verify(8192, &buf, 0xf6);
        assert!(!report.is_ok());
        assert_eq!(report.mismatches.len(), 2);
        let first = report.first().unwrap();
        assert_eq!(first.offset, 8192 + 1030);
        assert_eq!(first.index, 1030);

        // Idempotent.
        assert_eq!(report, PatternBuffer::verify(8192, &buf, 0xf6));
    }

    #[test]
    fn test_verify_is_bounded() {
        let buf = vec![0u8; 64 * 1024];
        let report = PatternBuffer::verify(0, &buf, 0xf6);
        assert_eq!(report.mismatches.len(), MAX_RECORDED_MISMATCHES);
        assert!(report.truncated);
    }

    #[test]
    fn test_wrong_filler_detected() {
        let mut buf = vec![0u8; 1500];
        PatternBuffer::fill(0, &mut buf, 0xf6);
        assert!(!PatternBuffer::verify(0, &buf, 0xf5).is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn fill_then_verify_round_trips(
            offset in 0u64..(1u64 << 40),
            len in 0usize..6000,
            filler in any::<u8>(),
        ) {
            let mut buf = vec![0u8; len];
            PatternBuffer::fill(offset, &mut buf, filler);
            let report = PatternBuffer::verify(offset, &buf, filler);
            prop_assert!(report.is_ok(), "{:?}", report.first());
            // Verifying again gives the same answer.
            prop_assert_eq!(report, PatternBuffer::verify(offset, &buf, filler));
        }

        #[test]
        fn split_fills_match_single_fill(
            offset in 0u64..(1u64 << 40),
            len in 1usize..6000,
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
            filler in any::<u8>(),
        ) {
            let mut whole = vec![0u8; len];
            PatternBuffer::fill(offset, &mut whole, filler);

            let mut points: Vec<usize> = cuts.iter().map(|c| c.index(len + 1)).collect();
            points.push(0);
            points.push(len);
            points.sort_unstable();
            points.dedup();

            let mut pieces = vec![0u8; len];
            for pair in points.windows(2) {
                let (start, end) = (pair[0], pair[1]);
                PatternBuffer::fill(offset + start as u64, &mut pieces[start..end], filler);
                prop_assert!(PatternBuffer::verify(offset + start as u64, &pieces[start..end], filler).is_ok());
            }

            prop_assert_eq!(&whole, &pieces);
            prop_assert!(PatternBuffer::verify(offset, &pieces, filler).is_ok());
        }

        #[test]
        fn single_corruption_is_found(
            offset in 0u64..(1u64 << 40),
            len in 1usize..6000,
            at in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut buf = vec![0u8; len];
            PatternBuffer::fill(offset, &mut buf, DEFAULT_FILLER);
            let index = at.index(len);
            buf[index] ^= flip;

            let report = PatternBuffer::verify(offset, &buf, DEFAULT_FILLER);
            prop_assert_eq!(report.mismatches.len(), 1);
            prop_assert_eq!(report.mismatches[0].offset, offset + index as u64);
        }
    }

    #[test]
    fn test_pattern_table() {
        assert_eq!(pattern(0).single_byte(), Some(0xf0));
        assert_eq!(pattern(9).single_byte(), Some(0xf9));
        let multi = pattern(10);
        assert_eq!(multi.single_byte(), None);
        assert_eq!(multi.bytes().len(), 16);
        assert_eq!(multi.byte_at(0), 0x1f);
        assert_eq!(multi.byte_at(17), 0x4e);
    }
}
