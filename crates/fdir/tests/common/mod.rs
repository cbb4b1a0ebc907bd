//! Shared test fixtures: a synthetic target-memory image and builders for
//! `.ARM.exidx` sections.

// Each integration-test crate uses its own subset of these helpers.
#![allow(dead_code)]

use fdir::{UnwindMemory, UnwindTables};

/// Sparse memory image assembled from disjoint segments.
///
/// Reads outside every segment panic with the offending address, so a test
/// also proves which memory the unwinder does *not* touch.
#[derive(Default)]
pub struct FakeMemory {
    segments: Vec<(u32, Vec<u8>)>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a segment of raw bytes at `base`.
    pub fn with_segment(mut self, base: u32, bytes: Vec<u8>) -> Self {
        self.segments.push((base, bytes));
        self
    }

    /// Add a segment of little-endian words at `base`.
    pub fn with_words(self, base: u32, words: &[u32]) -> Self {
        self.with_segment(base, words_le(words))
    }
}

impl UnwindMemory for FakeMemory {
    fn read_byte(&self, addr: u32) -> u8 {
        for (base, bytes) in &self.segments {
            if let Some(offset) = addr.checked_sub(*base) {
                if let Some(&byte) = bytes.get(offset as usize) {
                    return byte;
                }
            }
        }
        panic!("unwinder read unmapped address {addr:#010x}");
    }
}

/// Flatten words into little-endian bytes.
pub fn words_le(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// prel31-encode `target` relative to `location`.
pub fn prel31(location: u32, target: u32) -> u32 {
    target.wrapping_sub(location) & 0x7FFF_FFFF
}

/// Second-word value for an inline Su16 descriptor with the given three
/// instruction bytes.
pub fn su16_inline(b0: u8, b1: u8, b2: u8) -> u32 {
    0x8000_0000 | (u32::from(b0) << 16) | (u32::from(b1) << 8) | u32::from(b2)
}

/// Build an `.ARM.exidx` section at `base` from `(function address,
/// second word)` pairs (already sorted by function address) and the
/// matching [`UnwindTables`].
pub fn exidx_section(base: u32, entries: &[(u32, u32)]) -> (Vec<u8>, UnwindTables) {
    let mut bytes = Vec::new();
    for (i, &(fn_addr, word)) in entries.iter().enumerate() {
        let record_addr = base + (i as u32) * 8;
        bytes.extend_from_slice(&prel31(record_addr, fn_addr).to_le_bytes());
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    let tables = UnwindTables {
        exidx_start: base,
        exidx_end: base + bytes.len() as u32,
        extab_start: 0,
        extab_end: 0,
    };
    (bytes, tables)
}
