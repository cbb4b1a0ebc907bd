//! `.ARM.exidx` index table reading and the frame locator.
//!
//! The index is a flat array of 8-byte records, one per function, sorted by
//! ascending function address (EHABI §6 guarantees the sort; the locator
//! relies on it). Each record pairs a prel31 function-start offset with
//! either the special `EXIDX_CANTUNWIND` marker, an inline compact-model
//! descriptor, or a prel31 reference into `.ARM.extab`.

use crate::memory::{decode_prel31, read_word_le, UnwindMemory};

/// Special second-word pattern: the frame must not be unwound (EHABI §6).
pub const EXIDX_CANTUNWIND: u32 = 0x1;

/// Size of one `.ARM.exidx` record: two 32-bit words.
pub const EXIDX_ENTRY_SIZE: u32 = 8;

/// The four linker-provided section boundaries the unwinder consumes.
///
/// `__exidx_start` / `__exidx_end` delimit the index table;
/// `__extab_start` / `__extab_end` delimit the out-of-line descriptors.
/// The firmware crate resolves the symbols; here they are plain addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnwindTables {
    /// Address of the first `.ARM.exidx` record.
    pub exidx_start: u32,
    /// One past the last `.ARM.exidx` record.
    pub exidx_end: u32,
    /// Address of the first `.ARM.extab` byte.
    pub extab_start: u32,
    /// One past the last `.ARM.extab` byte.
    pub extab_end: u32,
}

impl UnwindTables {
    /// Number of 8-byte records in the index.
    #[must_use]
    pub const fn entry_count(&self) -> u32 {
        self.exidx_end.wrapping_sub(self.exidx_start) / EXIDX_ENTRY_SIZE
    }
}

/// How the second word of an index record is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EntryKind {
    /// `EXIDX_CANTUNWIND`: the frame refuses unwinding.
    CantUnwind,
    /// Bit 31 set: the compact-model descriptor is inlined in the word.
    Inline,
    /// Bit 31 clear: prel31 reference to a descriptor in `.ARM.extab`.
    ExtabRef,
}

/// One decoded `.ARM.exidx` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExidxEntry {
    /// Raw first word: prel31 offset to the function start (bit 31 clear).
    pub exidx_fn: u32,
    /// Raw second word.
    pub exidx_entry: u32,
    /// Absolute address of the function this record covers.
    pub decoded_fn: u32,
    /// For [`EntryKind::ExtabRef`], the absolute descriptor address;
    /// otherwise the raw second word kept as-is (sentinel or inline
    /// descriptor).
    pub decoded_entry: u32,
}

impl ExidxEntry {
    /// Decode the record at `section_base + byte_offset`.
    #[must_use]
    pub fn read<M: UnwindMemory + ?Sized>(mem: &M, section_base: u32, byte_offset: u32) -> Self {
        let exidx_fn = read_word_le(mem, section_base, byte_offset);
        let exidx_entry = read_word_le(mem, section_base, byte_offset.wrapping_add(4));

        let decoded_fn = decode_prel31(exidx_fn, section_base.wrapping_add(byte_offset));
        let decoded_entry = if exidx_entry == EXIDX_CANTUNWIND || exidx_entry & 0x8000_0000 != 0 {
            exidx_entry
        } else {
            decode_prel31(
                exidx_entry,
                section_base.wrapping_add(byte_offset).wrapping_add(4),
            )
        };

        Self {
            exidx_fn,
            exidx_entry,
            decoded_fn,
            decoded_entry,
        }
    }

    /// Classify the second word.
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        if self.exidx_entry == EXIDX_CANTUNWIND {
            EntryKind::CantUnwind
        } else if self.exidx_entry & 0x8000_0000 != 0 {
            EntryKind::Inline
        } else {
            EntryKind::ExtabRef
        }
    }

    /// Synthetic record for the degenerate empty-table case: behaves as
    /// CANTUNWIND so the walk terminates instead of reading out of bounds.
    #[must_use]
    pub const fn cant_unwind() -> Self {
        Self {
            exidx_fn: 0,
            exidx_entry: EXIDX_CANTUNWIND,
            decoded_fn: 0,
            decoded_entry: EXIDX_CANTUNWIND,
        }
    }
}

/// Locate the index record covering `return_address`.
///
/// Binary search for the greatest `decoded_fn ≤ return_address`, O(log₂ N)
/// over the record count. When `return_address` precedes the first record
/// the first record is returned — a degenerate result whose descriptor
/// will not describe the frame, terminating the walk the same way the
/// original toolchain-placed CANTUNWIND at the image base would.
#[must_use]
pub fn find_entry_for_address<M: UnwindMemory + ?Sized>(
    mem: &M,
    tables: &UnwindTables,
    return_address: u32,
) -> ExidxEntry {
    let count = tables.entry_count();
    if count == 0 {
        return ExidxEntry::cant_unwind();
    }

    // Upper bound: first index whose function starts after return_address.
    let mut lo = 0u32;
    let mut hi = count;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let entry = ExidxEntry::read(mem, tables.exidx_start, mid * EXIDX_ENTRY_SIZE);
        if entry.decoded_fn <= return_address {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    let index = lo.saturating_sub(1);
    ExidxEntry::read(mem, tables.exidx_start, index * EXIDX_ENTRY_SIZE)
}
