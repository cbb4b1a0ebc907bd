//! Memory accessors: the byte-addressable view of the target address space
//! and the EHABI prel31 relocation decoder.
//!
//! The unwinder never aliases section bytes with typed structures; every
//! read goes through [`UnwindMemory`] with explicit offsets. On hardware
//! the implementation is a pair of volatile raw reads; on the host, tests
//! implement the trait over synthetic segment images.

/// Read-only view of the 32-bit target address space.
///
/// The caller guarantees that every address handed to the unwinder lies
/// within a valid section (`.ARM.exidx`, `.ARM.extab`, or the interrupted
/// stack); no bounds checking happens at this layer.
pub trait UnwindMemory {
    /// Read the byte at `addr`.
    fn read_byte(&self, addr: u32) -> u8;

    /// Read the little-endian 32-bit word at `addr`.
    ///
    /// Assembled from four byte reads so that unaligned word fetches are
    /// well-defined on every implementation.
    fn read_word(&self, addr: u32) -> u32 {
        u32::from_le_bytes([
            self.read_byte(addr),
            self.read_byte(addr.wrapping_add(1)),
            self.read_byte(addr.wrapping_add(2)),
            self.read_byte(addr.wrapping_add(3)),
        ])
    }
}

/// Read the little-endian word at `section_base + offset`.
#[must_use]
pub fn read_word_le<M: UnwindMemory + ?Sized>(mem: &M, section_base: u32, offset: u32) -> u32 {
    mem.read_word(section_base.wrapping_add(offset))
}

/// Decode an EHABI prel31 offset.
///
/// prel31 packs a 31-bit signed PC-relative offset into the low 31 bits of
/// a word (bit 31 carries unrelated flags). The sign bit of the packed
/// value is bit 30; the decoded address is the sign-extended offset plus
/// `location`, the address the word was loaded from, wrapping mod 2³².
#[must_use]
pub fn decode_prel31(word: u32, location: u32) -> u32 {
    let mut offset = word & 0x7FFF_FFFF;
    if offset & 0x4000_0000 != 0 {
        offset |= 0x8000_0000;
    }
    offset.wrapping_add(location)
}
