//! Compact-model unwind descriptor decoding (EHABI §7.3, §9.3, §10.2).
//!
//! A compact-model descriptor starts with a word whose bit 31 is set and
//! whose bits 27–24 select the personality routine:
//!
//! ```text
//! 31 | 30-28 | 27-24 | 23 ──────────────────────── 0 |
//!  1 |     0 | index | data for personality[index]   |
//! ```
//!
//! - `0` — Su16: three unwind-instruction bytes in bits 23–16, 15–8, 7–0.
//! - `1` — Lu16: bits 23–16 hold a count N; the instruction stream spans
//!   `2 + 4·N` bytes starting at byte offset 2 of the first word and
//!   rolling into the N following words.
//! - `2` — Lu32: identical packing (the 32-bit-scope variant differs only
//!   in descriptor scope, which the unwinder does not use).
//!
//! Instruction bytes are big-endian-packed within each little-endian-stored
//! word: byte offset 0 occupies bits 31–24, offset 1 bits 23–16, and so on.
//!
//! Execution tracks a single abstract value, the virtual stack pointer
//! (`vsp`). On this platform the prologues only move `vsp` and pop
//! registers around the saved `[fp, lr]` pair, so after a successful
//! decode `vsp` addresses exactly that pair. Register pops are therefore
//! parsed (for their byte length) but deliberately unmodeled.

use crate::memory::UnwindMemory;

/// Arm-defined compact-model personality routines (indices 0–2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Personality {
    /// Short descriptor: three instruction bytes in the first word.
    Su16,
    /// Long descriptor, 16-bit scopes.
    Lu16,
    /// Long descriptor, 32-bit scopes.
    Lu32,
}

impl Personality {
    /// Personality index from bits 27–24 of the first descriptor word.
    /// Indices 3–15 are reserved and unsupported here.
    #[must_use]
    pub const fn from_entry(entry: u32) -> Option<Self> {
        match (entry >> 24) & 0xF {
            0 => Some(Self::Su16),
            1 => Some(Self::Lu16),
            2 => Some(Self::Lu32),
            _ => None,
        }
    }
}

/// One decoded EHABI unwind instruction.
///
/// Variants map one-to-one onto the rows of the EHABI §10.3 instruction
/// table that are legal on Cortex-M. Only the `Vsp*` rows and
/// [`UnwindInstruction::RefuseUnwind`] affect frame location; the pop rows
/// are carried so that decoding consumes the correct number of bytes (and
/// so tests can assert the wire format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UnwindInstruction {
    /// `vsp += n`. Covers `00xxxxxx` (n = (x << 2) + 4, range 4…256) and
    /// `10110010 uleb128` (n = 0x204 + (uleb << 2)).
    VspAdd(u32),
    /// `vsp -= (x << 2) + 4` — `01xxxxxx`.
    VspSub(u32),
    /// `10000000 00000000` — the frame refuses to be unwound.
    RefuseUnwind,
    /// `1000iiii iiiiiiii` — pop r4–r15 under a 12-bit mask. Unmodeled.
    PopRegisters {
        /// Bit 0 = r4 … bit 11 = r15.
        mask: u16,
    },
    /// `1001nnnn` (n ≠ 13, 15) — `vsp = r[n]`. The unwinder has no
    /// register file; on this platform the seed already equals the frame
    /// pointer these descriptors restore from, so this is a no-op.
    VspFromRegister(u8),
    /// `10100nnn` / `10101nnn` — pop r4…r[4+n], optionally r14. Unmodeled.
    PopRegisterRange {
        /// n: the range extends to r[4 + n].
        count: u8,
        /// Set for the `10101nnn` form (r14 included).
        pop_link: bool,
    },
    /// `10110000` — finish. Remaining bytes of the run are padding.
    Finish,
    /// `10110001 0000iiii` (i ≠ 0) — pop r0–r3 under a 4-bit mask.
    /// Unmodeled.
    PopArgumentRegisters {
        /// Bit 0 = r0 … bit 3 = r3.
        mask: u8,
    },
    /// VFP / iWMMXt register pops (the `0xB3`, `0xB8`–`0xBF`, `0xC0`–`0xC9`,
    /// `0xD0`–`0xD7` families). Unmodeled.
    PopExtensionRegisters,
    /// Reserved or spare encoding: decoded for length, no state change.
    Spare,
}

/// Result of executing one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DescriptorOutcome {
    /// The prologue was undone; `vsp` now addresses the caller's saved
    /// `[fp, lr]` pair.
    Unwound {
        /// Updated virtual stack pointer.
        vsp: u32,
    },
    /// The descriptor refused unwinding (`0x80 0x00`); treat like
    /// CANTUNWIND.
    Refused,
}

/// Byte-at-a-time fetcher over a descriptor's instruction stream.
///
/// Byte index `i` of the stream lives at absolute byte offset
/// `offset2 + i` from the descriptor start, where `offset2` is 1 for Su16
/// and 2 for Lu16/Lu32. Offsets 0–3 come from the first word passed in
/// (which, for an inline descriptor, is not backed by memory at
/// `entry_ptr`); crossing a word boundary re-reads the enclosing word.
struct InstructionCursor<'m, M: ?Sized> {
    mem: &'m M,
    entry_ptr: u32,
    first_word: u32,
    next: u32,
    end: u32,
}

impl<'m, M: UnwindMemory + ?Sized> InstructionCursor<'m, M> {
    fn next_byte(&mut self) -> Option<u8> {
        if self.next >= self.end {
            return None;
        }
        let offset = self.next;
        self.next += 1;

        let word = if offset < 4 {
            self.first_word
        } else {
            self.mem.read_word(self.entry_ptr.wrapping_add(offset & !3))
        };
        Some((word >> (24 - 8 * (offset % 4))) as u8)
    }
}

/// Iterator over the unwind instructions of one compact-model descriptor.
pub struct InstructionStream<'m, M: ?Sized> {
    cursor: InstructionCursor<'m, M>,
    offset2: u32,
}

impl<'m, M: UnwindMemory + ?Sized> InstructionStream<'m, M> {
    /// Instruction stream for the descriptor whose first word is `entry`,
    /// resident at `entry_ptr`. `None` when bits 27–24 select a
    /// personality outside the Arm-defined compact range.
    #[must_use]
    pub fn new(mem: &'m M, entry: u32, entry_ptr: u32) -> Option<Self> {
        let personality = Personality::from_entry(entry)?;
        let (offset2, count) = match personality {
            Personality::Su16 => (1, 3),
            Personality::Lu16 | Personality::Lu32 => {
                let n = (entry >> 16) & 0xFF;
                (2, 2 + 4 * n)
            }
        };
        Some(Self {
            cursor: InstructionCursor {
                mem,
                entry_ptr,
                first_word: entry,
                next: offset2,
                end: offset2 + count,
            },
            offset2,
        })
    }

    /// Instruction bytes consumed so far. Never exceeds
    /// [`advertised_len`](Self::advertised_len).
    #[must_use]
    pub fn bytes_consumed(&self) -> u32 {
        self.cursor.next - self.offset2
    }

    /// Total instruction bytes advertised by the personality header
    /// (3 for Su16, `2 + 4·N` for Lu16/Lu32).
    #[must_use]
    pub fn advertised_len(&self) -> u32 {
        self.cursor.end - self.offset2
    }
}

impl<'m, M: UnwindMemory + ?Sized> Iterator for InstructionStream<'m, M> {
    type Item = UnwindInstruction;

    fn next(&mut self) -> Option<UnwindInstruction> {
        decode_next(&mut self.cursor)
    }
}

/// ULEB128: little-endian base-128, high bit flags continuation.
fn read_uleb128<M: UnwindMemory + ?Sized>(cursor: &mut InstructionCursor<'_, M>) -> Option<u32> {
    let mut value: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = cursor.next_byte()?;
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
        if shift >= 32 {
            // Operand wider than the value space: malformed.
            return None;
        }
    }
}

/// Decode the next instruction, consuming exactly its encoded length.
/// `None` when the advertised byte count is exhausted, or when a
/// multi-byte instruction is truncated by it.
fn decode_next<M: UnwindMemory + ?Sized>(
    cursor: &mut InstructionCursor<'_, M>,
) -> Option<UnwindInstruction> {
    use UnwindInstruction::*;

    let op = cursor.next_byte()?;
    let instruction = match op {
        0x00..=0x3F => VspAdd((u32::from(op & 0x3F) << 2) + 4),
        0x40..=0x7F => VspSub((u32::from(op & 0x3F) << 2) + 4),
        0x80..=0x8F => {
            let op2 = cursor.next_byte()?;
            if op == 0x80 && op2 == 0x00 {
                RefuseUnwind
            } else {
                PopRegisters {
                    mask: (u16::from(op & 0x0F) << 8) | u16::from(op2),
                }
            }
        }
        // 0x9D (sp) and 0x9F (pc) are reserved as source registers.
        0x9D | 0x9F => Spare,
        0x90..=0x9F => VspFromRegister(op & 0x0F),
        0xA0..=0xA7 => PopRegisterRange {
            count: op & 0x07,
            pop_link: false,
        },
        0xA8..=0xAF => PopRegisterRange {
            count: op & 0x07,
            pop_link: true,
        },
        0xB0 => Finish,
        0xB1 => {
            let op2 = cursor.next_byte()?;
            if op2 != 0 && op2 & 0xF0 == 0 {
                PopArgumentRegisters { mask: op2 & 0x0F }
            } else {
                // 0xB1 0x00 and non-zero high nibble are spare.
                Spare
            }
        }
        0xB2 => VspAdd(0x204_u32.wrapping_add(read_uleb128(cursor)? << 2)),
        0xB3 => {
            // sssscccc operand: pop VFP d[s]…d[s+c] (FSTMFDX form).
            let _ = cursor.next_byte()?;
            PopExtensionRegisters
        }
        // 0xB4 pops the PAC return-address code on ARMv8.1-M; no modeled
        // state either way. 0xB5–0xB7 are spare.
        0xB4..=0xB7 => Spare,
        0xB8..=0xBF => PopExtensionRegisters,
        0xC0..=0xC5 => PopExtensionRegisters,
        0xC6 => {
            let _ = cursor.next_byte()?;
            PopExtensionRegisters
        }
        0xC7 => {
            let op2 = cursor.next_byte()?;
            if op2 != 0 && op2 & 0xF0 == 0 {
                PopExtensionRegisters
            } else {
                Spare
            }
        }
        0xC8 | 0xC9 => {
            let _ = cursor.next_byte()?;
            PopExtensionRegisters
        }
        0xCA..=0xCF => Spare,
        0xD0..=0xD7 => PopExtensionRegisters,
        0xD8..=0xFF => Spare,
    };
    Some(instruction)
}

/// Execute one compact-model descriptor over `vsp`.
///
/// `entry` is the first descriptor word (bit 31 set), `entry_ptr` its
/// resident address (used only when the stream spills past the first
/// word), `vsp` the caller's frame pointer seeding the walk.
///
/// An unsupported personality index leaves `vsp` untouched — the frame is
/// treated as having a no-op prologue. `0xB0` finish bytes inside the run
/// are ignored; the advertised count is authoritative.
#[must_use]
pub fn execute_descriptor<M: UnwindMemory + ?Sized>(
    mem: &M,
    entry: u32,
    entry_ptr: u32,
    vsp: u32,
) -> DescriptorOutcome {
    let Some(stream) = InstructionStream::new(mem, entry, entry_ptr) else {
        return DescriptorOutcome::Unwound { vsp };
    };

    let mut vsp = vsp;
    for instruction in stream {
        match instruction {
            UnwindInstruction::VspAdd(n) => vsp = vsp.wrapping_add(n),
            UnwindInstruction::VspSub(n) => vsp = vsp.wrapping_sub(n),
            UnwindInstruction::RefuseUnwind => return DescriptorOutcome::Refused,
            // Pops and spares carry no vsp change; see the module docs for
            // why that is sufficient on this platform.
            UnwindInstruction::VspFromRegister(_)
            | UnwindInstruction::PopRegisters { .. }
            | UnwindInstruction::PopRegisterRange { .. }
            | UnwindInstruction::PopArgumentRegisters { .. }
            | UnwindInstruction::PopExtensionRegisters
            | UnwindInstruction::Finish
            | UnwindInstruction::Spare => {}
        }
    }
    DescriptorOutcome::Unwound { vsp }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use UnwindInstruction::*;

    /// Memory that panics on access — for descriptors that must decode
    /// entirely from the first word.
    struct NoMemory;

    impl UnwindMemory for NoMemory {
        fn read_byte(&self, addr: u32) -> u8 {
            panic!("unexpected memory read at {addr:#010x}");
        }
    }

    /// Flat image at a fixed base, for out-of-line descriptors.
    struct Image {
        base: u32,
        bytes: Vec<u8>,
    }

    impl UnwindMemory for Image {
        fn read_byte(&self, addr: u32) -> u8 {
            self.bytes[(addr - self.base) as usize]
        }
    }

    /// Su16 first word from three instruction bytes.
    fn su16(b0: u8, b1: u8, b2: u8) -> u32 {
        0x8000_0000 | (u32::from(b0) << 16) | (u32::from(b1) << 8) | u32::from(b2)
    }

    #[test]
    fn personality_index_selection() {
        assert_eq!(Personality::from_entry(0x80B0_B0B0), Some(Personality::Su16));
        assert_eq!(Personality::from_entry(0x8100_B0B0), Some(Personality::Lu16));
        assert_eq!(Personality::from_entry(0x8200_B0B0), Some(Personality::Lu32));
        assert_eq!(Personality::from_entry(0x8300_0000), None);
        assert_eq!(Personality::from_entry(0x8F00_0000), None);
    }

    #[test]
    fn su16_vsp_add() {
        // 0x01: vsp += (1 << 2) + 4 = 8; then finish padding.
        let outcome = execute_descriptor(&NoMemory, su16(0x01, 0xB0, 0xB0), 0, 0x2000_0000);
        assert_eq!(outcome, DescriptorOutcome::Unwound { vsp: 0x2000_0008 });
    }

    #[test]
    fn su16_vsp_add_maximum_small_operand() {
        // 0x3F: vsp += (0x3F << 2) + 4 = 256.
        let outcome = execute_descriptor(&NoMemory, su16(0x3F, 0xB0, 0xB0), 0, 0x1000);
        assert_eq!(outcome, DescriptorOutcome::Unwound { vsp: 0x1100 });
    }

    #[test]
    fn su16_vsp_sub() {
        // 0x41: vsp -= (1 << 2) + 4 = 8.
        let outcome = execute_descriptor(&NoMemory, su16(0x41, 0xB0, 0xB0), 0, 0x2000_0008);
        assert_eq!(outcome, DescriptorOutcome::Unwound { vsp: 0x2000_0000 });
    }

    #[test]
    fn uleb128_large_increment() {
        // 0xB2 0x04: vsp += 0x204 + (4 << 2) = 0x214.
        let outcome = execute_descriptor(&NoMemory, su16(0xB2, 0x04, 0xB0), 0, 0x1000);
        assert_eq!(outcome, DescriptorOutcome::Unwound { vsp: 0x1214 });
    }

    #[test]
    fn refuse_to_unwind() {
        let outcome = execute_descriptor(&NoMemory, su16(0x80, 0x00, 0xB0), 0, 0x1000);
        assert_eq!(outcome, DescriptorOutcome::Refused);
    }

    #[test]
    fn unsupported_personality_is_noop_prologue() {
        let outcome = execute_descriptor(&NoMemory, 0x8700_0000, 0, 0x1234_5678);
        assert_eq!(outcome, DescriptorOutcome::Unwound { vsp: 0x1234_5678 });
    }

    #[test]
    fn register_pops_do_not_move_vsp() {
        // pop {r4-r7} mask form, then pop {r4, r14} range form.
        let outcome = execute_descriptor(&NoMemory, su16(0x80, 0x0F, 0xA8), 0, 0x1000);
        assert_eq!(outcome, DescriptorOutcome::Unwound { vsp: 0x1000 });
    }

    #[test]
    fn vsp_from_register_is_noop() {
        // 0x97: vsp = r7 — unmodeled; the seed is already the frame pointer.
        let outcome = execute_descriptor(&NoMemory, su16(0x97, 0xB0, 0xB0), 0, 0x4000);
        assert_eq!(outcome, DescriptorOutcome::Unwound { vsp: 0x4000 });
    }

    #[test]
    fn lu16_stream_spills_into_following_words() {
        // Lu16 with N = 1: 2 + 4 bytes of instructions. First word holds
        // bytes [0x04, 0x04] in bits 15-8 and 7-0; the next word holds
        // [0x04, 0x04, 0xB0, 0xB0]. Four 0x04 adds: 4 * ((4 << 2) + 4) = 80.
        let entry: u32 = 0x8101_0404;
        let descriptor_addr = 0x0900_0000;
        let mut bytes = entry.to_le_bytes().to_vec();
        // Big-endian packing within the little-endian stored word.
        bytes.extend_from_slice(&0x0404_B0B0_u32.to_le_bytes());
        let mem = Image {
            base: descriptor_addr,
            bytes,
        };
        let outcome = execute_descriptor(&mem, entry, descriptor_addr, 0x1000);
        assert_eq!(outcome, DescriptorOutcome::Unwound { vsp: 0x1000 + 80 });
    }

    #[test]
    fn decode_covers_every_lead_byte() {
        // Every one-byte opcode must decode to exactly one instruction;
        // two-byte opcodes get a zero operand appended. Whatever the lead
        // byte, decoding must consume the stream without stalling.
        for op in 0u16..=0xFF {
            let op = op as u8;
            let stream = InstructionStream::new(&NoMemory, su16(op, 0x00, 0xB0), 0)
                .expect("su16 personality");
            let decoded: Vec<_> = stream.collect();
            assert!(
                !decoded.is_empty(),
                "lead byte {op:#04x} decoded to nothing"
            );
        }
    }

    #[test]
    fn two_byte_opcode_truncated_by_count_is_dropped() {
        // 0x80 as the last advertised byte has no operand: the truncated
        // instruction is discarded and the run ends.
        let stream =
            InstructionStream::new(&NoMemory, su16(0xB0, 0xB0, 0x80), 0).expect("su16 personality");
        let decoded: Vec<_> = stream.collect();
        assert_eq!(decoded, vec![Finish, Finish]);
    }

    #[test]
    fn instruction_wire_format() {
        let collect = |b0, b1, b2| -> Vec<UnwindInstruction> {
            InstructionStream::new(&NoMemory, su16(b0, b1, b2), 0)
                .expect("su16 personality")
                .collect()
        };

        assert_eq!(collect(0x00, 0xB0, 0xB0)[0], VspAdd(4));
        assert_eq!(collect(0x7F, 0xB0, 0xB0)[0], VspSub(256));
        assert_eq!(
            collect(0x84, 0x21, 0xB0)[0],
            PopRegisters { mask: 0x0421 }
        );
        assert_eq!(collect(0x93, 0xB0, 0xB0)[0], VspFromRegister(3));
        assert_eq!(collect(0x9D, 0xB0, 0xB0)[0], Spare);
        assert_eq!(
            collect(0xA3, 0xB0, 0xB0)[0],
            PopRegisterRange {
                count: 3,
                pop_link: false
            }
        );
        assert_eq!(
            collect(0xAF, 0xB0, 0xB0)[0],
            PopRegisterRange {
                count: 7,
                pop_link: true
            }
        );
        assert_eq!(collect(0xB1, 0x05, 0xB0)[0], PopArgumentRegisters { mask: 0x5 });
        assert_eq!(collect(0xB1, 0x00, 0xB0)[0], Spare);
        assert_eq!(collect(0xB1, 0x35, 0xB0)[0], Spare);
        assert_eq!(collect(0xB3, 0x08, 0xB0)[0], PopExtensionRegisters);
        assert_eq!(collect(0xC2, 0xB0, 0xB0)[0], PopExtensionRegisters);
        assert_eq!(collect(0xD5, 0xB0, 0xB0)[0], PopExtensionRegisters);
        assert_eq!(collect(0xFF, 0xB0, 0xB0)[0], Spare);
    }

    #[test]
    fn multibyte_uleb128_operand() {
        // 0xB2 0x81 0x01 — uleb 0x81 0x01 = 1 + (1 << 7) = 129.
        // vsp += 0x204 + (129 << 2) = 0x204 + 0x204 = 0x408.
        let outcome = execute_descriptor(&NoMemory, su16(0xB2, 0x81, 0x01), 0, 0);
        assert_eq!(outcome, DescriptorOutcome::Unwound { vsp: 0x408 });
    }
}
