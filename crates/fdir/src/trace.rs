//! Call-stack reconstruction: the bounded unwind loop.
//!
//! Starting from a single `(return address, frame pointer)` seed, the loop
//! repeatedly locates the EHABI record for the current return address,
//! executes its descriptor to find the caller's saved `[fp, lr]` pair, and
//! appends one [`Call`] per frame — innermost first — until a terminal
//! condition is reached.

use crate::descriptor::{execute_descriptor, DescriptorOutcome};
use crate::exidx::{find_entry_for_address, EntryKind, UnwindTables};
use crate::memory::{read_word_le, UnwindMemory};

/// Compile-time bound on reconstructed frames.
pub const CALL_STACK_MAX_SIZE: usize = 20;

/// Terminal return-address sentinel: ends the walk and marks the terminal
/// entry of a refused or unwindable-no-further trace.
pub const TERMINAL_LR: u32 = 0xFFFF_FFFF;

/// Frame-pointer pattern treated as stack corruption.
///
/// Heuristic with no architectural basis — it matches the fill pattern the
/// surrounding system paints unused stack with, stopping a walk that has
/// wandered into never-written memory.
pub const FP_CORRUPTION_GUARD: u32 = 0x0707_0707;

const TERMINAL_CALL: Call = Call {
    lr: TERMINAL_LR,
    fp: 0xFFFF_FFFF,
};

/// One reconstructed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Call {
    /// Return address into the caller. After the walk this holds the entry
    /// address of the enclosing function (see [`unwind`]).
    pub lr: u32,
    /// The caller's frame pointer.
    pub fp: u32,
}

/// Ordered sequence of reconstructed frames, innermost first.
///
/// `size` counts the valid entries and never exceeds
/// [`CALL_STACK_MAX_SIZE`]; when the walk ends at a frame that refuses
/// unwinding, the terminal sentinel `{0xFFFF_FFFF, 0xFFFF_FFFF}` is
/// additionally written one slot past `size` if room remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CallStack {
    /// Count of valid entries.
    pub size: usize,
    /// Frame storage; `calls[..size]` are the reconstructed frames.
    pub calls: [Call; CALL_STACK_MAX_SIZE],
}

impl CallStack {
    /// Empty, zeroed call stack; `const` so it can live in a static.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            size: 0,
            calls: [Call { lr: 0, fp: 0 }; CALL_STACK_MAX_SIZE],
        }
    }

    /// The reconstructed frames, innermost first.
    #[must_use]
    pub fn frames(&self) -> &[Call] {
        &self.calls[..self.size.min(CALL_STACK_MAX_SIZE)]
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an unwind walk stopped. All reporting is in-band — the walk never
/// aborts or diverges; this value names the terminal condition for the
/// recovery policy and the crash log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopReason {
    /// An `EXIDX_CANTUNWIND` record (or a refuse-to-unwind instruction)
    /// ended the walk; the terminal sentinel was appended if room
    /// remained.
    CantUnwind,
    /// A recovered return address equalled the terminal sentinel.
    TerminalSentinel,
    /// A recovered frame pointer matched [`FP_CORRUPTION_GUARD`].
    CorruptFramePointer,
    /// [`CALL_STACK_MAX_SIZE`] frames were reconstructed; the trace is
    /// truncated, not complete.
    DepthExceeded,
    /// An out-of-line descriptor uses the generic personality model, which
    /// this unwinder does not support; the last resolved frame is the
    /// terminal record.
    UnsupportedDescriptor,
}

/// Reconstruct the call chain leading to `seed`.
///
/// `seed.lr` is the interrupted return address (the stacked PC at fault
/// entry) and `seed.fp` the interrupted frame-pointer register. The walk
/// writes at most [`CALL_STACK_MAX_SIZE`] frames into `call_stack` and
/// reads only the exidx/extab sections and the interrupted stack.
///
/// Each recorded frame's `lr` is snapped to the entry address of the
/// enclosing function, losing the within-function call site.
/// The recovered caller return addresses have 1 subtracted to strip the
/// Thumb state bit, so they refer to the instruction after the call.
///
/// The walk is deterministic and idempotent over an immutable memory
/// image.
pub fn unwind<M: UnwindMemory + ?Sized>(
    mem: &M,
    tables: &UnwindTables,
    call_stack: &mut CallStack,
    seed: Call,
) -> StopReason {
    call_stack.size = 0;
    call_stack.calls[0] = seed;

    loop {
        if call_stack.size >= CALL_STACK_MAX_SIZE {
            return StopReason::DepthExceeded;
        }
        let current = call_stack.calls[call_stack.size];
        if current.lr == TERMINAL_LR {
            return StopReason::TerminalSentinel;
        }
        if current.fp == FP_CORRUPTION_GUARD {
            return StopReason::CorruptFramePointer;
        }

        let entry = find_entry_for_address(mem, tables, current.lr);

        // Snap the frame to the enclosing function's entry point.
        // TODO: also keep the original within-function address so the
        // trace can show call sites, not just functions.
        call_stack.calls[call_stack.size].lr = entry.decoded_fn;
        call_stack.size += 1;

        let outcome = match entry.kind() {
            EntryKind::CantUnwind => {
                store_pending(call_stack, TERMINAL_CALL);
                return StopReason::CantUnwind;
            }
            EntryKind::Inline => {
                execute_descriptor(mem, entry.exidx_entry, entry.decoded_entry, current.fp)
            }
            EntryKind::ExtabRef => {
                let extab_word = read_word_le(mem, entry.decoded_entry, 0);
                if extab_word & 0x8000_0000 == 0 {
                    // Generic personality model: unsupported. The frame
                    // just recorded stays as the terminal record.
                    return StopReason::UnsupportedDescriptor;
                }
                execute_descriptor(mem, extab_word, entry.decoded_entry, current.fp)
            }
        };

        match outcome {
            DescriptorOutcome::Refused => {
                store_pending(call_stack, TERMINAL_CALL);
                return StopReason::CantUnwind;
            }
            DescriptorOutcome::Unwound { vsp } => {
                // The caller pair sits at the new vsp as [fp, lr]; strip
                // the Thumb bit from the recovered return address.
                let caller = Call {
                    fp: mem.read_word(vsp),
                    lr: mem.read_word(vsp.wrapping_add(4)).wrapping_sub(1),
                };
                store_pending(call_stack, caller);
            }
        }
    }
}

/// Stage the next frame to resolve (or the terminal sentinel) one slot
/// past `size`. Skipped without error when the buffer is full — the next
/// iteration stops on the depth bound before reading the slot.
fn store_pending(call_stack: &mut CallStack, call: Call) {
    if call_stack.size < CALL_STACK_MAX_SIZE {
        call_stack.calls[call_stack.size] = call;
    }
}
