//! Failure Detection, Identification and Recovery core for ARMv7-M.
//!
//! When a Cortex-M processor traps into a fault exception, the firmware
//! layer captures the hardware-stacked register frame and hands this crate
//! a single `(return address, frame pointer)` seed. From that seed the
//! unwinder reconstructs the call chain that led to the fault by
//! interpreting the compiler-generated `.ARM.exidx` / `.ARM.extab` tables
//! (Arm EHABI, compact personality model) — without executing any of the
//! faulted code.
//!
//! # Architecture
//!
//! ```text
//! Fault handler (firmware crate)
//!         ↓ seed + section boundaries
//! unwind loop            [trace]
//!         ↓
//! exidx lookup           [exidx]      — binary search over .ARM.exidx
//!         ↓
//! descriptor decoding    [descriptor] — EHABI unwind bytecode over vsp
//!         ↓
//! memory accessors       [memory]     — UnwindMemory trait
//! ```
//!
//! Every memory access goes through the [`UnwindMemory`] trait, so the
//! whole pipeline runs on the host against synthetic memory images — no
//! ARM toolchain needed for the test suite. The firmware crate provides
//! the one implementation that reads the real address space.
//!
//! The unwinder reports all termination conditions in-band: a terminal
//! sentinel entry in the [`CallStack`] plus a [`StopReason`] return value.
//! Nothing here panics, allocates, or blocks — the code runs inside a
//! fault handler at the highest active priority.

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]
#![allow(clippy::doc_markdown)] // register names and hex addresses in doc comments

pub mod descriptor;
pub mod exidx;
pub mod memory;
pub mod registers;
pub mod trace;

pub use descriptor::{
    execute_descriptor, DescriptorOutcome, InstructionStream, Personality, UnwindInstruction,
};
pub use exidx::{find_entry_for_address, EntryKind, ExidxEntry, UnwindTables, EXIDX_CANTUNWIND};
pub use memory::{decode_prel31, read_word_le, UnwindMemory};
pub use registers::{Cfsr, DebugInfo, Hfsr, SavedRegisters, CFSR_ADDRESS, HFSR_ADDRESS};
pub use trace::{
    unwind, Call, CallStack, StopReason, CALL_STACK_MAX_SIZE, FP_CORRUPTION_GUARD, TERMINAL_LR,
};
