//! FDIR initialisation: fault-class enables, trap bits, and the EHABI
//! section boundaries.
//!
//! The register-value computation is pure and host-tested; the actual
//! writes live in hardware-gated functions, following the same split the
//! MPU configuration uses in the platform this was built against.
//!
//! # ARMv7-M registers touched (ARM DDI0403E §B3.2)
//!
//! | Register | Address      | Bits set |
//! |----------|--------------|----------|
//! | SHCSR    | `0xE000ED24` | 16 MEMFAULTENA, 17 BUSFAULTENA, 18 USGFAULTENA |
//! | CCR      | `0xE000ED14` | 3 UNALIGN_TRP, 4 DIV_0_TRP |
//!
//! With the SHCSR bits clear, every configurable fault escalates to
//! HardFault; enabling them routes each class to its own vector with the
//! CFSR sub-register identifying the cause. DIV_0_TRP makes SDIV/UDIV
//! with a zero divisor fault instead of silently producing zero.

#[cfg(feature = "hardware")]
use fdir::UnwindTables;

/// System Handler Control and State Register.
pub const SHCSR_ADDRESS: u32 = 0xE000_ED24;

/// Configuration and Control Register.
pub const CCR_ADDRESS: u32 = 0xE000_ED14;

/// SHCSR bits enabling the MemManage, BusFault and UsageFault exceptions.
#[must_use]
pub const fn shcsr_fault_enable_mask() -> u32 {
    (1 << 16) | (1 << 17) | (1 << 18)
}

/// CCR bits trapping divide-by-zero and unaligned accesses.
#[must_use]
pub const fn ccr_trap_mask() -> u32 {
    (1 << 4) | (1 << 3)
}

/// Enable the configurable fault classes and the CCR trap bits.
///
/// Must run early in boot, before the workload executes any arithmetic
/// that is expected to fault.
///
/// # Safety rationale
///
/// Read-modify-write of two SCB registers from privileged boot context,
/// before any exception handler can run; no concurrent access is
/// possible. The ISB flushes the pipeline so the new configuration
/// applies to the next instruction.
#[cfg(feature = "hardware")]
#[allow(unsafe_code)]
pub fn init_fdir() {
    // SAFETY: single writer during initialisation; SHCSR and CCR are
    // ordinary read/write SCB registers per ARM DDI0403E §B3.2.
    unsafe {
        let shcsr = core::ptr::read_volatile(SHCSR_ADDRESS as usize as *const u32);
        core::ptr::write_volatile(
            SHCSR_ADDRESS as usize as *mut u32,
            shcsr | shcsr_fault_enable_mask(),
        );

        let ccr = core::ptr::read_volatile(CCR_ADDRESS as usize as *const u32);
        core::ptr::write_volatile(CCR_ADDRESS as usize as *mut u32, ccr | ccr_trap_mask());
    }
    cortex_m::asm::isb();
}

/// Resolve the linker-provided EHABI section boundaries.
///
/// `__exidx_start`/`__exidx_end` are the toolchain's standard symbols for
/// `.ARM.exidx`; the `__extab_*` pair is defined by `unwind.x`. Only the
/// addresses are meaningful — the "values" of these symbols are the first
/// bytes of their sections.
#[cfg(feature = "hardware")]
#[allow(unsafe_code)]
#[must_use]
pub fn unwind_tables() -> UnwindTables {
    extern "C" {
        static __exidx_start: u32;
        static __exidx_end: u32;
        static __extab_start: u32;
        static __extab_end: u32;
    }

    // SAFETY: only the addresses of the linker symbols are taken; the
    // sections themselves are never dereferenced through these statics.
    unsafe {
        UnwindTables {
            exidx_start: core::ptr::addr_of!(__exidx_start) as usize as u32,
            exidx_end: core::ptr::addr_of!(__exidx_end) as usize as u32,
            extab_start: core::ptr::addr_of!(__extab_start) as usize as u32,
            extab_end: core::ptr::addr_of!(__extab_end) as usize as u32,
        }
    }
}
