//! Cortex-M fault handlers and context capture for the FDIR core.
//!
//! All four fault vectors (HardFault, MemManage, BusFault, UsageFault)
//! land here. Each handler must observe the interrupted context *exactly*
//! as the hardware left it, which imposes two constraints:
//!
//! - **Stack selection before anything else.** Bit 2 of the EXC_RETURN
//!   value in LR says whether the interrupted code ran on MSP or PSP; the
//!   hardware exception frame sits on that stack. The selection must
//!   happen before any ordinary function prologue pushes over LR.
//! - **No prologue at all.** The frame-pointer register (R7) still holds
//!   the interrupted function's frame pointer at handler entry — it seeds
//!   the whole unwind. A compiler-generated prologue would repoint it.
//!
//! Both are met by making the vector entries naked functions whose only
//! content is a short assembly trampoline. If the toolchain ever stopped
//! honouring the naked attribute, capture would record the handler's own
//! frame instead of the interrupted one and every trace would be garbage.
//!
//! The three configurable-fault vectors do the MSP/PSP selection
//! themselves. For HardFault, cortex-m-rt's `HardFaultTrampoline` has
//! already done it (leaving the frame address in r0 and r7 untouched)
//! before branching to the `_HardFault` symbol this module provides.
//!
//! # The crash singleton
//!
//! One process-wide [`DebugInfo`] exists, zero-initialised at program
//! start. It is written only from the single diverging fault entry below
//! and read only post-mortem (RTT, debugger). Faults do not re-enter on
//! this device — a fault inside the handler escalates to lockup — so the
//! handler has exclusive access for the duration of a capture.

/// Marker constant — lets host tests assert this module is compiled into
/// the crate even though the handlers themselves are hardware-only.
pub const FAULT_HANDLERS_DEFINED: bool = true;

#[cfg(feature = "hardware")]
mod hardware {
    use fdir::{
        unwind, Call, Cfsr, DebugInfo, Hfsr, SavedRegisters, StopReason, UnwindMemory,
        CFSR_ADDRESS, HFSR_ADDRESS,
    };

    /// Reads the target address space directly through raw pointers.
    ///
    /// The unwinder only ever hands this addresses inside `.ARM.exidx`,
    /// `.ARM.extab` or the interrupted stack.
    pub struct DeviceMemory;

    #[allow(unsafe_code)]
    impl UnwindMemory for DeviceMemory {
        fn read_byte(&self, addr: u32) -> u8 {
            // SAFETY: the unwinder reads linker-delimited table sections
            // and stack memory below a live stack pointer; both are plain
            // readable memory on this device.
            unsafe { core::ptr::read_volatile(addr as usize as *const u8) }
        }

        fn read_word(&self, addr: u32) -> u32 {
            if addr % 4 == 0 {
                // SAFETY: as above; aligned word reads are single bus
                // transactions.
                return unsafe { core::ptr::read_volatile(addr as usize as *const u32) };
            }
            u32::from_le_bytes([
                self.read_byte(addr),
                self.read_byte(addr.wrapping_add(1)),
                self.read_byte(addr.wrapping_add(2)),
                self.read_byte(addr.wrapping_add(3)),
            ])
        }
    }

    /// The process-wide crash record. Written only by `fault_entry`,
    /// read only after the handler has parked the core.
    static mut DEBUG_INFO: DebugInfo = DebugInfo::empty();

    /// Fill `info` from the hardware exception frame and produce the
    /// unwind seed: the interrupted PC and frame pointer.
    ///
    /// Must be called with the values the naked trampoline captured —
    /// once ordinary code has run, R7 and the stack no longer describe
    /// the interrupted context.
    #[allow(unsafe_code)]
    pub fn capture(info: &mut DebugInfo, frame: *const SavedRegisters, fp: u32) -> Call {
        info.registers = frame;
        // SAFETY: CFSR and HFSR are ordinary readable SCB registers
        // (ARM DDI0403E §B3.2.15/16).
        info.cfsr = Cfsr(unsafe { core::ptr::read_volatile(CFSR_ADDRESS as usize as *const u32) });
        info.hfsr = Hfsr(unsafe { core::ptr::read_volatile(HFSR_ADDRESS as usize as *const u32) });

        // SAFETY: `frame` is the hardware-pushed exception frame on the
        // stack selected by EXC_RETURN; it outlives the handler.
        let pc = unsafe { (*frame).pc };
        Call { lr: pc, fp }
    }

    /// Common diverging fault path: capture, unwind, report, park.
    #[allow(unsafe_code)]
    pub extern "C" fn fault_entry(frame: *const SavedRegisters, fp: u32) -> ! {
        // SAFETY: faults cannot re-enter (escalation to lockup), so this
        // is the only live reference to the singleton.
        let info = unsafe { &mut *core::ptr::addr_of_mut!(DEBUG_INFO) };

        let seed = capture(info, frame, fp);
        let tables = crate::boot::unwind_tables();
        let reason = unwind(&DeviceMemory, &tables, &mut info.call_stack, seed);

        log_debug_info(info, reason);

        // Recovery is a policy decision that does not live here; hold the
        // core so the record stays intact for RTT or a debugger.
        loop {
            cortex_m::asm::nop();
        }
    }

    /// Emit the crash record over defmt: registers, decoded fault status,
    /// and the reconstructed call chain (innermost first).
    #[allow(unsafe_code)]
    fn log_debug_info(info: &DebugInfo, reason: StopReason) {
        defmt::error!("==================[ FDIR fault report ]==================");

        // SAFETY: set from the trampoline-provided frame pointer just
        // before this call.
        if let Some(registers) = unsafe { info.registers.as_ref() } {
            defmt::error!(
                "r0={=u32:#x} r1={=u32:#x} r2={=u32:#x} r3={=u32:#x}",
                registers.r0,
                registers.r1,
                registers.r2,
                registers.r3
            );
            defmt::error!(
                "r12={=u32:#x} lr={=u32:#x} pc={=u32:#x} xpsr={=u32:#x}",
                registers.r12,
                registers.lr,
                registers.pc,
                registers.xpsr
            );
        }

        defmt::error!(
            "cfsr={=u32:#x} (divbyzero={=bool} unaligned={=bool} undef={=bool} \
             precise-bus={=bool} imprecise-bus={=bool} daccviol={=bool})",
            info.cfsr.0,
            info.cfsr.divide_by_zero(),
            info.cfsr.unaligned_access(),
            info.cfsr.undefined_instruction(),
            info.cfsr.precise_bus_error(),
            info.cfsr.imprecise_bus_error(),
            info.cfsr.data_access_violation()
        );
        defmt::error!(
            "hfsr={=u32:#x} (forced={=bool} vecttbl={=bool})",
            info.hfsr.0,
            info.hfsr.forced(),
            info.hfsr.vector_table_read()
        );

        for (i, call) in info.call_stack.frames().iter().enumerate() {
            defmt::error!(
                "call_stack[{=usize}] = {=u32:#x} (fp {=u32:#x})",
                i,
                call.lr,
                call.fp
            );
        }
        defmt::error!("unwind stopped: {}", reason);
    }

    // ── Fault vectors ─────────────────────────────────────────────────────

    /// HardFault tail. cortex-m-rt's `HardFaultTrampoline` has already
    /// selected MSP/PSP into r0 (clobbering only r0/r1) and branched
    /// here, so only the frame pointer remains to be captured.
    #[allow(unsafe_code)]
    #[unsafe(naked)]
    #[export_name = "_HardFault"]
    unsafe extern "C" fn hard_fault(_frame: *const SavedRegisters) -> ! {
        core::arch::naked_asm!(
            "mov r1, r7",
            "b {entry}",
            entry = sym fault_entry,
        )
    }

    /// MSP/PSP selection per EXC_RETURN bit 2, then into the common path
    /// with the untouched frame-pointer register.
    macro_rules! configurable_fault_vector {
        ($(#[$meta:meta])* $name:ident) => {
            $(#[$meta])*
            #[allow(unsafe_code, non_snake_case)]
            #[unsafe(naked)]
            #[no_mangle]
            pub unsafe extern "C" fn $name() -> ! {
                core::arch::naked_asm!(
                    "tst lr, #4",
                    "ite eq",
                    "mrseq r0, msp",
                    "mrsne r0, psp",
                    "mov r1, r7",
                    "b {entry}",
                    entry = sym fault_entry,
                )
            }
        };
    }

    configurable_fault_vector!(
        /// MemManage fault vector.
        MemoryManagement
    );
    configurable_fault_vector!(
        /// BusFault vector.
        BusFault
    );
    configurable_fault_vector!(
        /// UsageFault vector (divide-by-zero lands here once DIV_0_TRP is
        /// set).
        UsageFault
    );
}

#[cfg(feature = "hardware")]
pub use hardware::{capture, fault_entry, DeviceMemory};
