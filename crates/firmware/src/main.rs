//! FDIR demonstration workload.
//!
//! Arms the fault machinery, then walks a few calls deep into a small
//! signal-processing pipeline whose last stage divides by a sample count
//! that is always zero. With DIV_0_TRP set this raises a UsageFault, and
//! the RTT log shows the reconstructed chain back through every stage.

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use defmt_rtt as _;
use panic_probe as _;

use firmware::boot;

#[entry]
fn main() -> ! {
    boot::init_fdir();

    let tables = boot::unwind_tables();
    defmt::info!(
        "FDIR armed: exidx {=u32:#x}..{=u32:#x} ({=u32} entries), extab {=u32:#x}..{=u32:#x}",
        tables.exidx_start,
        tables.exidx_end,
        tables.entry_count(),
        tables.extab_start,
        tables.extab_end
    );

    let checksum = process_block(0x1234_5678);
    defmt::info!("workload survived?! checksum = {=u32:#x}", checksum);

    loop {
        cortex_m::asm::wfi();
    }
}

/// Outermost pipeline stage: whiten the block tag and hand it on.
#[inline(never)]
fn process_block(tag: u32) -> u32 {
    let mixed = tag.rotate_left(7) ^ 0xA5A5_A5A5;
    defmt::info!("process_block: mixed = {=u32:#x}", mixed);
    accumulate_samples(mixed)
}

/// Accumulate a fake sample window over the tag.
#[inline(never)]
fn accumulate_samples(seed: u32) -> u32 {
    let mut acc = seed;
    for i in 1..=8u32 {
        acc = acc.wrapping_mul(31).wrapping_add(i);
    }
    defmt::info!("accumulate_samples: acc = {=u32:#x}", acc);
    normalise(acc)
}

/// Normalise by the number of collected samples.
///
/// The "sample counter" is read from a source that never ran, so it is
/// zero and the `udiv` below faults once DIV_0_TRP is armed.
#[inline(never)]
fn normalise(total: u32) -> u32 {
    let samples = core::hint::black_box(0u32);
    udiv(total, samples)
}

/// Raw hardware UDIV.
///
/// Rust's `/` inserts a software zero check and panics before the
/// hardware ever sees the division; the demonstration needs the real
/// UsageFault, so the instruction is issued directly.
#[inline(never)]
fn udiv(n: u32, d: u32) -> u32 {
    let q;
    // SAFETY: UDIV has no memory or stack effects; with a zero divisor it
    // either returns 0 or, with DIV_0_TRP set, raises the UsageFault this
    // demo exists to show.
    unsafe {
        core::arch::asm!(
            "udiv {q}, {n}, {d}",
            q = out(reg) q,
            n = in(reg) n,
            d = in(reg) d,
            options(nomem, nostack)
        );
    }
    q
}
