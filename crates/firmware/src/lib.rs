//! FDIR demonstration firmware for the Arm MPS2-AN500 (Cortex-M7).
//!
//! This crate is the hardware shell around the [`fdir`] unwinder:
//!
//! - [`boot`] enables the configurable fault classes and the fault-causing
//!   trap bits, and resolves the EHABI section boundaries from linker
//!   symbols.
//! - [`exception_handlers`] installs naked handlers on all four fault
//!   vectors, captures the hardware exception frame, runs the unwinder and
//!   logs the crash report over defmt/RTT.
//! - `main.rs` is a workload that deliberately divides by zero a few calls
//!   deep, so the reconstructed stack has something to show.
//!
//! # Feature layout
//!
//! Everything that touches registers, assembly or the linker is gated
//! behind the `hardware` feature; the pure register-value helpers compile
//! and test on the host:
//!
//! ```bash
//! cargo test -p firmware                 # host: pure helpers
//! cargo build -p firmware --release \
//!     --target thumbv7em-none-eabihf --features hardware
//! ```
//!
//! # Toolchain contract
//!
//! The unwinder only works if the build keeps EHABI tables alive and uses
//! the frame-pointer ABI (`unwind.x`, `-C force-frame-pointers=yes`,
//! `-C force-unwind-tables=yes` — see `.cargo/config.toml`). Without them
//! the tables are stripped or the saved `[fp, lr]` pair is absent, and
//! every trace degenerates to the seed frame.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::doc_markdown)] // register names and hex addresses in doc comments

pub mod boot;
pub mod exception_handlers;
