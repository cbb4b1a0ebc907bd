//! Put the linker scripts on the search path for hardware builds.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Host builds (tests of the pure helpers) need no linker scripts.
    if env::var_os("CARGO_FEATURE_HARDWARE").is_some() {
        let out = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));
        for script in ["memory.x", "unwind.x"] {
            fs::copy(script, out.join(script))
                .unwrap_or_else(|e| panic!("failed to copy {script}: {e}"));
        }
        println!("cargo:rustc-link-search={}", out.display());
    }
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=unwind.x");
}
