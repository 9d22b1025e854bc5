//! Build script for ownership_debug_tools.
//!
//! Derives the `memsafe_checked` cfg from the build switch:
//! checks are compiled in when debug assertions are on or the `checked`
//! feature is selected, and compiled out when the `unchecked` feature is
//! selected.

use std::env;

fn main() {
    println!("cargo:rustc-check-cfg=cfg(memsafe_checked)");
    println!("cargo:rerun-if-changed=build.rs");

    let debug_assertions = env::var("CARGO_CFG_DEBUG_ASSERTIONS").is_ok();
    let force_checked = env::var("CARGO_FEATURE_CHECKED").is_ok();
    let force_unchecked = env::var("CARGO_FEATURE_UNCHECKED").is_ok();

    if (debug_assertions || force_checked) && !force_unchecked {
        println!("cargo:rustc-cfg=memsafe_checked");
    }
}
