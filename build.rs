//! Build-time target selection that `cfg(target_feature)` cannot express on stable

use std::env;

fn main() {
    println!("cargo:rustc-check-cfg=cfg(armv7)");
    println!("cargo:rerun-if-env-changed=TARGET");

    // ARMv7 cores get `blx`; older ones set lr by hand
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("armv7") || target.starts_with("thumbv7") {
        println!("cargo:rustc-cfg=armv7");
    }
}
