fn main() {
    // Plugins run inside an interpreter embedded through pyo3 0.20, built
    // against the abi3 stable ABI. Homebrew and python.org builds on macOS
    // are usually newer than the newest Python that pyo3 release knows, and
    // without this flag its build script refuses to link against them.
    if cfg!(target_os = "macos") {
        unsafe {
            std::env::set_var("PYO3_USE_ABI3_FORWARD_COMPATIBILITY", "1");
        };
        println!("cargo:rustc-env=PYO3_USE_ABI3_FORWARD_COMPATIBILITY=1");
    }
    println!("cargo:rerun-if-changed=src/build.rs");
}
