//! Tracing-subscriber initialization shared by the binaries that embed
//! the mesh core (`demos/simulator`, the `tests` crate's harness setup).
//!
//! Library crates never call into this — only binaries install a
//! subscriber, so that embedding this workspace in a host application
//! (the graphical shell, a cellular-fallback daemon) never fights over
//! the global subscriber.

use tracing_subscriber::EnvFilter;

/// Install a `tracing-subscriber` `fmt` layer filtered by `RUST_LOG`,
/// defaulting to `info` when the variable is unset or unparsable.
///
/// Call once, from `main`. Safe to call more than once in a single
/// process (tests that each spin up their own simulator) — later calls
/// are no-ops rather than panics.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Like [`init`], but pins the default level instead of reading
/// `RUST_LOG`. Used by the simulator's `--verbose` flag.
pub fn init_with_default_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
