//! Diagnostic logging setup
//!
//! The report stream owns stdout, so diagnostics go to stderr and are
//! filtered with `RUST_LOG` (default: warnings only).

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INIT_GUARD: OnceLock<()> = OnceLock::new();

pub fn init() {
    if INIT_GUARD.set(()).is_err() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
