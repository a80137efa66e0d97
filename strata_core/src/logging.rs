//! Logging setup.
//!
//! Library code only emits `tracing` events; binaries, tests and benches
//! that want to see them call [`init_with_level`] once.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a compact `fmt` subscriber filtered by `level` or `RUST_LOG`.
///
/// Calling this more than once, or after another subscriber has been
/// installed, is a no-op.
pub fn init_with_level(level: Option<&str>) {
    INIT.call_once(|| {
        if tracing::dispatcher::has_been_set() {
            return;
        }

        let env = match level {
            Some(l) if !l.is_empty() => l.to_string(),
            _ => std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
        };

        let filter = tracing_subscriber::EnvFilter::try_new(env.clone()).unwrap_or_else(|e| {
            eprintln!("WARN: invalid log filter '{env}': {e}; falling back to 'warn'");
            tracing_subscriber::EnvFilter::new("warn")
        });

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .compact()
            .try_init();
    });
}
