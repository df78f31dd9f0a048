//! Process logging.
//!
//! Call sites across the crate use the same one-liner shape the rest of
//! this codebase has always used — `logging::info(source, message)` — but
//! it is now backed by `tracing` instead of a SQLite-persisted log table,
//! since the core keeps no storage beyond the in-memory history ring.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a `tracing-subscriber` formatter reading `RUST_LOG`, defaulting
/// to `info` when unset. Safe to call more than once; only the first call
/// takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}

pub fn debug(source: &str, message: &str) {
    tracing::debug!(target: "proxy", source, "{message}");
}

pub fn info(source: &str, message: &str) {
    tracing::info!(target: "proxy", source, "{message}");
}

pub fn warn(source: &str, message: &str) {
    tracing::warn!(target: "proxy", source, "{message}");
}

pub fn error(source: &str, message: &str) {
    tracing::error!(target: "proxy", source, "{message}");
}
