//! Tracing subscriber setup for hosts embedding the Shoal core.
//!
//! Levels used by the core:
//! - WARN: hash mismatches, corrupt or rejected resume data, callback panics
//! - INFO: download complete, resume data accepted or seeded, full rechecks
//! - DEBUG: piece verified, spot-check results
//! - TRACE: rejected fragments

use tracing_subscriber::EnvFilter;

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Plain text subscriber. Level comes from `RUST_LOG`, `info` if unset.
pub fn init() {
    tracing_subscriber::fmt().with_env_filter(filter("info")).init();
}

/// JSON subscriber, one object per line.
pub fn init_json() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter("info"))
        .init();
}

/// Test subscriber. Safe to call from every test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}
