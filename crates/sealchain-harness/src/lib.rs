//! Test harness for the sealchain stack.
//!
//! Provides an in-memory trustchain server implementing the client's
//! [`Transport`](sealchain_client::Transport) trait, so whole sessions run
//! end to end in-process. The scenario suite lives in this crate's
//! `tests/` directory.

#![forbid(unsafe_code)]

mod server;

pub use server::TrustchainServer;

use std::sync::Once;

/// Install a test-friendly tracing subscriber once per process.
///
/// Controlled by `RUST_LOG`; defaults to warnings so dropped-block records
/// show up in test output.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
