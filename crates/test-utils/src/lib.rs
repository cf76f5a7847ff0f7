//! Shared helpers for the siso test suites: manifest builders, scripted
//! executors and a couple of runtime conveniences.

pub mod builders;
pub mod fake_exec;
pub mod thread_fs;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Upper bound for any single awaited build or executor call in tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a test-writer subscriber once per process.
///
/// Output is captured by the harness and only shown for failing tests.
/// `RUST_LOG=siso=trace` shows step phase transitions.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking if it takes longer than [`TEST_TIMEOUT`].
///
/// A hung scheduler shows up as a timeout instead of a stuck test run.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(out) => out,
        Err(_) => panic!("test timed out after {TEST_TIMEOUT:?}"),
    }
}
