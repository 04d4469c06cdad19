use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Filter used when neither `REFGROUP_LOG` nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "refgroup=info,refgroup_runtime=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("REFGROUP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialise tracing subscriber once per process.
pub fn init_logging() {
    INIT.call_once(|| {
        fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .compact()
            .init();
    });
}

/// Route logs through the test harness' captured output. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = fmt()
            .with_env_filter(env_filter())
            .with_test_writer()
            .try_init();
    });
}
