//! Logging utilities and structured logging support

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system
///
/// Honors `RUST_LOG`; defaults to `info` when the variable is unset.
pub fn init() {
    let env = env_logger::Env::default().default_filter_or("info");
    // A second call (tests, embedding applications) must not panic
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}

/// Initialize logging for unit and integration tests
///
/// Output is captured by the test harness and only shown for failing tests.
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}
