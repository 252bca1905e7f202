use tracing_subscriber::EnvFilter;

/// Install the process-wide subscriber used by the `wq-*` binaries.
///
/// Honors `RUST_LOG`; defaults to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
