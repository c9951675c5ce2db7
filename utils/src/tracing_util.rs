//! Helpers related to tracing, used by main entrypoints

/// Initialize tracing with the default configuration.
///
/// The filter defaults to `info` and can be changed with `RUST_LOG`.
pub fn initialize_tracing() {
    // Don't include timestamps and such because they're not really useful and
    // too verbose; the recovery console is read live by an operator.
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .from_env_lossy();
    // Log to stderr by default, stdout carries status and tool progress
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(format)
        .with_writer(std::io::stderr)
        .init();
}
