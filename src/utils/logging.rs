use tracing::Level;

/// Installs the global `tracing` subscriber at `level`.
///
/// Logs go to stderr so that CLI output on stdout stays machine readable.
/// Calling it again is a no-op.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Unknown names fall back to `INFO`.
pub(crate) fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "warning" => Level::WARN,
        other => other.parse().unwrap_or(Level::INFO),
    }
}
