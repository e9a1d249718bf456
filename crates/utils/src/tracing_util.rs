//! Helpers related to tracing, used by main entrypoints

/// Initialize tracing with the default configuration; the log level is
/// taken from the standard `RUST_LOG` environment variable. Output goes
/// to stderr so it never mixes with command output.
pub fn initialize_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
