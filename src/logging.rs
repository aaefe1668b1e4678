//! Logging init. Everything goes to stderr, which daemon mode points at the log file.

use tracing_subscriber::EnvFilter;

pub fn init_logging(detached: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,imgrab=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(!detached)
        .init();
}
