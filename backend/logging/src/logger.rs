//! Structured logger setup.
//!
//! Console output for interactive use plus a daily-rotated NDJSON file for
//! later inspection. `RUST_LOG` overrides the configured level.

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global logger. Safe to call more than once; only the first
/// call installs the subscriber.
pub fn init_logger<P: AsRef<Path>>(log_dir: P, level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // NDJSON into `<log_dir>/famulus.log.YYYY-MM-DD`.
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "famulus.log");
    let file_layer = fmt::layer().json().with_writer(file_appender).with_ansi(false);

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_ansi(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        init_logger(dir.path(), "debug");
        init_logger(dir.path(), "info");
        tracing::info!("logger smoke test");
    }
}
