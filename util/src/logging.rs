//! Defines helpers for logging

pub use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::format::Format};

/// Initialize a logger at the given log level
pub fn setup_system_logger(level: LevelFilter) {
    tracing_subscriber::fmt().event_format(Format::default().pretty()).with_max_level(level).init();
}

/// Initialize a logger filtered by the `RUST_LOG` environment variable,
/// falling back to `info`
///
/// Does nothing if a global subscriber is already installed, so tests may
/// call it repeatedly
pub fn setup_env_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

/// Parse a log level from its name, e.g. "debug"
pub fn parse_level_filter(level: &str) -> Result<LevelFilter, String> {
    level.parse::<LevelFilter>().map_err(|e| format!("invalid log level {level}: {e}"))
}
