//! Tracing setup for the binary and tests.
//!
//! The level comes from `logging.level` in the settings. Setting `MESSAGER_LOG`
//! to `EnvFilter` directives (e.g. `messager::transport=trace,info`) overrides it.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Environment variable holding filter directives.
pub const FILTER_ENV: &str = "MESSAGER_LOG";

/// Maps a configured level name to a filter directive. Unknown names mean `info`.
pub(crate) fn level_directive(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "off" => "off",
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    }
}

pub fn filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&settings.level)))
}

/// Installs the global subscriber. Later calls leave the first one in place.
pub fn init(settings: &LoggingSettings) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(settings))
        .with_target(false)
        .try_init();
}
