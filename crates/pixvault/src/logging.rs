//! Logging initialization.
//!
//! Logs go to stderr so stdout stays free for import reports. `RUST_LOG`
//! overrides the level from config and flags.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter directive for a config level.
///
/// Library and binary follow the chosen level; HTTP tracing from
/// `tower_http` stays at info unless debugging.
fn default_directive(level: &str, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        match level {
            "error" | "warn" | "info" | "debug" | "trace" => level,
            _ => "info",
        }
    };
    let http = if matches!(level, "debug" | "trace") {
        "debug"
    } else {
        "info"
    };
    format!("{level},tower_http={http}")
}

pub fn init(directive: &str, json_format: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Initialize from `[logging]`, with CLI flags taking precedence.
pub fn init_from_config(
    config: &pixvault_core::Config,
    verbose_override: bool,
    json_logs_override: bool,
) {
    let directive = default_directive(&config.logging.level, verbose_override);
    let json_format = json_logs_override || config.logging.format == "json";
    init(&directive, json_format);
}
