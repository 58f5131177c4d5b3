//! Tracing bootstrap: rolling file output plus a console layer in text mode.
//!
//! Code values are never passed to tracing macros anywhere in the crate, so
//! both sinks are safe to ship to a log aggregator.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Unknown names fall back to a single file
fn rotation(name: &str) -> Rotation {
    match name {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

/// Configured level for this crate; dependencies only surface warnings
fn default_directives(config: &AppConfig) -> String {
    format!("warn,{}={}", env!("CARGO_CRATE_NAME"), config.log_level)
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Keep the returned guard alive for the process lifetime or buffered lines are lost.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let appender = RollingFileAppender::new(
        rotation(&config.rotation),
        &config.log_dir,
        &config.log_file,
    );
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
            .with_writer(file_writer)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        // stdout is reserved for the walkthrough prompts
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(file_writer)
            .with_ansi(false);
        let console_layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact();
        registry.with(file_layer).with(console_layer).init();
    }

    guard
}
