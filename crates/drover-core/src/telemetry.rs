//! Tracing initialisation for the drover binary.
//!
//! Library code only emits events; [`init_tracing`] installs the global
//! subscriber once at program start.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter override, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "DROVER_LOG";

/// Crates whose events follow the requested level.
const DROVER_TARGETS: &[&str] = &["drover", "drover_core", "drover_runner"];

/// Default filter: drover crates at `level`, dependencies at `warn`.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(DROVER_TARGETS.iter().map(|t| format!("{}={}", t, level)));
    directives.join(",")
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines (for CI log collectors).
/// * `level`: drover's verbosity when neither `DROVER_LOG` nor `RUST_LOG` is set.
///
/// Logs go to stderr so they never interleave with report output on stdout.
/// Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let layer = fmt::layer().with_target(level == Level::DEBUG).with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}
