//! Tracing setup for hosts that want the engine's structured logs.
//!
//! Embedding applications with their own subscriber can ignore this module
//! entirely; the engine only ever emits through `tracing` macros.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// 0 errors, 1 info, 2+ debug. The `LOG` env var overrides it.
    pub verbosity: u8,
    pub format: LogFormat,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8) -> Self {
        Self {
            verbosity,
            format: LogFormat::default(),
        }
    }
}

pub fn is_test_env() -> bool {
    std::env::var_os("RUST_TEST_THREADS").is_some()
}

/// Install a global stderr subscriber. Safe to call more than once; later
/// calls are no-ops when a subscriber is already set.
pub fn init(config: TelemetryConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(config.verbosity).into())
        .with_env_var("LOG")
        .from_env_lossy();

    let result = match config.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_env_filter(filter)
            .finish()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_env_filter(filter)
            .finish()
            .try_init(),
    };
    if result.is_err() && !is_test_env() {
        tracing::debug!("telemetry already initialized; keeping the existing subscriber");
    }
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::ERROR,
        1 => tracing::metadata::LevelFilter::INFO,
        _ => tracing::metadata::LevelFilter::DEBUG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_from_verbosity(0), tracing::metadata::LevelFilter::ERROR);
        assert_eq!(level_from_verbosity(1), tracing::metadata::LevelFilter::INFO);
        assert_eq!(level_from_verbosity(5), tracing::metadata::LevelFilter::DEBUG);
    }
}
