//! Logging initialization.
//!
//! Installs a `tracing-subscriber` fmt subscriber built from a
//! [`LoggingConfig`]. `RUST_LOG` takes precedence over the configured level
//! when it is set.

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Result, ServerError};

/// Build the filter for `config`, preferring `RUST_LOG` when present.
///
/// The configured level is the global default, so the embedding
/// application's own targets are filtered the same way as this crate's.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        return env_filter;
    }

    let level = level_to_str(config.log_level);
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config);
    let builder = fmt().with_env_filter(filter).with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| {
        ServerError::ConfigurationError(format!("Failed to initialize logging: {e}"))
    })?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

fn level_to_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_level_names() {
        assert_eq!(level_to_str(Level::DEBUG), "debug");
        assert_eq!(level_to_str(Level::ERROR), "error");
    }

    #[test]
    fn test_filter_applies_level_to_every_target() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            log_level: Level::DEBUG,
            ..LoggingConfig::default()
        };
        let subscriber = tracing_subscriber::registry().with(build_filter(&config));

        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "echo_server", Level::DEBUG));
            assert!(tracing::enabled!(target: "ws_event_server::server", Level::DEBUG));
            assert!(!tracing::enabled!(target: "echo_server", Level::TRACE));
        });
    }

    #[test]
    fn test_default_filter_is_info() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let subscriber =
            tracing_subscriber::registry().with(build_filter(&LoggingConfig::default()));

        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "echo_server", Level::INFO));
            assert!(!tracing::enabled!(target: "echo_server", Level::DEBUG));
        });
    }
}
