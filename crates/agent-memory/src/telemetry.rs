//! Centralised tracing initialisation for agent-memory binaries.
//!
//! Call [`init_tracing`] once at program start. Logs go to stderr so that
//! command output on stdout stays machine-readable.
//!
//! Subsequent calls are ignored (the global subscriber can only be set once
//! per process).

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// Newline-delimited JSON for log aggregation pipelines
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" | "" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

impl LogFormat {
    /// Read `AGENT_MEMORY_LOG_FORMAT`, defaulting to pretty.
    pub fn from_env() -> Self {
        std::env::var("AGENT_MEMORY_LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

/// Initialise the global tracing subscriber.
///
/// Respects `RUST_LOG` for fine-grained filtering; falls back to `level`.
pub fn init_tracing(format: LogFormat, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(LogFormat::Pretty, Level::WARN);
        init_tracing(LogFormat::Json, Level::DEBUG);
    }
}
