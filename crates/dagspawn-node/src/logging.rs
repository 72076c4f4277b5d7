use std::fmt;
use std::io::IsTerminal as _;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("invalid log format {other:?} (expected one of: compact, json)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Installs the global subscriber. Events go to stderr; stdout stays free for
/// reports.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // Node stderr is usually a pipe captured into a report.
    let ansi = std::io::stderr().is_terminal();

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tfmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .flatten_event(true),
            )
            .try_init()
            .context("initialize tracing subscriber")?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                tfmt::layer()
                    .compact()
                    .with_ansi(ansi)
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init()
            .context("initialize tracing subscriber")?,
    }
    Ok(())
}
