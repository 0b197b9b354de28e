//! Subscriber installation for gateway processes.
//!
//! The gateway is usually embedded behind a stdio transport, so output goes
//! to stderr unless a log directory is configured.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Prefix of rolled log files (`tollgate.2026-01-15`).
pub const LOG_FILE_PREFIX: &str = "tollgate";

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored.
    Pretty,
    /// Single line.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
    /// `tracing_subscriber` default layout.
    Full,
}

impl LogFormat {
    /// Parse a format name as written in the `[logging]` section.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard error.
    #[default]
    Stderr,
    /// Daily-rotated files in a directory.
    Directory(PathBuf),
}

/// Logging configuration for [`setup_logging`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base level filter (`info`, `debug`, ...). Empty means `info`.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Output target.
    pub target: LogTarget,
    /// Extra filter directives (`tollgate_gateway=trace`).
    pub directives: Vec<String>,
}

impl LogConfig {
    /// Create a config with the given base level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Set the line format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Write rolled files into `directory`.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.target = LogTarget::Directory(directory.into());
        self
    }

    /// Add a filter directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Build from the `[logging]` section of a gateway config.
    ///
    /// The config crate has already rejected unknown format names, so any
    /// leftover falls back to compact.
    #[cfg(feature = "config")]
    #[must_use]
    pub fn from_section(section: &tollgate_config::LoggingSection) -> Self {
        let target = section
            .directory
            .as_ref()
            .map_or(LogTarget::Stderr, |dir| LogTarget::Directory(dir.into()));
        Self {
            level: section.level.clone(),
            format: LogFormat::from_name(&section.format).unwrap_or_default(),
            target,
            directives: section.directives.clone(),
        }
    }

    fn level(&self) -> &str {
        if self.level.is_empty() { "info" } else { &self.level }
    }

    fn build_filter(&self) -> TelemetryResult<EnvFilter> {
        let mut filter = EnvFilter::try_new(self.level())
            .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))?;

        for directive in &self.directives {
            let parsed = directive
                .parse()
                .map_err(|e: tracing_subscriber::filter::ParseError| {
                    TelemetryError::InvalidFilter(format!("{directive}: {e}"))
                })?;
            filter = filter.add_directive(parsed);
        }

        Ok(filter)
    }

    fn make_writer(&self) -> TelemetryResult<(BoxMakeWriter, bool)> {
        Ok(match &self.target {
            LogTarget::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
            LogTarget::Directory(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
                (BoxMakeWriter::new(appender), false)
            },
        })
    }

    fn build_layer(&self) -> TelemetryResult<Box<dyn Layer<Registry> + Send + Sync>> {
        let (writer, ansi) = self.make_writer()?;
        let base = fmt::layer().with_writer(writer).with_ansi(ansi);
        Ok(match self.format {
            LogFormat::Json => base.json().boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.compact().boxed(),
            LogFormat::Full => base.boxed(),
        })
    }
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if a filter directive is malformed, the log directory
/// cannot be created, or a global subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.build_filter()?;
    let layer = config.build_layer()?;

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::InitError(e.to_string()))
}

/// Install an info-level compact subscriber on stderr.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}
