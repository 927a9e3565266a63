//! Logging settings
//!
//! Read from the `[logging]` table of the endpoint configuration:
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "json"
//! file_info = true
//! directives = ["rvoip_iax_core::endpoint=debug"]
//! ```
//!
//! `RUST_LOG` is honoured as well; the configured level and directives are
//! added on top of it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// error, warn, info, debug or trace
    pub level: String,
    pub format: LogFormat,
    /// Include file and line of each event
    pub file_info: bool,
    /// Extra filter directives, e.g. `rvoip_iax_core::transmit=trace`
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file_info: false,
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.level)?;
        for directive in &self.directives {
            parse_directive(directive)?;
        }
        Ok(())
    }

    fn filter(&self) -> Result<EnvFilter> {
        let mut filter =
            EnvFilter::from_default_env().add_directive(parse_log_level(&self.level)?.into());
        for directive in &self.directives {
            filter = filter.add_directive(parse_directive(directive)?);
        }
        Ok(filter)
    }
}

/// Install the global subscriber for `app_name`
pub fn setup_logging(config: &LoggingConfig, app_name: &str) -> Result<()> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.filter()?)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = match config.format {
        LogFormat::Json => builder.with_writer(std::io::stdout).json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| Error::config(format!("cannot install logger: {}", e)))?;

    tracing::info!(
        "Starting {} v{} (log level {}, {:?} output)",
        app_name,
        env!("CARGO_PKG_VERSION"),
        config.level,
        config.format
    );
    Ok(())
}

/// Parse a level name such as `debug` or `WARN`
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::config(format!("invalid log level: {}", level)))
}

fn parse_directive(directive: &str) -> Result<Directive> {
    directive
        .parse()
        .map_err(|e| Error::config(format!("invalid log directive '{}': {}", directive, e)))
}
