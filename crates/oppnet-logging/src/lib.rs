//! Tracing subscriber setup for oppnet simulation runs
//!
//! Console output is pretty by default; JSON lines are available on the
//! console and are always used for file output so runs can be inspected
//! with line-oriented tools afterwards.
//!
//! # Quick Start
//!
//! ```ignore
//! use oppnet_logging::{LogConfig, SubscriberBuilder};
//!
//! // Keep the guard alive for the whole run when file output is enabled
//! let _guard = SubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod config;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to prepare log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and initializing the global subscriber
pub struct SubscriberBuilder {
    config: LogConfig,
}

impl Default for SubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberBuilder {
    /// Create a builder with the default configuration (pretty console, info)
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Switch the console between pretty and JSON lines output
    pub fn with_json_console(mut self, json: bool) -> Self {
        self.config.console.pretty = !json;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer guard when file output is enabled; it must be
    /// kept alive for the duration of the program. Failures are reported on
    /// stderr and leave logging disabled.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("oppnet-logging: {e}");
                None
            }
        }
    }

    /// Install the subscriber globally, reporting failures to the caller
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let mut layers: Vec<BoxedLayer> = Vec::new();

        if self.config.console.enabled {
            if self.config.console.pretty {
                layers.push(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(self.config.console.ansi)
                        .with_target(true)
                        .boxed(),
                );
            } else {
                layers.push(self.json_layer(None));
            }
        }

        let guard = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = create_file_writer(file_config)?;
                layers.push(self.json_layer(Some(writer)));
                Some(guard)
            }
            None => None,
        };

        Registry::default()
            .with(layers)
            .with(env_filter)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

        Ok(guard)
    }

    fn json_layer(&self, writer: Option<NonBlocking>) -> BoxedLayer {
        let jsonl = &self.config.jsonl;
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(jsonl.flatten_events)
            .with_current_span(jsonl.include_spans)
            .with_span_list(jsonl.include_spans)
            .with_file(jsonl.include_location)
            .with_line_number(jsonl.include_location);

        match writer {
            Some(writer) => layer.with_ansi(false).with_writer(writer).boxed(),
            None => layer.boxed(),
        }
    }
}

/// Truncates a single file for `Never` rotation, appends for the others
fn create_file_writer(
    file_config: &FileConfig,
) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&file_config.directory)?;
    let pair = match file_config.rotation {
        RotationStrategy::Never => {
            let file_path = file_config.directory.join(format!("{}.log", file_config.prefix));
            tracing_appender::non_blocking(File::create(file_path)?)
        }
        RotationStrategy::Daily => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &file_config.directory,
            &file_config.prefix,
        )),
        RotationStrategy::Hourly => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::HOURLY,
            &file_config.directory,
            &file_config.prefix,
        )),
    };
    Ok(pair)
}
