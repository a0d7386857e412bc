//! JSONL diagnostic logging for faultlog
//!
//! Installs a global `tracing` subscriber with up to three outputs:
//!
//! - **Console**: JSONL by default, pretty in development
//! - **Diagnostic file**: JSONL with daily/hourly rotation via tracing-appender
//! - **Side channel**: an append-only file receiving only events on
//!   [`SIDE_CHANNEL_TARGET`], used to report records that could not be written
//!
//! # Quick Start
//!
//! ```ignore
//! use faultlog_logging::{FaultlogSubscriberBuilder, FileConfig};
//!
//! // JSONL to console
//! let _guard = FaultlogSubscriberBuilder::new().try_init()?;
//!
//! // Diagnostics and side channel on disk, no console
//! let dir = std::path::PathBuf::from("/var/log/faultlog");
//! let _guard = FaultlogSubscriberBuilder::new()
//!     .with_console(false)
//!     .with_file_output(FileConfig { directory: dir.clone(), ..Default::default() })
//!     .with_side_channel(FileConfig::side_channel(dir))
//!     .try_init()?;
//! ```
//!
//! The returned [`LoggingGuard`] flushes the file writers when dropped and
//! must be held for the lifetime of the process.

pub mod config;
pub mod error;

pub use config::{ConsoleConfig, FileConfig, LogConfig, RotationStrategy};
pub use error::LoggingError;

use std::fs::{self, OpenOptions};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Target for failures reported outside the main log
///
/// Events on this target are routed to the side-channel file when one is
/// configured, in addition to the regular outputs.
pub const SIDE_CHANNEL_TARGET: &str = "faultlog::side_channel";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the non-blocking file writers alive
///
/// Dropping the guard flushes any buffered lines.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    guards: Vec<WorkerGuard>,
}

impl LoggingGuard {
    /// Number of file writers held open
    pub fn writers(&self) -> usize {
        self.guards.len()
    }
}

/// Builder for configuring and initializing the faultlog subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable pretty output during development.
pub struct FaultlogSubscriberBuilder {
    config: LogConfig,
}

impl FaultlogSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
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

    /// Configure diagnostic file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Configure the side-channel file
    pub fn with_side_channel(mut self, config: FileConfig) -> Self {
        self.config.side_channel = Some(config);
        self
    }

    /// The configuration that will be installed
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// # Errors
    ///
    /// Fails if a log file cannot be opened, a filter does not parse, or a
    /// global subscriber is already set.
    pub fn try_init(self) -> Result<LoggingGuard, LoggingError> {
        let (layers, guards) = self.build_layers()?;
        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
        Ok(LoggingGuard { guards })
    }

    fn build_layers(&self) -> Result<(Vec<BoxedLayer>, Vec<WorkerGuard>), LoggingError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guards = Vec::new();

        if self.config.console.enabled {
            let filter = self.env_filter()?;
            let layer: BoxedLayer = if self.config.console.pretty {
                tracing_subscriber::fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_filter(filter)
                    .boxed()
            } else {
                json_layer(std::io::stdout)
                    .with_filter(filter)
                    .boxed()
            };
            layers.push(layer);
        }

        if let Some(file) = &self.config.file {
            let (writer, guard) = file_writer(file, true)?;
            guards.push(guard);
            let filter = self.env_filter()?;
            layers.push(json_layer(writer).with_filter(filter).boxed());
        }

        // The side channel ignores RUST_LOG so reported failures are never filtered out
        if let Some(side) = &self.config.side_channel {
            let (writer, guard) = file_writer(side, false)?;
            guards.push(guard);
            let filter = Targets::new().with_target(SIDE_CHANNEL_TARGET, Level::WARN);
            layers.push(json_layer(writer).with_filter(filter).boxed());
        }

        Ok((layers, guards))
    }

    /// RUST_LOG if set, otherwise the configured directives
    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        // A bare word would otherwise parse as a target name
        let level = &self.config.default_level;
        LevelFilter::from_str(level)
            .map_err(|e| LoggingError::InvalidFilter(format!("{level}: {e}")))?;
        let directives = self.config.filter_directives();
        EnvFilter::try_new(&directives)
            .map_err(|e| LoggingError::InvalidFilter(format!("{directives}: {e}")))
    }
}

impl Default for FaultlogSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One JSON object per line, event fields at the top level
fn json_layer<W>(writer: W) -> impl Layer<Registry> + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(writer)
}

/// Create a non-blocking writer; `lossy = false` applies backpressure
/// instead of dropping lines when the buffer is full
fn file_writer(file: &FileConfig, lossy: bool) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&file.directory)?;
    let builder = NonBlockingBuilder::default().lossy(lossy);

    let rotation = match file.rotation {
        RotationStrategy::Never => {
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file.fixed_path())?;
            return Ok(builder.finish(handle));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file.prefix.clone())
        .filename_suffix("log");
    if let Some(max) = file.max_files {
        appender = appender.max_log_files(max);
    }
    let appender = appender
        .build(&file.directory)
        .map_err(|e| LoggingError::Appender(e.to_string()))?;
    Ok(builder.finish(appender))
}
