//! Logging subsystem
//!
//! Structured logging via tracing with JSON (production) and plaintext
//! (development) output formats.
//!
//! # Environment Variables
//!
//! - `CLAWWATCH_LOG` - primary log level/filter (takes precedence)
//! - `RUST_LOG` - fallback log level/filter
//!
//! # Examples
//!
//! ```no_run
//! use clawwatch::logging::{init_logging, LogConfig, LogFormat, LogOutput};
//!
//! init_logging(LogConfig::production()).unwrap();
//! ```

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    #[default]
    Plaintext,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Level used when neither `CLAWWATCH_LOG` nor `RUST_LOG` is set
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

impl LogConfig {
    /// Plaintext to stdout at debug level.
    pub fn development() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::DEBUG,
        }
    }

    /// JSON to stdout at info level.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log file: {0}")]
    FileCreation(#[from] io::Error),
    #[error("failed to parse log filter: {0}")]
    FilterParse(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("failed to initialize subscriber: {0}")]
    TryInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Pick the filter directive: `CLAWWATCH_LOG`, then `RUST_LOG`, then the
/// default level.
fn filter_directive<F>(default_level: Level, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("CLAWWATCH_LOG")
        .or_else(|| lookup("RUST_LOG"))
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| {
            let level = default_level.as_str().to_lowercase();
            format!("{level},hyper=warn,clawwatch={level}")
        })
}

fn build_env_filter(default_level: Level) -> Result<EnvFilter, LoggingError> {
    let directive = filter_directive(default_level, |name| std::env::var(name).ok());
    Ok(EnvFilter::try_new(directive)?)
}

fn make_writer(output: &LogOutput) -> Result<BoxMakeWriter, LoggingError> {
    Ok(match output {
        LogOutput::Stdout => BoxMakeWriter::new(io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(io::stderr),
        LogOutput::File(path) => BoxMakeWriter::new(Mutex::new(File::create(path)?)),
    })
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn build_layer(config: &LogConfig, filter: EnvFilter) -> Result<BoxedLayer, LoggingError> {
    let writer = make_writer(&config.output)?;
    let timer = UtcTime::rfc_3339();
    let layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_timer(timer)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Plaintext => tracing_subscriber::fmt::layer()
            .with_timer(timer)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    };
    Ok(layer)
}

/// Initialize the global subscriber. Only the first call succeeds.
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }
    let filter = build_env_filter(config.default_level)?;
    let layer = build_layer(&config, filter)?;
    tracing_subscriber::registry().with(layer).try_init()?;
    Ok(())
}

/// Best-effort plaintext debug logging for tests. Safe to call repeatedly.
pub fn init_test_logging() {
    let config = LogConfig::development();
    let Ok(filter) = build_env_filter(config.default_level) else {
        return;
    };
    if let Ok(layer) = build_layer(&config, filter) {
        let _ = tracing_subscriber::registry().with(layer).try_init();
    }
}
