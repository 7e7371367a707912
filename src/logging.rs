//! Tracing/logging configuration for swap402
//!
//! Supports:
//! - Verbosity levels: default (WARN), verbose (INFO), debug (DEBUG), quiet (ERROR), silent (off)
//! - Pretty (colored), JSON or compact output
//! - File logging at DEBUG level while the terminal shows the configured level

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log output format
#[derive(Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Colored human-readable output
    #[default]
    Pretty,
    /// Structured JSON output (one JSON object per line)
    Json,
    /// Compact single-line format
    Compact,
}

/// Tracing configuration built from CLI args
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    pub verbose: bool,
    pub debug: bool,
    pub quiet: bool,
    /// No terminal output at all
    pub silent: bool,
    pub format: LogFormat,
    /// Optional log file path (writes DEBUG+ regardless of terminal level)
    pub log_file: Option<PathBuf>,
}

impl TracingConfig {
    /// Terminal level, or `None` when silent
    fn terminal_level(&self) -> Option<Level> {
        if self.silent {
            None
        } else if self.quiet {
            Some(Level::ERROR)
        } else if self.debug {
            // DEBUG is compiled out in release builds
            if cfg!(debug_assertions) {
                Some(Level::DEBUG)
            } else {
                Some(Level::INFO)
            }
        } else if self.verbose {
            Some(Level::INFO)
        } else {
            Some(Level::WARN)
        }
    }

    fn level_flag_set(&self) -> bool {
        self.verbose || self.debug || self.quiet || self.silent
    }
}

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn crate_filter(level: Level) -> EnvFilter {
    EnvFilter::new(format!("swap402={},warn", level.as_str().to_lowercase()))
}

/// Explicit CLI flags win over RUST_LOG; otherwise RUST_LOG wins over the default
fn terminal_filter(level: Level, cli_specified: bool) -> EnvFilter {
    if cli_specified {
        crate_filter(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| crate_filter(level))
    }
}

fn make_terminal_layer(format: &LogFormat, filter: EnvFilter) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

fn make_file_layer(log_path: &PathBuf) -> std::io::Result<BoxedLayer> {
    let file = std::fs::File::create(log_path)?;
    let file_filter = if cfg!(debug_assertions) {
        crate_filter(Level::DEBUG)
    } else {
        crate_filter(Level::INFO)
    };

    Ok(fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(file)
        .with_filter(file_filter)
        .boxed())
}

/// Initialize tracing with the given configuration.
///
/// Call once early in main(); later calls are ignored.
pub fn init_tracing(config: TracingConfig) {
    if TRACING_INITIALIZED.set(()).is_err() {
        return;
    }

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if let Some(log_path) = &config.log_file {
        match make_file_layer(log_path) {
            Ok(layer) => layers.push(layer),
            // Subscriber isn't up yet, so stderr is the only channel
            Err(e) => eprintln!("Warning: Failed to create log file {:?}: {}", log_path, e),
        }
    }

    if let Some(level) = config.terminal_level() {
        let filter = terminal_filter(level, config.level_flag_set());
        layers.push(make_terminal_layer(&config.format, filter));
    }

    if layers.is_empty() {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
    } else {
        let _ = tracing_subscriber::registry().with(layers).try_init();
    }
}
