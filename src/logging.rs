//! Logging setup shared by the coordinator and worker processes.
//!
//! Everything goes to stderr; worker stdout is reserved for frames. An
//! optional file layer mirrors the output without ANSI colors.
//!
//! # Environment Variables
//!
//! - `PICPOOL_LOG` - Log filter (overrides `RUST_LOG`)
//! - `PICPOOL_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `PICPOOL_LOG_FORMAT` - Output format: pretty, compact, json
//! - `PICPOOL_LOG_FILE` - Path to a log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! Workers inherit the environment of the coordinator, so exporting the
//! resolved filter as `PICPOOL_LOG` gives both sides the same verbosity.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

pub const LOG_ENV: &str = "PICPOOL_LOG";
pub const LOG_LEVEL_ENV: &str = "PICPOOL_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "PICPOOL_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "PICPOOL_LOG_FILE";

const DEFAULT_LOG_FILE_NAME: &str = "picpool.log";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// Single line per event.
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging configuration, built up from defaults, the CLI and the environment.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Extra log file; rotated daily.
    pub file_path: Option<PathBuf>,
    /// Filter directive. Takes precedence over `level` when set.
    pub filter: Option<String>,
    pub show_target: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            file_path: None,
            filter: None,
            show_target: true,
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Apply environment variables. A filter already set from the CLI wins.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if self.filter.is_none() {
            self.filter = var(LOG_ENV).or_else(|| var("RUST_LOG"));
        }
        if self.filter.is_none()
            && let Some(level) = var(LOG_LEVEL_ENV).as_deref().and_then(parse_level)
        {
            self.level = level;
        }
        if let Some(format) = var(LOG_FORMAT_ENV).and_then(|f| f.parse().ok()) {
            self.format = format;
        }
        if let Some(path) = var(LOG_FILE_ENV) {
            self.file_path = Some(PathBuf::from(path));
        }
        self
    }

    /// The effective filter directive.
    pub fn directive(&self) -> String {
        match &self.filter {
            Some(filter) => filter.clone(),
            None => self.level.to_string().to_lowercase(),
        }
    }

    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_new(self.directive()).unwrap_or_else(|_| {
            eprintln!("Warning: Invalid log filter '{}', using default", self.directive());
            EnvFilter::new(self.level.to_string().to_lowercase())
        })
    }
}

pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_target(config.show_target)
        .with_ansi(ansi)
        .with_writer(writer);
    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

fn file_appender(path: &Path) -> RollingFileAppender {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE_NAME);
    RollingFileAppender::new(Rotation::DAILY, parent, file_name)
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: LogConfig) {
    let mut layers = vec![format_layer(&config, std::io::stderr, config.ansi)];
    if let Some(path) = &config.file_path {
        layers.push(format_layer(&config, file_appender(path), false));
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(config.build_filter())
        .try_init();
}
