//! Command-line interface definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use picpool::codec::SaveMode;
use picpool::logging::LogFormat;
use picpool::output::OutputFormat;
use picpool::pool::{DEFAULT_QUEUE_MAX, PoolConfig, RespawnPolicy, RetryPolicy, WorkerOptions};
use picpool::settings::{CompressionMode, CompressionSettings};
use std::path::PathBuf;
use std::time::Duration;

/// Compress images in parallel across a pool of worker processes.
#[derive(Parser, Debug)]
#[command(name = "picpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    /// Log level (error, warn, info, debug, trace). Overrides -v.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format.
    #[arg(long, value_parser = parse_log_format, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse()
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compress image files and directories.
    Compress(CompressArgs),

    /// Run as a pool worker (spawned by `compress`).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for the compress command.
#[derive(Parser, Debug)]
pub struct CompressArgs {
    /// Image files or directories.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Descend into subdirectories.
    #[arg(short, long)]
    pub recursive: bool,

    /// Number of worker processes (default: half the CPUs).
    #[arg(short = 'j', long, env = "PICPOOL_WORKERS")]
    pub workers: Option<usize>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Table)]
    pub format: OutputFormatArg,

    /// Use ASCII table borders instead of Unicode.
    #[arg(long)]
    pub ascii: bool,

    /// JSON settings file.
    #[arg(long, env = "PICPOOL_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Encoder quality, 1-100.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// Where compressed files go.
    #[arg(long, value_enum)]
    pub output_mode: Option<OutputModeArg>,

    /// Suffix for `--output-mode new-file`.
    #[arg(long)]
    pub suffix: Option<String>,

    /// Target directory; implies `--output-mode new-folder`.
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Keep the original unless the size drops by at least this percentage.
    #[arg(long)]
    pub min_rate: Option<f64>,

    /// Compress through the Tinify API where the format allows it.
    #[arg(long)]
    pub remote: bool,

    /// Tinify API key.
    #[arg(long, env = "PICPOOL_TINIFY_API_KEY", hide_env_values = true)]
    pub tinify_key: Option<String>,

    /// Back up every original into this directory.
    #[arg(long)]
    pub temp_dir: Option<String>,

    /// Per-file time limit in seconds (0 for none).
    #[arg(long, default_value_t = 180)]
    pub job_timeout: u64,

    /// Time each worker gets to come up, in seconds.
    #[arg(long, default_value_t = 30)]
    pub startup_timeout: u64,

    /// Consecutive crashes before a worker slot is retired.
    #[arg(long)]
    pub max_respawns: Option<u32>,

    /// Files allowed to wait for a worker at once.
    #[arg(long, env = "PICPOOL_QUEUE_MAX", default_value_t = DEFAULT_QUEUE_MAX as u32,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub queue_max: u32,

    /// Re-run a file this many times when its worker crashes or times out.
    #[arg(long, env = "PICPOOL_RETRIES")]
    pub retries: Option<u32>,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

impl CompressArgs {
    /// Layer the flags over `settings`.
    pub fn apply_to(&self, mut settings: CompressionSettings) -> CompressionSettings {
        if let Some(quality) = self.quality {
            settings.quality = quality;
        }
        if let Some(mode) = self.output_mode {
            settings.output_mode = mode.into();
        }
        if let Some(suffix) = &self.suffix {
            settings.save_as_file_suffix = suffix.clone();
        }
        if let Some(dir) = &self.output_dir {
            settings.save_to_folder = Some(dir.clone());
            if self.output_mode.is_none() {
                settings.output_mode = SaveMode::SaveToNewFolder;
            }
        }
        if let Some(rate) = self.min_rate {
            settings.compress_rate_limit = true;
            settings.compress_rate_limit_threshold = rate;
        }
        if self.remote {
            settings.mode = CompressionMode::Remote;
        }
        if let Some(key) = &self.tinify_key {
            settings.tinify_api_key = Some(key.clone());
        }
        if let Some(dir) = &self.temp_dir {
            settings.temp_dir = Some(dir.clone());
        }
        settings
    }

    pub fn pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::default();
        if let Some(workers) = self.workers {
            config.size = workers.max(1);
        }
        config.startup_timeout = Duration::from_secs(self.startup_timeout);
        config.job_timeout = (self.job_timeout > 0).then(|| Duration::from_secs(self.job_timeout));
        config.queue_max = self.queue_max as usize;
        config.retry = self
            .retries
            .filter(|&n| n > 0)
            .map(|n| RetryPolicy {
                max_attempts: n.saturating_add(1),
                ..RetryPolicy::default()
            });
        if let Some(max) = self.max_respawns {
            config.respawn = RespawnPolicy {
                max_consecutive_failures: max,
                ..config.respawn
            };
        }
        config
    }
}

/// Arguments for the hidden worker command.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Sleep this long before each job, in milliseconds.
    #[arg(long)]
    pub simulate_latency_ms: Option<u64>,
}

impl WorkerArgs {
    pub fn options(&self) -> WorkerOptions {
        WorkerOptions {
            simulate_latency: self.simulate_latency_ms.map(Duration::from_millis),
        }
    }
}

/// Output format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormatArg {
    /// Colored table output.
    #[default]
    Table,
    /// JSON output.
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

/// Output mode argument.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputModeArg {
    /// Replace the input file.
    Overwrite,
    /// Write `<name><suffix>.<ext>` next to the input.
    NewFile,
    /// Write into `--output-dir`.
    NewFolder,
}

impl From<OutputModeArg> for SaveMode {
    fn from(arg: OutputModeArg) -> Self {
        match arg {
            OutputModeArg::Overwrite => SaveMode::Overwrite,
            OutputModeArg::NewFile => SaveMode::SaveAsNewFile,
            OutputModeArg::NewFolder => SaveMode::SaveToNewFolder,
        }
    }
}

/// Verbosity level for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Default: warnings, results and the progress bar.
    Normal,
    /// -v: pool lifecycle.
    Info,
    /// -vv: per-job detail.
    Debug,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            return Verbosity::Quiet;
        }
        match self.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }

    /// Filter directive from the flags, if they set one.
    pub fn log_filter(&self) -> Option<String> {
        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }
        match self.verbosity() {
            Verbosity::Quiet => Some("error".to_string()),
            Verbosity::Normal => None,
            Verbosity::Info => Some("info".to_string()),
            Verbosity::Debug => Some("debug".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn compress_args(args: &[&str]) -> CompressArgs {
        let mut argv = vec!["picpool", "compress"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Compress(args) => args,
            _ => panic!("Expected Compress command"),
        }
    }

    #[test]
    fn test_cli_parsing() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_compress_defaults() {
        let args = compress_args(&["a.png", "dir"]);
        assert_eq!(args.paths, vec![PathBuf::from("a.png"), PathBuf::from("dir")]);
        assert!(!args.recursive);
        assert_eq!(args.startup_timeout, 30);
        assert_eq!(args.job_timeout, 180);
        assert_eq!(args.queue_max, 1000);
        assert!(args.retries.is_none());
        assert!(matches!(args.format, OutputFormatArg::Table));
    }

    #[test]
    fn test_compress_requires_paths() {
        assert!(Cli::try_parse_from(["picpool", "compress"]).is_err());
    }

    #[test]
    fn test_quality_range() {
        assert!(Cli::try_parse_from(["picpool", "compress", "a.png", "--quality", "0"]).is_err());
        assert!(Cli::try_parse_from(["picpool", "compress", "a.png", "--quality", "101"]).is_err());
        assert_eq!(compress_args(&["a.png", "--quality", "55"]).quality, Some(55));
    }

    #[test]
    fn test_flags_override_settings() {
        let args = compress_args(&[
            "a.png",
            "--quality",
            "60",
            "--output-dir",
            "/out",
            "--min-rate",
            "10",
            "--remote",
            "--tinify-key",
            "k",
        ]);
        let settings = args.apply_to(CompressionSettings::default());
        assert_eq!(settings.quality, 60);
        assert_eq!(settings.output_mode, SaveMode::SaveToNewFolder);
        assert_eq!(settings.save_to_folder.as_deref(), Some("/out"));
        assert!(settings.compress_rate_limit);
        assert_eq!(settings.compress_rate_limit_threshold, 10.0);
        assert_eq!(settings.mode, CompressionMode::Remote);
        assert_eq!(settings.tinify_api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_explicit_output_mode_wins_over_output_dir() {
        let args = compress_args(&["a.png", "--output-mode", "new-file", "--output-dir", "/out"]);
        let settings = args.apply_to(CompressionSettings::default());
        assert_eq!(settings.output_mode, SaveMode::SaveAsNewFile);
    }

    #[test]
    fn test_pool_config_from_flags() {
        let args = compress_args(&[
            "a.png",
            "-j",
            "3",
            "--job-timeout",
            "9",
            "--startup-timeout",
            "2",
            "--max-respawns",
            "1",
        ]);
        let config = args.pool_config();
        assert_eq!(config.size, 3);
        assert_eq!(config.job_timeout, Some(Duration::from_secs(9)));
        assert_eq!(config.startup_timeout, Duration::from_secs(2));
        assert_eq!(config.respawn.max_consecutive_failures, 1);
        assert!(config.retry.is_none());
    }

    #[test]
    fn test_queue_and_retry_flags() {
        let args = compress_args(&["a.png", "--queue-max", "5", "--retries", "2", "--job-timeout", "0"]);
        let config = args.pool_config();
        assert_eq!(config.queue_max, 5);
        assert_eq!(config.retry.map(|r| r.max_attempts), Some(3));
        assert!(config.job_timeout.is_none());

        let off = compress_args(&["a.png", "--retries", "0"]).pool_config();
        assert!(off.retry.is_none());
        assert_eq!(off.job_timeout, Some(Duration::from_secs(180)));

        assert!(Cli::try_parse_from(["picpool", "compress", "--queue-max", "0", "a.png"]).is_err());
    }

    #[test]
    fn test_worker_command_is_hidden_but_parses() {
        let cli = Cli::try_parse_from(["picpool", "worker", "--simulate-latency-ms", "250"]).unwrap();
        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.options().simulate_latency, Some(Duration::from_millis(250)));
            }
            _ => panic!("Expected Worker command"),
        }
        let help = Cli::command().render_help().to_string();
        assert!(help.contains("compress"));
        assert!(!help.contains("Run as a pool worker"));
    }

    #[test]
    fn test_verbosity_and_filter() {
        let cli = Cli::try_parse_from(["picpool", "-vv", "compress", "a.png"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Debug);
        assert_eq!(cli.log_filter().as_deref(), Some("debug"));

        let cli = Cli::try_parse_from(["picpool", "compress", "a.png", "-q"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Quiet);

        let cli = Cli::try_parse_from(["picpool", "-v", "--log-level", "trace", "compress", "a.png"])
            .unwrap();
        assert_eq!(cli.log_filter().as_deref(), Some("trace"));

        let cli = Cli::try_parse_from(["picpool", "compress", "a.png"]).unwrap();
        assert_eq!(cli.log_filter(), None);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["picpool", "-q", "-v", "compress", "a.png"]).is_err());
    }
}
