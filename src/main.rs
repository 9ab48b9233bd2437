//! picpool - parallel image compression over a pool of worker processes

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::{OwoColorize, Stream::Stderr};
use picpool::bridge::{BatchCallbacks, Compressor};
use picpool::files::FileScanner;
use picpool::logging::{self, LOG_ENV, LOG_FORMAT_ENV, LogConfig};
use picpool::output::{self, OutputFormat, TableOptions};
use picpool::pool::{WorkerCommand, run_worker_main};
use picpool::settings::CompressionSettings;
use picpool::theme::{self, Themed};
use std::path::Path;
use std::time::Duration;

use cli::{Cli, Commands, CompressArgs, Verbosity};

fn main() {
    let cli = Cli::parse();

    // Handle no-color flag - affects both owo_colors and comfy_table
    if cli.no_color {
        theme::disable_colors();
    }

    let log_config = log_config(&cli);
    logging::init(log_config.clone());

    let result = match &cli.command {
        Commands::Compress(args) => cmd_compress(&cli, args, &log_config),
        Commands::Worker(args) => run_worker_main(args.options()),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// CLI flags first, then the environment.
fn log_config(cli: &Cli) -> LogConfig {
    let mut config = LogConfig::new().with_ansi(!cli.no_color);
    if let Some(filter) = cli.log_filter() {
        config = config.with_filter(filter);
    }
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    config.with_env_overrides()
}

/// This executable in worker mode, logging the way the coordinator does.
fn worker_command(cli: &Cli, log: &LogConfig) -> Result<WorkerCommand> {
    let mut command = WorkerCommand::current_exe()
        .context("Failed to locate the picpool executable for workers")?
        .env(LOG_ENV, log.directive())
        .env(LOG_FORMAT_ENV, log.format.to_string());
    if cli.no_color {
        command = command.env("NO_COLOR", "1");
    }
    Ok(command)
}

fn load_settings(path: Option<&Path>) -> Result<CompressionSettings> {
    let settings = match path {
        Some(path) => CompressionSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => CompressionSettings::default(),
    };
    Ok(settings.with_env_overrides())
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("█▓▒░  "),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn cmd_compress(cli: &Cli, args: &CompressArgs, log: &LogConfig) -> Result<()> {
    let settings = args.apply_to(load_settings(args.settings.as_deref())?);
    settings.validate().context("Invalid compression settings")?;

    let files = FileScanner::new(args.recursive).expand(&args.paths);
    if files.is_empty() {
        if cli.verbosity() > Verbosity::Quiet {
            eprintln!("{}", "No images found.".warning());
        }
        return Ok(());
    }

    let mut config = args.pool_config();
    config.worker = Some(worker_command(cli, log)?);
    tracing::info!(files = files.len(), workers = config.size, "Compressing");

    let compressor = Compressor::new(config, settings);
    let show_progress = !args.no_progress && cli.verbosity() > Verbosity::Quiet;
    let bar = if show_progress {
        progress_bar(files.len() as u64)?
    } else {
        ProgressBar::hidden()
    };

    let tick = bar.clone();
    let callbacks = BatchCallbacks::new().on_progress(move |result| {
        let name = Path::new(&result.input_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tick.set_message(name);
        tick.inc(1);
    });

    let outcome = compressor.compress(&files, callbacks);
    bar.finish_and_clear();
    compressor.dispose();
    let results = outcome.context("Compression aborted")?;

    let format = OutputFormat::from(args.format);
    if format == OutputFormat::Json || cli.verbosity() > Verbosity::Quiet {
        output::print_results(&results, format, TableOptions { ascii: args.ascii });
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} files failed", failed, results.len());
    }
    Ok(())
}
