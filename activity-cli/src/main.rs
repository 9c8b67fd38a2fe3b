//! Activity Decoder CLI Application
//!
//! This is the command-line interface for the activity file decoder.
//! It uses the activity-decoder library and adds:
//! - Format selection from the file extension
//! - TOML configuration with command-line overrides
//! - Parallel decoding of many files
//! - Text and JSON summary reports

use activity_decoder::Decoder;
use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

mod config;
mod report;

use config::{AppConfig, OutputFormat};
use report::FileReport;

/// Activity Decoder - Summarize FIT, SRM, TCX, GPX and PWX activity files
#[derive(Parser, Debug)]
#[command(name = "activity-cli")]
#[command(about = "Decode and summarize activity files (FIT, SRM, TCX, GPX, PWX)", long_about = None)]
#[command(version)]
struct Args {
    /// Activity files to decode (format chosen by extension)
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// IANA timezone used to localize timestamps (e.g. Europe/Rome)
    #[arg(long, value_name = "ZONE")]
    tz: Option<String>,

    /// Fail a file as soon as its time goes backwards
    #[arg(long)]
    strict: bool,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Activity Decoder CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", activity_decoder::VERSION);

    let settings = resolve_settings(&args)?;
    if settings.input.files.is_empty() {
        println!("Activity Decoder - No input specified");
        println!("\nQuick Start:");
        println!("  activity-cli ride.fit");
        println!("  activity-cli --tz Europe/Rome *.gpx *.tcx");
        println!("  activity-cli --config config.toml --format json");
        println!("\nUse --help for more options");
        return Ok(());
    }

    let decoder =
        Decoder::with_config(settings.decoder.clone()).context("Invalid decoder configuration")?;

    let reports: Vec<FileReport> = settings
        .input
        .files
        .par_iter()
        .map(|path| match summarize(&decoder, path) {
            Ok(summary) => FileReport::decoded(path.clone(), summary),
            Err(e) => {
                log::error!("{:#}", e);
                FileReport::failed(path.clone(), &e)
            }
        })
        .collect();

    match settings.output.format {
        OutputFormat::Txt => print!(
            "{}",
            report::render_txt(&reports).context("Failed to render report")?
        ),
        OutputFormat::Json => println!(
            "{}",
            report::render_json(&reports).context("Failed to serialize report")?
        ),
    }

    check_failures(&reports)
}

/// Error out (non-zero exit) when any file failed, after all were reported
fn check_failures(reports: &[FileReport]) -> Result<()> {
    let failed = reports.iter().filter(|r| r.is_failure()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} files failed to decode", failed, reports.len());
    }
    Ok(())
}

/// Merge the config file (if any) with command-line overrides
fn resolve_settings(args: &Args) -> Result<AppConfig> {
    let mut settings = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    if !args.files.is_empty() {
        settings.input.files = args.files.clone();
    }
    if let Some(tz) = &args.tz {
        settings.decoder.timezone = Some(tz.clone());
    }
    if args.strict {
        settings.decoder.strict_time = true;
    }
    if let Some(format) = args.format {
        settings.output.format = format;
    }

    log::debug!("Effective settings: {:?}", settings);
    Ok(settings)
}

fn summarize(decoder: &Decoder, path: &Path) -> Result<activity_decoder::ActivitySummary> {
    let table = decoder
        .decode_file(path)
        .with_context(|| format!("Failed to decode {:?}", path))?;
    log::info!("{:?}: {} rows", path, table.len());
    Ok(table.summary())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
