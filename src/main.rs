//! Link an Audible library export to a Calibre library.
//! Usage: audible-sync sync --audible-csv library.csv [--dry-run false]

use anyhow::{Context, Result};
use chrono::Local;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use audible_calibre_sync::catalog::CalibreDb;
use audible_calibre_sync::config::{
    default_library, parse_bool, SyncConfig, Thresholds, DEFAULT_MATCH_THRESHOLD,
    DEFAULT_REVIEW_THRESHOLD,
};
use audible_calibre_sync::fields::{OPTIONAL_COLUMNS, REQUIRED_COLUMNS};
use audible_calibre_sync::progress::set_log_only;
use audible_calibre_sync::report::load_export;
use audible_calibre_sync::sync::run_sync;

#[derive(Parser)]
#[command(name = "audible-sync")]
#[command(about = "Sync an Audible library export into Calibre custom columns")]
struct Cli {
    /// Hide progress bars and log progress lines instead
    #[arg(long, global = true)]
    log_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Match every Audible title against Calibre and write reports
    Sync(SyncArgs),
    /// Print the Calibre custom columns the sync writes to
    PrintColumns,
}

#[derive(clap::Args)]
struct SyncArgs {
    /// Audible library export (CSV)
    #[arg(long)]
    audible_csv: PathBuf,

    /// Calibre library directory [default: ~/Calibre]
    #[arg(long, env = "CALIBRE_LIBRARY")]
    calibre_library: Option<PathBuf>,

    /// Create Audible-only placeholder books for unmatched titles (true/false)
    #[arg(long, default_value = "false", value_parser = parse_bool, action = ArgAction::Set)]
    create_placeholders: bool,

    /// Generate reports without changing Calibre (true/false)
    #[arg(long, default_value = "true", value_parser = parse_bool, action = ArgAction::Set)]
    dry_run: bool,

    #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD, value_parser = clap::value_parser!(u8).range(0..=100))]
    match_threshold: u8,

    #[arg(long, default_value_t = DEFAULT_REVIEW_THRESHOLD, value_parser = clap::value_parser!(u8).range(0..=100))]
    review_threshold: u8,

    /// Report directory [default: ./reports_<timestamp>]
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

fn sync(args: SyncArgs) -> Result<()> {
    let thresholds = Thresholds::new(args.match_threshold, args.review_threshold)?;
    let config = SyncConfig {
        thresholds,
        simulate: args.dry_run,
        create_placeholders: args.create_placeholders,
        library: args.calibre_library.unwrap_or_else(default_library),
        audible_csv: args.audible_csv,
    };
    let report_dir = args.report_dir.unwrap_or_else(|| {
        PathBuf::from(format!("./reports_{}", Local::now().format("%Y%m%d_%H%M%S")))
    });

    if config.simulate {
        log::info!("Dry run: Calibre will not be modified");
    }

    let purchases = load_export(&config.audible_csv)
        .with_context(|| format!("Failed to read Audible CSV {:?}", config.audible_csv))?;
    log::info!("Read {} Audible titles", purchases.len());

    let mut calibre = CalibreDb::new(&config.library);
    let outcome = run_sync(&mut calibre, &purchases, &config).context("Sync failed")?;

    outcome
        .report
        .write_to_dir(&report_dir)
        .with_context(|| format!("Failed to write reports to {:?}", report_dir))?;

    outcome.report.summary.log();
    outcome.mutations.log();

    let summary = &outcome.report.summary;
    println!("Report dir: {}", report_dir.display());
    println!(
        "Summary: audible_rows={} matched={} ambiguous={} audible_only={} dry_run={}",
        summary.audible_rows, summary.matched, summary.ambiguous, summary.audible_only, summary.dry_run
    );
    Ok(())
}

fn print_columns() {
    for (name, column_type) in REQUIRED_COLUMNS {
        println!("{}: {}", name, column_type);
    }
    println!();
    println!("Optional (if present):");
    for (name, column_type) in OPTIONAL_COLUMNS {
        println!("{}: {}", name, column_type);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    set_log_only(cli.log_only);

    match cli.command {
        Command::Sync(args) => sync(args),
        Command::PrintColumns => {
            print_columns();
            Ok(())
        }
    }
}
