//! Resolve ambiguous Audible → Calibre matches left by a sync run.
//! Usage: resolve-ambiguous <list|resolve|batch-resolve|export-mapping> --ambiguous-csv <reports>/ambiguous.csv

use anyhow::{bail, Context, Result};
use clap::{ArgAction, ArgGroup, Parser, Subcommand};
use std::path::{Path, PathBuf};

use audible_calibre_sync::catalog::{load_library, CalibreDb};
use audible_calibre_sync::config::{default_library, parse_bool};
use audible_calibre_sync::fields::FieldNames;
use audible_calibre_sync::models::{CatalogSnapshot, Decision, ExternalRecord, ResolutionMapping};
use audible_calibre_sync::progress::{create_spinner, set_log_only};
use audible_calibre_sync::report::{load_export, read_rows, MappingRow};
use audible_calibre_sync::resolve::{
    export_mapping_file, list, AmbiguousSet, Resolver, DEFAULT_MAPPING_FILE,
};

#[derive(Parser)]
#[command(name = "resolve-ambiguous")]
#[command(about = "Resolve ambiguous Audible matches from a sync report")]
struct Cli {
    /// Hide progress spinners and log instead
    #[arg(long, global = true)]
    log_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List ambiguous entries from a report
    List {
        #[arg(long)]
        ambiguous_csv: PathBuf,

        /// Limit number of rows printed
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Resolve one ambiguous match by ASIN
    Resolve(ResolveArgs),
    /// Resolve ambiguous matches from a mapping file
    BatchResolve {
        #[command(flatten)]
        library: LibraryArgs,

        /// Mapping CSV with asin and one of calibre_id, calibre_title, audible_only
        #[arg(long)]
        mapping_csv: PathBuf,
    },
    /// Export an editable mapping template from ambiguous.csv
    ExportMapping {
        #[arg(long)]
        ambiguous_csv: PathBuf,

        #[arg(long, default_value = DEFAULT_MAPPING_FILE)]
        output: PathBuf,
    },
}

/// Inputs shared by `resolve` and `batch-resolve`.
#[derive(clap::Args)]
struct LibraryArgs {
    #[arg(long)]
    ambiguous_csv: PathBuf,

    /// Audible library export (CSV)
    #[arg(long)]
    audible_csv: PathBuf,

    /// Calibre library directory [default: ~/Calibre]
    #[arg(long, env = "CALIBRE_LIBRARY")]
    calibre_library: Option<PathBuf>,

    /// Print actions without changing Calibre (true/false)
    #[arg(long, default_value = "true", value_parser = parse_bool, action = ArgAction::Set)]
    dry_run: bool,
}

#[derive(clap::Args)]
#[command(group(
    ArgGroup::new("decision")
        .required(true)
        .args(["calibre_id", "calibre_title", "audible_only"]),
))]
struct ResolveArgs {
    #[command(flatten)]
    library: LibraryArgs,

    #[arg(long)]
    asin: String,

    /// Calibre book id to link
    #[arg(long)]
    calibre_id: Option<i64>,

    /// Exact Calibre title to link (must be unique)
    #[arg(long)]
    calibre_title: Option<String>,

    /// Create an Audible-only placeholder (true/false)
    #[arg(long, value_parser = parse_bool, action = ArgAction::Set)]
    audible_only: Option<bool>,
}

impl ResolveArgs {
    fn mapping(&self) -> Result<ResolutionMapping> {
        let decision = match (self.audible_only, self.calibre_id, &self.calibre_title) {
            (Some(true), _, _) => Decision::AudibleOnly,
            (_, Some(id), _) => Decision::CatalogId(id),
            (_, _, Some(title)) => Decision::CatalogTitle(title.clone()),
            _ => bail!("Provide --calibre-id or --calibre-title, or use --audible-only true"),
        };
        Ok(ResolutionMapping {
            asin: self.asin.trim().to_string(),
            decision,
        })
    }
}

/// Everything a resolution needs, loaded once.
struct Workspace {
    ambiguous: AmbiguousSet,
    purchases: Vec<ExternalRecord>,
    calibre: CalibreDb,
    snapshot: CatalogSnapshot,
    names: FieldNames,
    dry_run: bool,
}

impl Workspace {
    fn load(args: &LibraryArgs) -> Result<Self> {
        let ambiguous = AmbiguousSet::load(&args.ambiguous_csv)
            .with_context(|| format!("Failed to read {:?}", args.ambiguous_csv))?;
        let purchases = load_export(&args.audible_csv)
            .with_context(|| format!("Failed to read Audible CSV {:?}", args.audible_csv))?;

        let library = args.calibre_library.clone().unwrap_or_else(default_library);
        let calibre = CalibreDb::new(library);
        let spinner = create_spinner("Loading Calibre library");
        let (snapshot, names) = load_library(&calibre).context("Failed to load Calibre library")?;
        spinner.finish_with_message(format!("Loaded {} Calibre books", snapshot.len()));

        if args.dry_run {
            log::info!("Dry run: Calibre will not be modified");
        }

        Ok(Self {
            ambiguous,
            purchases,
            calibre,
            snapshot,
            names,
            dry_run: args.dry_run,
        })
    }

    fn resolver(&mut self) -> Resolver<'_, CalibreDb> {
        Resolver::new(
            &mut self.calibre,
            &self.ambiguous,
            &self.purchases,
            &self.snapshot,
            &self.names,
            self.dry_run,
        )
    }
}

fn list_entries(ambiguous_csv: &Path, limit: Option<usize>) -> Result<()> {
    let set = AmbiguousSet::load(ambiguous_csv)
        .with_context(|| format!("Failed to read {:?}", ambiguous_csv))?;
    if set.is_empty() {
        println!("No ambiguous rows found.");
        return Ok(());
    }
    for entry in list(&set, limit) {
        println!("{}", entry);
    }
    Ok(())
}

fn resolve(args: ResolveArgs) -> Result<()> {
    let mapping = args.mapping()?;
    let mut workspace = Workspace::load(&args.library)?;
    let resolution = workspace
        .resolver()
        .resolve_one(&mapping)
        .with_context(|| format!("Could not resolve {}", mapping.asin))?;
    println!("{}: {}", mapping.asin, resolution);
    Ok(())
}

fn batch_resolve(library: LibraryArgs, mapping_csv: &Path) -> Result<()> {
    let rows: Vec<MappingRow> = read_rows(mapping_csv)
        .with_context(|| format!("Failed to read mapping {:?}", mapping_csv))?;
    if rows.is_empty() {
        println!("No mappings found.");
        return Ok(());
    }

    let mut workspace = Workspace::load(&library)?;
    let outcomes = workspace.resolver().batch_resolve(&rows)?;

    let skipped = outcomes.iter().filter(|o| o.is_skipped()).count();
    println!(
        "Resolved {} of {} rows ({} skipped)",
        outcomes.len() - skipped,
        outcomes.len(),
        skipped
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    set_log_only(cli.log_only);

    match cli.command {
        Command::List {
            ambiguous_csv,
            limit,
        } => list_entries(&ambiguous_csv, limit),
        Command::Resolve(args) => resolve(args),
        Command::BatchResolve {
            library,
            mapping_csv,
        } => batch_resolve(library, &mapping_csv),
        Command::ExportMapping {
            ambiguous_csv,
            output,
        } => {
            let rows = export_mapping_file(&ambiguous_csv, &output)?;
            println!("Wrote mapping template: {} ({} rows)", output.display(), rows);
            Ok(())
        }
    }
}
