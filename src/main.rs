use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::error;

use picasa_import::config::{Config, SameRectPolicy};
use picasa_import::export;
use picasa_import::logging;
use picasa_import::migrate::{self, MigrationRequest};
use picasa_import::writer::RunMode;

/// Import Picasa stars, albums and face tags into a digiKam database.
///
/// Close digiKam before running. Every apply run backs the database up first.
#[derive(Parser, Debug)]
#[command(name = "picasa-import")]
#[command(version)]
struct Args {
    /// Root directory with photos and their .picasa.ini files
    #[arg(long, alias = "photos_dir")]
    photos_dir: PathBuf,

    /// Full path to digiKam's digikam4.db
    #[arg(long, alias = "digikam_db")]
    digikam_db: Option<PathBuf>,

    /// Picasa's contacts.xml, for names of people
    #[arg(long)]
    contacts: Option<PathBuf>,

    /// Report what would change without writing anything
    #[arg(long, alias = "dry_run")]
    dry_run: bool,

    /// Config file (default: the user config directory)
    #[arg(short, long, env = "PICASA_IMPORT_CONFIG")]
    config: Option<PathBuf>,

    /// More log output; -vv for debug
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Do not add a face where digiKam already has the same rectangle
    #[arg(long, alias = "skip_same_rect", overrides_with = "no_skip_same_rect")]
    skip_same_rect: bool,

    /// Add faces even where digiKam already has the same rectangle
    #[arg(long, alias = "no_skip_same_rect", overrides_with = "skip_same_rect")]
    no_skip_same_rect: bool,

    /// Write the planned changes as CSV
    #[arg(long)]
    plan_csv: Option<PathBuf>,

    /// Write the final report as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Directory for log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init(args.verbose, args.log_dir.clone()) {
        eprintln!("Warning: logging unavailable: {e:#}");
    }

    if let Err(e) = run(args) {
        error!("{:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if args.skip_same_rect {
        config.mapping.same_rect = SameRectPolicy::Skip;
    }
    if args.no_skip_same_rect {
        config.mapping.same_rect = SameRectPolicy::Add;
    }

    let Some(db_path) = args.digikam_db.or_else(|| config.database.path.clone()) else {
        bail!("no digiKam database given, pass --digikam-db or set [database] path in the config");
    };

    let request = MigrationRequest {
        photos_dir: args.photos_dir,
        db_path,
        contacts: args.contacts.or_else(|| config.source.contacts.clone()),
        mode: if args.dry_run { RunMode::Simulation } else { RunMode::Apply },
        plan_csv: args.plan_csv,
    };

    let report = match migrate::run(&config, &request) {
        Ok(report) => report,
        Err(failure) => {
            println!("{}", failure.report);
            if let Some(path) = &args.report_json {
                if let Err(e) = export::write_report_json(&failure.report, path) {
                    error!("Failed to write report to {}: {}", path.display(), e);
                }
            }
            return Err(anyhow::Error::new(failure.error)
                .context(format!("Import into {} failed", request.db_path.display())));
        }
    };

    println!("{report}");

    if let Some(path) = &args.report_json {
        export::write_report_json(&report, path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    Ok(())
}
