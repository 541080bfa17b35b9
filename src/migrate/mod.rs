//! The import pipeline: discover, parse, reconcile, map, write.
//!
//! Per-record problems are warnings, a broken metadata file is skipped and
//! counted, anything that endangers the database ends the run.

pub mod report;

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{DigikamDb, DigikamLookup, OpenOptions};
use crate::error::{MigrateError, Result};
use crate::export;
use crate::identity::{reconcile, Resolution};
use crate::mapping::{map_folders, MapOptions};
use crate::picasa::{load_registry, ContactRegistry, ParseOptions, ParsedFolder};
use crate::scanner::{discover_metadata_files, parse_all, FileParse};
use crate::writer::{RunMode, WriteOptions, Writer};

pub use report::{FileFailure, MigrationReport};

/// Inputs of one run, after config and command line are merged.
#[derive(Debug, Clone)]
pub struct MigrationRequest {
    pub photos_dir: PathBuf,
    pub db_path: PathBuf,
    pub contacts: Option<PathBuf>,
    pub mode: RunMode,
    /// Write the planned mutations here before touching the database.
    pub plan_csv: Option<PathBuf>,
}

/// A run that ended early, with everything counted up to that point.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct MigrationFailure {
    pub report: Box<MigrationReport>,
    #[source]
    pub error: MigrateError,
}

pub fn run(
    config: &Config,
    request: &MigrationRequest,
) -> std::result::Result<MigrationReport, MigrationFailure> {
    let mut report = MigrationReport::new(request.mode);
    match execute(config, request, &mut report) {
        Ok(()) => Ok(report),
        Err(error) => Err(MigrationFailure {
            report: Box::new(report),
            error,
        }),
    }
}

fn execute(config: &Config, request: &MigrationRequest, report: &mut MigrationReport) -> Result<()> {
    info!(
        "Importing {} into {} ({} run)",
        request.photos_dir.display(),
        request.db_path.display(),
        request.mode
    );

    let open = OpenOptions {
        read_only: request.mode == RunMode::Simulation,
        busy_timeout: Duration::from_millis(config.database.busy_timeout_ms),
        person_root_names: config.mapping.person_root_names.clone(),
    };
    let mut db = DigikamDb::open(&request.db_path, &open)?;

    let photos_dir = request.photos_dir.canonicalize()?;
    let files = discover_metadata_files(&photos_dir, &config.source)?;
    info!("Found {} Picasa metadata files", files.len());
    report.folders_scanned = files.len();

    let parse_options = ParseOptions::new(&config.source.media_extensions);
    let folders = collect_folders(parse_all(&files, &parse_options), report);

    let registry = load_contacts(request.contacts.as_deref(), report);
    let identities = reconcile(&folders, registry.as_ref());
    report.identities = identities.len();
    report.placeholder_identities = identities.count(Resolution::Placeholder);
    report.ambiguous_identities = identities
        .iter()
        .filter(|identity| identity.is_ambiguous())
        .map(|identity| identity.resolved_name.clone())
        .collect();

    let plan = DigikamLookup::new(db.conn(), &config.roots).and_then(|lookup| {
        map_folders(&folders, &identities, &lookup, &MapOptions::new(&config.mapping))
    });

    let mut writer = Writer::new(
        &mut db,
        WriteOptions {
            mode: request.mode,
            same_rect: config.mapping.same_rect,
            album_root_tag: config.mapping.album_root_tag.clone(),
            backup_dir: config.database.backup_dir.clone(),
        },
    );

    let plan = match plan {
        Ok(plan) => plan,
        Err(err) => {
            report.state = writer.abort(&err.to_string()).state;
            return Err(err);
        }
    };
    report.images_touched = plan.images_touched;
    report.images_missing = plan.images_missing;
    report.faces_skipped = plan.faces_skipped;
    report.unknown_albums = plan.unknown_albums;
    report.planned_mutations = plan.mutations.len();

    if let Some(path) = &request.plan_csv {
        if let Err(err) = export::write_plan_csv(&plan.mutations, path) {
            report.state = writer.abort(&err.to_string()).state;
            return Err(err);
        }
        info!("Wrote plan to {}", path.display());
    }

    let result = writer.run(&plan.mutations);
    report.state = writer.state();
    report.backup = writer.backup().cloned();
    let outcome = result?;
    report.write = outcome.stats;
    Ok(())
}

/// Keep the files that parsed, count the rest.
fn collect_folders(parsed: Vec<FileParse>, report: &mut MigrationReport) -> Vec<ParsedFolder> {
    let mut folders = Vec::with_capacity(parsed.len());
    for FileParse { path, result } in parsed {
        match result {
            Ok(folder) => {
                for warning in &folder.warnings {
                    warn!(
                        "{}: skipped [{}]: {}",
                        path.display(),
                        warning.section,
                        warning.reason
                    );
                }
                report.files_parsed += 1;
                report.corrupt_records += folder.warnings.len();
                report.unused_sections += folder.unused_sections.len();
                report.unassigned_faces += folder.unassigned_faces;
                folders.push(folder);
            }
            Err(err) => {
                error!("Skipping {}: {}", path.display(), err);
                report.files_failed.push(FileFailure {
                    path,
                    error: err.to_string(),
                });
            }
        }
    }
    folders
}

/// A broken registry only costs names, so the run goes on without it.
fn load_contacts(path: Option<&Path>, report: &mut MigrationReport) -> Option<ContactRegistry> {
    let path = path?;
    match load_registry(path) {
        Ok(registry) => {
            info!("Loaded {} contacts from {}", registry.len(), path.display());
            report.registry_entries = Some(registry.len());
            Some(registry)
        }
        Err(err) => {
            error!("Ignoring contacts file {}: {}", path.display(), err);
            None
        }
    }
}
