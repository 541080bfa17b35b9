use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::writer::{RunMode, RunState, WriteStats};

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Summary of one run, printed in both modes.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub mode: RunMode,
    pub started_at: DateTime<Local>,
    pub state: RunState,
    pub backup: Option<PathBuf>,

    pub folders_scanned: usize,
    pub files_parsed: usize,
    pub files_failed: Vec<FileFailure>,
    pub corrupt_records: usize,
    pub unused_sections: usize,
    pub unassigned_faces: usize,

    pub registry_entries: Option<usize>,
    pub identities: usize,
    /// Resolved names of contacts seen under several names.
    pub ambiguous_identities: Vec<String>,
    pub placeholder_identities: usize,

    pub images_touched: usize,
    pub images_missing: usize,
    pub faces_skipped: usize,
    pub unknown_albums: usize,
    pub planned_mutations: usize,

    pub write: WriteStats,
}

impl MigrationReport {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            started_at: Local::now(),
            state: RunState::Init,
            backup: None,
            folders_scanned: 0,
            files_parsed: 0,
            files_failed: Vec::new(),
            corrupt_records: 0,
            unused_sections: 0,
            unassigned_faces: 0,
            registry_entries: None,
            identities: 0,
            ambiguous_identities: Vec::new(),
            placeholder_identities: 0,
            images_touched: 0,
            images_missing: 0,
            faces_skipped: 0,
            unknown_albums: 0,
            planned_mutations: 0,
            write: WriteStats::default(),
        }
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w = &self.write;
        writeln!(f, "Picasa import report ({} run)", self.mode)?;
        if self.mode == RunMode::Simulation {
            writeln!(f, "  nothing was written, counts are what an apply run would do")?;
        }
        writeln!(f, "  started:               {}", self.started_at.format("%Y-%m-%d %H:%M:%S"))?;
        if let Some(backup) = &self.backup {
            writeln!(f, "  backup:                {}", backup.display())?;
        }
        writeln!(f, "  folders scanned:       {}", self.folders_scanned)?;
        writeln!(f, "  files parsed:          {}", self.files_parsed)?;
        writeln!(f, "  files failed:          {}", self.files_failed.len())?;
        for failure in &self.files_failed {
            writeln!(f, "    {}: {}", failure.path.display(), failure.error)?;
        }
        writeln!(f, "  corrupt records:       {}", self.corrupt_records)?;
        writeln!(f, "  unused sections:       {}", self.unused_sections)?;
        writeln!(f, "  faces without person:  {}", self.unassigned_faces)?;
        match self.registry_entries {
            Some(n) => writeln!(f, "  registry contacts:     {n}")?,
            None => writeln!(f, "  registry contacts:     not used")?,
        }
        writeln!(f, "  identities:            {}", self.identities)?;
        writeln!(f, "  ambiguous identities:  {}", self.ambiguous_identities.len())?;
        for name in &self.ambiguous_identities {
            writeln!(f, "    {name}")?;
        }
        writeln!(f, "  placeholder names:     {}", self.placeholder_identities)?;
        writeln!(f, "  images touched:        {}", self.images_touched)?;
        writeln!(f, "  images not in digiKam: {}", self.images_missing)?;
        writeln!(f, "  faces skipped:         {}", self.faces_skipped)?;
        writeln!(f, "  undeclared albums:     {}", self.unknown_albums)?;
        writeln!(f, "  planned changes:       {}", self.planned_mutations)?;
        writeln!(f, "  tags created:          {}", w.tags_created)?;
        writeln!(f, "  tags reused:           {}", w.tags_reused)?;
        writeln!(f, "  tag assignments:       {}", w.tags_assigned)?;
        writeln!(f, "  face regions:          {}", w.faces_created)?;
        writeln!(f, "  picks:                 {}", w.picks_set)?;
        writeln!(f, "  already present:       {}", w.already_present)?;
        write!(f, "  conflicts left alone:  {}", w.conflicts)
    }
}
