use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::SourceConfig;
use crate::error::Result;
use crate::picasa::ParseOptions;

/// Find the Picasa metadata file of every folder below `root`.
///
/// At most one file per folder is returned, the first of `ini_file_names`
/// that exists. Results are sorted by path.
pub fn discover_metadata_files(root: &Path, source: &SourceConfig) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        )
        .into());
    }

    let media = ParseOptions::new(&source.media_extensions);
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e, &source.skip_dirs));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot read {}", e);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let dir = entry.path();
        let found = source
            .ini_file_names
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file());

        match found {
            Some(path) => files.push(path),
            None if has_media(dir, &media) => {
                info!("{} has photos but no Picasa metadata", dir.display());
            }
            None => {}
        }
    }

    files.sort();
    Ok(files)
}

fn is_skipped(entry: &DirEntry, skip_dirs: &[String]) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && skip_dirs
            .iter()
            .any(|skip| entry.file_name().to_string_lossy().eq_ignore_ascii_case(skip))
}

fn has_media(dir: &Path, media: &ParseOptions) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| media.is_media_file(&e.file_name().to_string_lossy()))
        })
        .unwrap_or(false)
}
