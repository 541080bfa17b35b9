//! Reading the Picasa metadata files of a photo collection.

pub mod discovery;

use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::picasa::{parse_folder, ParseOptions, ParsedFolder};

pub use discovery::discover_metadata_files;

/// Outcome of parsing one metadata file.
#[derive(Debug)]
pub struct FileParse {
    pub path: PathBuf,
    pub result: Result<ParsedFolder>,
}

/// Parse every file in parallel. The output keeps the input order.
pub fn parse_all(files: &[PathBuf], options: &ParseOptions) -> Vec<FileParse> {
    files
        .par_iter()
        .map(|path| FileParse {
            path: path.clone(),
            result: parse_file(path, options),
        })
        .collect()
}

pub fn parse_file(path: &Path, options: &ParseOptions) -> Result<ParsedFolder> {
    let bytes = fs::read(path)?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!("{} is not valid UTF-8, replacing bad bytes", path.display());
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };

    let folder = parse_folder(path, &text, options)?;
    debug!(
        "{}: {} records, {} albums, {} contacts",
        path.display(),
        folder.records.len(),
        folder.albums.len(),
        folder.contacts.len()
    );
    Ok(folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use tempfile::tempdir;

    #[test]
    fn test_parse_all_keeps_order_and_isolates_failures() {
        let dir = tempdir().unwrap();
        let mut files = Vec::new();
        for i in 0..20 {
            let path = dir.path().join(format!("{i:02}.ini"));
            let text = if i == 7 {
                "junk before any header\n".to_string()
            } else {
                format!("[img{i}.jpg]\nstar=yes\n")
            };
            fs::write(&path, text).unwrap();
            files.push(path);
        }

        let parsed = parse_all(&files, &ParseOptions::default());
        assert_eq!(parsed.len(), 20);
        for (i, item) in parsed.iter().enumerate() {
            assert_eq!(item.path, files[i]);
            if i == 7 {
                assert!(matches!(item.result, Err(MigrateError::MalformedRecord { .. })));
            } else {
                let folder = item.result.as_ref().unwrap();
                assert_eq!(folder.records[0].path, format!("img{i}.jpg"));
            }
        }
    }

    #[test]
    fn test_invalid_utf8_is_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".picasa.ini");
        fs::write(&path, b"[caf\xe9.jpg]\nstar=yes\n").unwrap();
        let folder = parse_file(&path, &ParseOptions::default()).unwrap();
        assert_eq!(folder.records.len(), 1);
        assert!(folder.records[0].starred);
    }
}
