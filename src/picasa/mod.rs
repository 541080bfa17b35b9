//! Picasa source formats: per-folder `.picasa.ini` files and the global
//! `contacts.xml` registry.

pub mod contacts;
pub mod ini;
pub mod rect64;

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub use contacts::{load_registry, parse_registry, ContactRegistry};
pub use ini::parse_folder;
pub use rect64::{parse_rect64, Rect64};

/// Contact id Picasa writes for a face it never matched to anybody.
pub const UNKNOWN_FACE_ID: &str = "ffffffffffffffff";

/// Prefix of names synthesized for contacts that have no real name.
pub const NO_NAME_PREFIX: &str = ".NoName-";

/// A face rectangle tagged with a contact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMark {
    pub rect: Rect64,
    pub contact_ref: String,
}

/// Metadata Picasa kept for one photo.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyImageRecord {
    /// File name relative to the folder.
    pub path: String,
    pub starred: bool,
    /// Album tokens, resolved to names through `ParsedFolder::albums`.
    pub albums: BTreeSet<String>,
    pub faces: Vec<FaceMark>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContactOrigin {
    /// `[Contacts2]`: `id=Display Name;email;...`
    Contacts2,
    /// `[Contacts]` from old Picasa versions, which only stored a name hash.
    LegacyHash,
}

/// A contact declaration found in a folder file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactEntry {
    pub contact_id: String,
    pub name: String,
    pub origin: ContactOrigin,
}

/// A section that could not be used; the rest of the file still was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordWarning {
    pub section: String,
    pub reason: String,
}

/// Everything decoded from one metadata file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFolder {
    /// Path of the metadata file itself.
    pub source: PathBuf,
    pub records: Vec<LegacyImageRecord>,
    /// Album token -> album name.
    pub albums: BTreeMap<String, String>,
    pub contacts: Vec<ContactEntry>,
    pub warnings: Vec<RecordWarning>,
    pub unused_sections: Vec<String>,
    /// Faces Picasa detected but never assigned to a contact.
    pub unassigned_faces: usize,
}

impl ParsedFolder {
    /// Directory holding the photos this file describes.
    pub fn folder(&self) -> &Path {
        self.source.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// Which section names are photos.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    media_extensions: Vec<String>,
}

impl ParseOptions {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            media_extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn is_media_file(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                self.media_extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::new(&crate::config::SourceConfig::default().media_extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_media_file() {
        let options = ParseOptions::new(&["JPG".to_string(), ".mp4".to_string()]);
        assert!(options.is_media_file("IMG_0001.jpg"));
        assert!(options.is_media_file("clip.MP4"));
        assert!(!options.is_media_file("notes.txt"));
        assert!(!options.is_media_file("Contacts2"));
        assert!(!options.is_media_file(".album:abc"));
    }
}
