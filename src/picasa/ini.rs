//! Parser for Picasa's per-folder `.picasa.ini` files.
//!
//! The format is a loose INI dialect: one section per photo, plus a few
//! bookkeeping sections (`[Picasa]`, `[Contacts2]`, `[.album:TOKEN]`, ...).
//! A broken photo section only costs that photo, however many of them there
//! are. A file whose structure is gone (zero-filled after a crash, content
//! before the first header, a cut-off header) is rejected as a whole.

use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use super::{
    parse_rect64, ContactEntry, ContactOrigin, FaceMark, LegacyImageRecord, ParseOptions,
    ParsedFolder, RecordWarning, NO_NAME_PREFIX, UNKNOWN_FACE_ID,
};
use crate::error::{MigrateError, Result};

const ALBUM_SECTION_PREFIX: &str = ".album:";
const CONTACTS2_SECTION: &str = "Contacts2";
const CONTACTS_SECTION: &str = "Contacts";
const IGNORED_SECTIONS: &[&str] = &["Picasa", "encoding"];

/// Section name used in errors for lines before the first header.
const PREAMBLE: &str = "<preamble>";

#[derive(Debug, Default)]
struct RawSection {
    name: String,
    entries: Vec<(String, String)>,
    errors: Vec<String>,
}

/// Parse one metadata file.
///
/// `source` is only recorded in the result; no I/O happens here.
pub fn parse_folder(source: &Path, text: &str, options: &ParseOptions) -> Result<ParsedFolder> {
    let sections = split_sections(text)?;

    let mut folder = ParsedFolder {
        source: source.to_path_buf(),
        ..Default::default()
    };

    let mut malformed_images: Vec<RecordWarning> = Vec::new();

    for section in &sections {
        let name = section.name.as_str();

        if IGNORED_SECTIONS.contains(&name) {
            continue;
        }

        if name == CONTACTS2_SECTION || name == CONTACTS_SECTION {
            parse_contacts(section, &mut folder);
            continue;
        }

        if let Some(token) = name.strip_prefix(ALBUM_SECTION_PREFIX) {
            parse_album(token, section, &mut folder);
            continue;
        }

        if options.is_media_file(name) {
            match parse_image(section) {
                Ok((record, unassigned)) => {
                    folder.unassigned_faces += unassigned;
                    folder.records.push(record);
                }
                Err(reason) => {
                    malformed_images.push(RecordWarning {
                        section: name.to_string(),
                        reason,
                    });
                }
            }
            continue;
        }

        folder.unused_sections.push(name.to_string());
    }

    for warning in &malformed_images {
        warn!(
            "Skipping [{}] in {}: {}",
            warning.section,
            source.display(),
            warning.reason
        );
    }
    folder.warnings.extend(malformed_images);

    Ok(folder)
}

/// Split the text into sections, merging repeated headers.
fn split_sections(text: &str) -> Result<Vec<RawSection>> {
    let mut sections: Vec<RawSection> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut current: Option<usize> = None;

    for (line_no, raw_line) in text.lines().enumerate() {
        let line = if line_no == 0 {
            raw_line.trim_start_matches('\u{feff}')
        } else {
            raw_line
        };

        let section_name = || {
            current
                .map(|i| sections[i].name.clone())
                .unwrap_or_else(|| PREAMBLE.to_string())
        };

        if line.contains('\0') {
            return Err(MigrateError::malformed(
                section_name(),
                format!("NUL bytes on line {}, file looks truncated", line_no + 1),
            ));
        }

        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') {
            let name = line
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(|| {
                    MigrateError::malformed(
                        section_name(),
                        format!("broken section header on line {}: {line:?}", line_no + 1),
                    )
                })?;
            let slot = *index.entry(name.to_string()).or_insert_with(|| {
                sections.push(RawSection {
                    name: name.to_string(),
                    ..Default::default()
                });
                sections.len() - 1
            });
            current = Some(slot);
            continue;
        }

        let Some(slot) = current else {
            return Err(MigrateError::malformed(
                PREAMBLE,
                format!("content before the first section header on line {}", line_no + 1),
            ));
        };

        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                sections[slot]
                    .entries
                    .push((key.trim().to_lowercase(), value.trim().to_string()));
            }
            _ => sections[slot]
                .errors
                .push(format!("unreadable line {}: {line:?}", line_no + 1)),
        }
    }

    Ok(sections)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// `faces`, `faces1`, `faces2`, ...
fn is_face_key(key: &str) -> bool {
    key.strip_prefix("faces")
        .map(|suffix| suffix.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// Returns the record and the number of faces without a contact.
fn parse_image(section: &RawSection) -> std::result::Result<(LegacyImageRecord, usize), String> {
    if let Some(error) = section.errors.first() {
        return Err(error.clone());
    }

    let mut record = LegacyImageRecord {
        path: section.name.clone(),
        ..Default::default()
    };
    let mut unassigned = 0;

    for (key, value) in &section.entries {
        match key.as_str() {
            "star" => {
                record.starred =
                    parse_bool(value).ok_or_else(|| format!("invalid star value {value:?}"))?;
            }
            "albums" => {
                record.albums.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|token| !token.is_empty())
                        .map(str::to_string),
                );
            }
            key if is_face_key(key) => {
                for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
                    let (rect, contact) = entry
                        .split_once(',')
                        .ok_or_else(|| format!("face entry without contact: {entry:?}"))?;
                    let contact = contact.trim();
                    if contact.is_empty() || contact.contains(',') {
                        return Err(format!("invalid face entry {entry:?}"));
                    }
                    let rect = parse_rect64(rect)?;
                    if contact == UNKNOWN_FACE_ID {
                        unassigned += 1;
                        continue;
                    }
                    record.faces.push(FaceMark {
                        rect,
                        contact_ref: contact.to_string(),
                    });
                }
            }
            other => debug!("Ignoring key {} of [{}]", other, section.name),
        }
    }

    Ok((record, unassigned))
}

fn parse_contacts(section: &RawSection, folder: &mut ParsedFolder) {
    for error in &section.errors {
        folder.warnings.push(RecordWarning {
            section: section.name.clone(),
            reason: error.clone(),
        });
    }

    for (contact_id, value) in &section.entries {
        let entry = if section.name == CONTACTS2_SECTION {
            let name = value.split(';').next().unwrap_or_default().trim();
            if name.is_empty() {
                debug!("Contact {} has no name in {}", contact_id, folder.source.display());
                continue;
            }
            ContactEntry {
                contact_id: contact_id.clone(),
                name: name.to_string(),
                origin: ContactOrigin::Contacts2,
            }
        } else {
            match value.split(',').nth(1).map(str::trim) {
                Some(hash) if !hash.is_empty() => ContactEntry {
                    contact_id: contact_id.clone(),
                    name: format!("{NO_NAME_PREFIX}{hash}"),
                    origin: ContactOrigin::LegacyHash,
                },
                _ => {
                    folder.warnings.push(RecordWarning {
                        section: section.name.clone(),
                        reason: format!("contact {contact_id} has no name hash: {value:?}"),
                    });
                    continue;
                }
            }
        };
        folder.contacts.push(entry);
    }
}

fn parse_album(token: &str, section: &RawSection, folder: &mut ParsedFolder) {
    let lookup = |wanted: &str| {
        section
            .entries
            .iter()
            .rev()
            .find(|(key, _)| key == wanted)
            .map(|(_, value)| value.as_str())
    };

    let Some(name) = lookup("name").filter(|name| !name.is_empty()) else {
        debug!("Skipping unnamed album {}", token);
        return;
    };

    if let Some(declared) = lookup("token") {
        if declared != token {
            folder.warnings.push(RecordWarning {
                section: section.name.clone(),
                reason: format!("album token {declared:?} does not match header"),
            });
            return;
        }
    }

    folder.albums.insert(token.to_string(), name.to_string());
}
