//! Finding digiKam's record for a photo on disk.
//!
//! digiKam stores photos relative to "album roots", each identified by a
//! volume URL rather than a plain path. The roots are resolved to local
//! directories once, then every lookup is two indexed queries.

use percent_encoding::percent_decode_str;
use rusqlite::{params, Connection};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::tags::fetch_cell;
use crate::config::RootOverride;
use crate::error::Result;
use crate::mapping::{PhotoInfo, PhotoLookup};

/// `Images.status` of a visible item.
const STATUS_VISIBLE: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRoot {
    pub id: i64,
    pub path: PathBuf,
}

pub struct DigikamLookup<'a> {
    conn: &'a Connection,
    roots: Vec<AlbumRoot>,
    albums: RefCell<HashMap<PathBuf, Option<i64>>>,
}

impl<'a> DigikamLookup<'a> {
    pub fn new(conn: &'a Connection, overrides: &[RootOverride]) -> Result<Self> {
        let mut roots = load_album_roots(conn, overrides)?;
        // Longest path first so nested roots win.
        roots.sort_by(|a, b| b.path.components().count().cmp(&a.path.components().count()));
        Ok(Self {
            conn,
            roots,
            albums: RefCell::new(HashMap::new()),
        })
    }

    pub fn roots(&self) -> &[AlbumRoot] {
        &self.roots
    }

    fn album_id(&self, folder: &Path) -> Result<Option<i64>> {
        if let Some(cached) = self.albums.borrow().get(folder) {
            return Ok(*cached);
        }

        let mut found = None;
        for root in &self.roots {
            let Ok(relative) = folder.strip_prefix(&root.path) else {
                continue;
            };
            let relative_path = album_relative_path(relative);
            found = fetch_cell(
                self.conn,
                "SELECT id FROM Albums WHERE albumRoot = ?1 AND relativePath = ?2",
                params![root.id, relative_path],
            )?;
            if found.is_some() {
                break;
            }
        }
        if found.is_none() {
            debug!("{} is not a digiKam album", folder.display());
        }

        self.albums.borrow_mut().insert(folder.to_path_buf(), found);
        Ok(found)
    }
}

impl PhotoLookup for DigikamLookup<'_> {
    fn lookup(&self, folder: &Path, file_name: &str) -> Result<Option<PhotoInfo>> {
        let Some(album) = self.album_id(folder)? else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare_cached(
            "SELECT i.id, ii.width, ii.height, ii.orientation
             FROM Images i LEFT JOIN ImageInformation ii ON ii.imageid = i.id
             WHERE i.album = ?1 AND i.name = ?2 AND i.status = ?3",
        )?;
        let mut rows = stmt.query(params![album, file_name, STATUS_VISIBLE])?;
        match rows.next()? {
            Some(row) => Ok(Some(PhotoInfo {
                image_id: row.get(0)?,
                width: row.get(1)?,
                height: row.get(2)?,
                orientation: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            })),
            None => Ok(None),
        }
    }
}

/// digiKam's `relativePath`: `/` for the root itself, `/a/b` below it.
fn album_relative_path(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", parts.join("/"))
}

fn load_album_roots(conn: &Connection, overrides: &[RootOverride]) -> Result<Vec<AlbumRoot>> {
    let mut stmt = conn.prepare(
        "SELECT id, label, identifier, specificPath FROM AlbumRoots WHERE status = 0 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut roots = Vec::new();
    for (id, label, identifier, specific_path) in rows {
        let label = label.unwrap_or_default();
        let path = match overrides.iter().find(|o| o.album_root_id == id) {
            Some(o) => Some(o.path.clone()),
            None => resolve_root(identifier.as_deref().unwrap_or(""), specific_path.as_deref()),
        };
        match path {
            Some(path) => {
                let path = path.canonicalize().unwrap_or(path);
                debug!("Album root {} ({:?}) is {}", id, label, path.display());
                roots.push(AlbumRoot { id, path });
            }
            None => warn!(
                "Cannot locate album root {} ({:?}, {:?}); add a [[roots]] entry to the config to use it",
                id,
                label,
                identifier.unwrap_or_default()
            ),
        }
    }
    Ok(roots)
}

/// Turn an `AlbumRoots` identifier into a local directory.
pub fn resolve_root(identifier: &str, specific_path: Option<&str>) -> Option<PathBuf> {
    let (scheme, query) = identifier.split_once(":?")?;
    let specific = specific_path.unwrap_or("/").trim_start_matches('/');

    let mut base = None;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = percent_decode_str(value).decode_utf8_lossy().into_owned();
        base = match (scheme, key) {
            ("volumeid", "path") | ("networkshareid", "mountpath") => Some(PathBuf::from(value)),
            ("volumeid", "uuid") => mount_point_for_uuid(&value),
            _ => continue,
        };
        break;
    }

    let base = base?;
    Some(if specific.is_empty() { base } else { base.join(specific) })
}

#[cfg(target_os = "linux")]
fn mount_point_for_uuid(uuid: &str) -> Option<PathBuf> {
    let device = Path::new("/dev/disk/by-uuid").join(uuid).canonicalize().ok()?;
    let mounts = std::fs::read_to_string("/proc/self/mounts").ok()?;
    mount_point_in(&mounts, &device)
}

#[cfg(not(target_os = "linux"))]
fn mount_point_for_uuid(_uuid: &str) -> Option<PathBuf> {
    None
}

/// Find `device` in a `/proc/self/mounts` style table.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn mount_point_in(mounts: &str, device: &Path) -> Option<PathBuf> {
    mounts.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let source = fields.next()?;
        let target = fields.next()?;
        (Path::new(source) == device).then(|| PathBuf::from(unescape_mount_field(target)))
    })
}

/// Mount tables escape whitespace as octal (`\040`).
fn unescape_mount_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 4).and_then(|s| u8::from_str_radix(s, 8).ok());
        match code {
            Some(byte) => {
                out.push(byte as char);
                rest = &rest[pos + 4..];
            }
            None => {
                out.push('\\');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}
