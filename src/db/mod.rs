//! Access to digiKam's SQLite database (`digikam4.db`).
//!
//! Only the tables the import needs are touched: `Tags`, `TagProperties`,
//! `ImageTags` and `ImageTagProperties` for writing, and `AlbumRoots`,
//! `Albums`, `Images` and `ImageInformation` for finding photos.

pub mod lookup;
pub mod tags;

#[cfg(test)]
pub(crate) mod schema;

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{MigrateError, Result};

pub use lookup::DigikamLookup;

/// Root of digiKam's internal tags (pick labels, color labels, ...).
pub const INTERNAL_ROOT_TAG: &str = "_Digikam_Internal_Tags_";

/// Pick label tags below the internal root.
pub const PICK_LABEL_TAGS: &[&str] = &[
    "Pick Label Accepted",
    "Pick Label Pending",
    "Pick Label Rejected",
    "Pick Label None",
];

#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub read_only: bool,
    pub busy_timeout: Duration,
    /// Candidate names of the people root tag.
    pub person_root_names: Vec<String>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            busy_timeout: Duration::ZERO,
            person_root_names: vec!["Persons".to_string(), "Personen".to_string()],
        }
    }
}

/// Well-known tag ids discovered when the database is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRoots {
    pub person_root: i64,
    pub internal_root: i64,
    /// Ids of the pick label tags that exist, `PICK_LABEL_TAGS` order.
    pub pick_labels: Vec<(String, i64)>,
}

impl TagRoots {
    pub fn pick_label(&self, name: &str) -> Option<i64> {
        self.pick_labels
            .iter()
            .find(|(label, _)| label == name)
            .map(|(_, id)| *id)
    }

    pub fn pick_label_ids(&self) -> Vec<i64> {
        self.pick_labels.iter().map(|(_, id)| *id).collect()
    }
}

pub struct DigikamDb {
    path: PathBuf,
    conn: Connection,
    roots: TagRoots,
    read_only: bool,
}

impl DigikamDb {
    /// Open an existing digiKam database. Never creates one.
    pub fn open(path: &Path, options: &OpenOptions) -> Result<Self> {
        let flags = if options.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let unavailable = |source| MigrateError::StoreUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let conn = Connection::open_with_flags(path, flags).map_err(unavailable)?;
        conn.busy_timeout(options.busy_timeout).map_err(unavailable)?;

        let roots = detect_roots(&conn, &options.person_root_names)
            .map_err(|e| match e {
                MigrateError::Sqlite(source) => MigrateError::from_sqlite(path, source),
                other => other,
            })?;
        debug!("digiKam tag roots: {:?}", roots);

        Ok(Self {
            path: path.to_path_buf(),
            conn,
            roots,
            read_only: options.read_only,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn roots(&self) -> &TagRoots {
        &self.roots
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

}

fn detect_roots(conn: &Connection, person_root_names: &[String]) -> Result<TagRoots> {
    let person_root = detect_person_root(conn, person_root_names)?;

    let internal_root = tags::find_tag(conn, 0, INTERNAL_ROOT_TAG)?.ok_or_else(|| {
        MigrateError::Schema(format!("no {INTERNAL_ROOT_TAG} tag, is this a digiKam database?"))
    })?;

    let mut pick_labels = Vec::new();
    for label in PICK_LABEL_TAGS {
        if let Some(id) = tags::find_tag(conn, internal_root, label)? {
            pick_labels.push((label.to_string(), id));
        }
    }
    if !pick_labels.iter().any(|(label, _)| label == PICK_LABEL_TAGS[0]) {
        return Err(MigrateError::Schema(format!("no {:?} tag", PICK_LABEL_TAGS[0])));
    }

    Ok(TagRoots {
        person_root,
        internal_root,
        pick_labels,
    })
}

/// The people root is named after the UI language, so fall back to walking
/// up from any tag that carries a `person` property.
fn detect_person_root(conn: &Connection, names: &[String]) -> Result<i64> {
    for name in names {
        if let Some(id) = tags::find_tag(conn, 0, name)? {
            return Ok(id);
        }
    }

    let some_person = tags::fetch_cell::<i64>(
        conn,
        "SELECT tagid FROM TagProperties WHERE property = 'person' LIMIT 1",
        [],
    )?
    .ok_or_else(|| MigrateError::Schema("no people root tag found".into()))?;

    let parent = tags::parent_of(conn, some_person)?
        .ok_or_else(|| MigrateError::Schema(format!("person tag {some_person} has no parent")))?;
    match tags::parent_of(conn, parent)? {
        Some(0) => Ok(parent),
        _ => Err(MigrateError::Schema(format!(
            "person tag {some_person} is not directly below a root tag"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{fixture, Fixture};

    #[test]
    fn test_open_detects_roots() {
        let Fixture { dir: _dir, db_path, .. } = fixture();
        let db = DigikamDb::open(&db_path, &OpenOptions::default()).unwrap();
        let roots = db.roots();
        assert_eq!(roots.pick_labels.len(), 4);
        assert!(roots.pick_label("Pick Label Accepted").is_some());
        assert_ne!(roots.person_root, roots.internal_root);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = DigikamDb::open(&dir.path().join("digikam4.db"), &OpenOptions::default());
        assert!(matches!(result, Err(MigrateError::StoreUnavailable { .. })));
        assert!(!dir.path().join("digikam4.db").exists());
    }

    #[test]
    fn test_person_root_fallback() {
        let Fixture { dir: _dir, db_path, .. } = fixture();
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("UPDATE Tags SET name = 'Leute' WHERE name = 'Persons'", []).unwrap();
            conn.execute("INSERT INTO Tags (pid, name) SELECT id, 'Zoe' FROM Tags WHERE name = 'Leute'", [])
                .unwrap();
            conn.execute(
                "INSERT INTO TagProperties (tagid, property, value) SELECT id, 'person', 'Zoe' FROM Tags WHERE name = 'Zoe'",
                [],
            )
            .unwrap();
        }
        let db = DigikamDb::open(&db_path, &OpenOptions::default()).unwrap();
        let leute: i64 = db
            .conn()
            .query_row("SELECT id FROM Tags WHERE name = 'Leute'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(db.roots().person_root, leute);
    }

    #[test]
    fn test_not_a_digikam_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch(crate::db::schema::SCHEMA)
            .unwrap();
        assert!(matches!(
            DigikamDb::open(&path, &OpenOptions::default()),
            Err(MigrateError::Schema(_))
        ));
    }
}
