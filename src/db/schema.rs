//! The parts of digiKam's schema the import relies on, plus a seeded
//! database for tests.

use rusqlite::{params, Connection};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const SCHEMA: &str = r#"
CREATE TABLE AlbumRoots (
    id INTEGER PRIMARY KEY,
    label TEXT,
    status INTEGER NOT NULL,
    type INTEGER NOT NULL,
    identifier TEXT,
    specificPath TEXT,
    UNIQUE(identifier, specificPath)
);

CREATE TABLE Albums (
    id INTEGER PRIMARY KEY,
    albumRoot INTEGER NOT NULL,
    relativePath TEXT NOT NULL,
    date DATE,
    caption TEXT,
    collection TEXT,
    icon INTEGER,
    UNIQUE(albumRoot, relativePath)
);

CREATE TABLE Images (
    id INTEGER PRIMARY KEY,
    album INTEGER,
    name TEXT NOT NULL,
    status INTEGER NOT NULL,
    category INTEGER NOT NULL,
    modificationDate DATETIME,
    fileSize INTEGER,
    uniqueHash TEXT,
    manualOrder INTEGER,
    UNIQUE (album, name)
);

CREATE TABLE ImageInformation (
    imageid INTEGER PRIMARY KEY,
    rating INTEGER,
    creationDate DATETIME,
    digitizationDate DATETIME,
    orientation INTEGER,
    width INTEGER,
    height INTEGER,
    format TEXT,
    colorDepth INTEGER,
    colorModel INTEGER
);

CREATE TABLE Tags (
    id INTEGER PRIMARY KEY,
    pid INTEGER,
    name TEXT NOT NULL,
    icon INTEGER,
    iconkde TEXT,
    UNIQUE (name, pid)
);

CREATE TABLE TagProperties (
    tagid INTEGER,
    property TEXT,
    value TEXT
);

CREATE TABLE ImageTags (
    imageid INTEGER NOT NULL,
    tagid INTEGER NOT NULL,
    UNIQUE (imageid, tagid)
);

CREATE TABLE ImageTagProperties (
    imageid INTEGER,
    tagid INTEGER,
    property TEXT,
    value TEXT
);
"#;

/// A seeded digiKam database next to a photo collection.
pub struct Fixture {
    pub dir: TempDir,
    pub db_path: PathBuf,
    /// Album root; contains the `trip` album.
    pub photos: PathBuf,
    /// `trip/a.jpg` (4000x3000), `trip/b.jpg` (rotated 90°), `trip/c.psd`.
    pub images: Vec<i64>,
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");
    fs::create_dir_all(photos.join("trip")).unwrap();
    for name in ["a.jpg", "b.jpg", "c.psd"] {
        fs::write(photos.join("trip").join(name), b"").unwrap();
    }

    let db_path = dir.path().join("digikam4.db");
    let conn = Connection::open(&db_path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();

    conn.execute_batch(
        "INSERT INTO Tags (id, pid, name) VALUES (1, 0, '_Digikam_Internal_Tags_');
         INSERT INTO Tags (id, pid, name) VALUES (2, 1, 'Pick Label None');
         INSERT INTO Tags (id, pid, name) VALUES (3, 1, 'Pick Label Rejected');
         INSERT INTO Tags (id, pid, name) VALUES (4, 1, 'Pick Label Pending');
         INSERT INTO Tags (id, pid, name) VALUES (5, 1, 'Pick Label Accepted');
         INSERT INTO Tags (id, pid, name) VALUES (6, 0, 'Persons');",
    )
    .unwrap();

    let identifier = format!(
        "volumeid:?path={}",
        photos.to_string_lossy().replace('%', "%25").replace('/', "%2F")
    );
    conn.execute(
        "INSERT INTO AlbumRoots (id, label, status, type, identifier, specificPath)
         VALUES (1, 'photos', 0, 1, ?1, '/')",
        params![identifier],
    )
    .unwrap();
    conn.execute_batch(
        "INSERT INTO Albums (id, albumRoot, relativePath) VALUES (1, 1, '/');
         INSERT INTO Albums (id, albumRoot, relativePath) VALUES (2, 1, '/trip');",
    )
    .unwrap();

    let mut images = Vec::new();
    for (name, size, orientation) in [
        ("a.jpg", Some((4000, 3000)), 1),
        ("b.jpg", Some((4000, 3000)), 6),
        ("c.psd", None, 0),
    ] {
        conn.execute(
            "INSERT INTO Images (album, name, status, category) VALUES (2, ?1, 1, 1)",
            params![name],
        )
        .unwrap();
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO ImageInformation (imageid, orientation, width, height) VALUES (?1, ?2, ?3, ?4)",
            params![id, orientation, size.map(|s| s.0), size.map(|s| s.1)],
        )
        .unwrap();
        images.push(id);
    }

    Fixture { dir, db_path, photos, images }
}
