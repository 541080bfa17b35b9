//! Queries and inserts on digiKam's tag tables.
//!
//! All functions take a plain `&Connection` so they work the same inside a
//! transaction (`Transaction` derefs to `Connection`) and outside of one.

use rusqlite::{params, Connection, OptionalExtension, Params};

use crate::error::Result;

/// `ImageTagProperties.property` holding a face rectangle.
pub const REGION_PROPERTY: &str = "tagRegion";

/// Fetch the first column of the first row, if any.
pub fn fetch_cell<T: rusqlite::types::FromSql>(
    conn: &Connection,
    sql: &str,
    params: impl Params,
) -> Result<Option<T>> {
    let value = conn.query_row(sql, params, |row| row.get(0)).optional()?;
    Ok(value)
}

pub fn find_tag(conn: &Connection, pid: i64, name: &str) -> Result<Option<i64>> {
    fetch_cell(conn, "SELECT id FROM Tags WHERE pid = ?1 AND name = ?2", params![pid, name])
}

pub fn parent_of(conn: &Connection, tag_id: i64) -> Result<Option<i64>> {
    fetch_cell(conn, "SELECT pid FROM Tags WHERE id = ?1", params![tag_id])
}

pub fn insert_tag(conn: &Connection, pid: i64, name: &str) -> Result<i64> {
    conn.execute("INSERT INTO Tags (pid, name) VALUES (?1, ?2)", params![pid, name])?;
    Ok(conn.last_insert_rowid())
}

/// Create a person tag the way digiKam's face UI does.
pub fn insert_person_tag(conn: &Connection, person_root: i64, name: &str) -> Result<i64> {
    let id = insert_tag(conn, person_root, name)?;
    conn.execute(
        "INSERT INTO TagProperties (tagid, property, value) VALUES (?1, 'person', ?2)",
        params![id, name],
    )?;
    conn.execute(
        "INSERT INTO TagProperties (tagid, property, value) VALUES (?1, 'faceEngineId', ?2)",
        params![id, id.to_string()],
    )?;
    Ok(id)
}

pub fn image_has_tag(conn: &Connection, image_id: i64, tag_id: i64) -> Result<bool> {
    let found: Option<i64> = fetch_cell(
        conn,
        "SELECT 1 FROM ImageTags WHERE imageid = ?1 AND tagid = ?2",
        params![image_id, tag_id],
    )?;
    Ok(found.is_some())
}

/// The subset of `tag_ids` the image carries.
pub fn image_tags_among(conn: &Connection, image_id: i64, tag_ids: &[i64]) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached("SELECT tagid FROM ImageTags WHERE imageid = ?1")?;
    let tags = stmt
        .query_map(params![image_id], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tags.into_iter().filter(|id| tag_ids.contains(id)).collect())
}

pub fn add_image_tag(conn: &Connection, image_id: i64, tag_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO ImageTags (imageid, tagid) VALUES (?1, ?2)",
        params![image_id, tag_id],
    )?;
    Ok(())
}

pub fn has_region(conn: &Connection, image_id: i64, tag_id: i64, region: &str) -> Result<bool> {
    let found: Option<i64> = fetch_cell(
        conn,
        "SELECT 1 FROM ImageTagProperties
         WHERE imageid = ?1 AND tagid = ?2 AND property = ?3 AND value = ?4",
        params![image_id, tag_id, REGION_PROPERTY, region],
    )?;
    Ok(found.is_some())
}

/// Tags that already have exactly this rectangle on the image.
pub fn tags_with_region(conn: &Connection, image_id: i64, region: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT tagid FROM ImageTagProperties WHERE imageid = ?1 AND property = ?2 AND value = ?3",
    )?;
    let tags = stmt
        .query_map(params![image_id, REGION_PROPERTY, region], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(tags)
}

/// Tag a person on an image with a face rectangle.
pub fn add_region(conn: &Connection, image_id: i64, tag_id: i64, region: &str) -> Result<()> {
    add_image_tag(conn, image_id, tag_id)?;
    conn.execute(
        "INSERT INTO ImageTagProperties (imageid, tagid, property, value) VALUES (?1, ?2, ?3, ?4)",
        params![image_id, tag_id, REGION_PROPERTY, region],
    )?;
    Ok(())
}
