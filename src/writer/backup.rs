use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{MigrateError, Result};

/// Copy the database (and its WAL, if any) to `<name>.bak.<timestamp>`.
///
/// Never overwrites an existing file; a counter is appended instead.
pub fn create_backup(db: &Path, backup_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match backup_dir {
        Some(dir) => dir.to_path_buf(),
        None => db.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let file_name = db
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "digikam4.db".to_string());
    let stamp = Local::now().format("%Y%m%d-%H%M%S");

    let mut backup = dir.join(format!("{file_name}.bak.{stamp}"));
    let mut counter = 1;
    while backup.exists() {
        backup = dir.join(format!("{file_name}.bak.{stamp}-{counter}"));
        counter += 1;
    }

    let fail = |source| MigrateError::Backup {
        db: db.to_path_buf(),
        backup: backup.clone(),
        source,
    };

    fs::create_dir_all(&dir).map_err(fail)?;
    let copied = fs::copy(db, &backup).map_err(fail)?;
    let expected = fs::metadata(db).map_err(fail)?.len();
    if copied != expected {
        return Err(fail(std::io::Error::other(format!(
            "copied {copied} of {expected} bytes"
        ))));
    }

    let wal = sidecar(db, "-wal");
    if wal.exists() {
        fs::copy(&wal, sidecar(&backup, "-wal")).map_err(fail)?;
    }

    info!("Backed up {} to {}", db.display(), backup.display());
    Ok(backup)
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_next_to_db() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("digikam4.db");
        fs::write(&db, b"sqlite bytes").unwrap();

        let first = create_backup(&db, None).unwrap();
        let second = create_backup(&db, None).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.parent(), Some(dir.path()));
        assert!(first
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("digikam4.db.bak."));
        assert_eq!(fs::read(&first).unwrap(), b"sqlite bytes");
        assert_eq!(fs::read(&second).unwrap(), b"sqlite bytes");
    }

    #[test]
    fn test_backup_dir_and_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("digikam4.db");
        fs::write(&db, b"main").unwrap();
        fs::write(dir.path().join("digikam4.db-wal"), b"wal").unwrap();
        let backups = dir.path().join("backups");

        let backup = create_backup(&db, Some(&backups)).unwrap();
        assert_eq!(backup.parent(), Some(backups.as_path()));
        assert_eq!(fs::read(sidecar(&backup, "-wal")).unwrap(), b"wal");
    }

    #[test]
    fn test_backup_missing_db() {
        let dir = tempfile::tempdir().unwrap();
        let result = create_backup(&dir.path().join("nope.db"), None);
        assert!(matches!(result, Err(MigrateError::Backup { .. })));
    }
}
