//! Applies a mutation plan to the digiKam database.
//!
//! A run moves through `Init -> BackupCreated -> Transacting` and ends in
//! `Committed` or `RolledBack`. Apply runs back the database up before the
//! first write and do everything in one transaction. Simulation runs use a
//! read-only connection and keep would-be inserts in memory, so they report
//! exactly what an apply run would do.

pub mod backup;

use md5::{Digest, Md5};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::SameRectPolicy;
use crate::db::{tags, DigikamDb, TagRoots};
use crate::error::{MigrateError, Result};
use crate::mapping::{ImageRef, PendingMutation, PickState, TagKind, TagRef};

pub use backup::create_backup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Report what would change, write nothing.
    Simulation,
    Apply,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Simulation => f.write_str("simulation"),
            RunMode::Apply => f.write_str("apply"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    BackupCreated,
    Transacting,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub mode: RunMode,
    pub same_rect: SameRectPolicy,
    /// Parent tag of album tags; created on first use.
    pub album_root_tag: String,
    pub backup_dir: Option<PathBuf>,
}

/// What a run did (or, in simulation, would do).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub tags_created: usize,
    pub tags_reused: usize,
    pub tags_assigned: usize,
    pub faces_created: usize,
    pub picks_set: usize,
    /// Already present from an earlier run.
    pub already_present: usize,
    /// Left alone because the image already says something else.
    pub conflicts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub mode: RunMode,
    pub state: RunState,
    pub backup: Option<PathBuf>,
    pub stats: WriteStats,
}

pub struct Writer<'db> {
    db: &'db mut DigikamDb,
    options: WriteOptions,
    state: RunState,
    backup: Option<PathBuf>,
}

fn transition(state: &mut RunState, next: RunState) {
    debug!("Writer {:?} -> {:?}", state, next);
    *state = next;
}

impl<'db> Writer<'db> {
    pub fn new(db: &'db mut DigikamDb, options: WriteOptions) -> Self {
        Self {
            db,
            options,
            state: RunState::Init,
            backup: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The backup taken by this run, kept even when the run fails later.
    pub fn backup(&self) -> Option<&PathBuf> {
        self.backup.as_ref()
    }

    /// Give up before touching the database.
    pub fn abort(mut self, reason: &str) -> WriteOutcome {
        warn!("Nothing written to {}: {}", self.db.path().display(), reason);
        transition(&mut self.state, RunState::RolledBack);
        WriteOutcome {
            mode: self.options.mode,
            state: self.state,
            backup: None,
            stats: WriteStats::default(),
        }
    }

    /// Apply (or simulate) the plan. After an error, `state()` and
    /// `backup()` still tell how far the run got.
    pub fn run(&mut self, mutations: &[PendingMutation]) -> Result<WriteOutcome> {
        let mode = self.options.mode;
        if mode == RunMode::Apply && self.db.is_read_only() {
            return Err(MigrateError::Schema("apply run on a read-only connection".into()));
        }

        let path = self.db.path().to_path_buf();
        let roots = self.db.roots().clone();
        let behavior = match mode {
            RunMode::Apply => TransactionBehavior::Immediate,
            RunMode::Simulation => TransactionBehavior::Deferred,
        };
        // Apply runs hold the write lock from here on, so no other writer
        // can commit between the backup and our first insert.
        let tx = self
            .db
            .conn_mut()
            .transaction_with_behavior(behavior)
            .map_err(|e| MigrateError::from_sqlite(&path, e))?;

        if mode == RunMode::Apply {
            match create_backup(&path, self.options.backup_dir.as_deref()) {
                Ok(copy) => self.backup = Some(copy),
                Err(err) => {
                    warn!("Not writing to {}: {}", path.display(), err);
                    if let Err(rollback) = tx.rollback() {
                        warn!("Rollback failed: {}", rollback);
                    }
                    transition(&mut self.state, RunState::RolledBack);
                    return Err(err);
                }
            }
            transition(&mut self.state, RunState::BackupCreated);
        }
        transition(&mut self.state, RunState::Transacting);

        let mut session = Session::new(&tx, &roots, &self.options);
        let applied = mutations.iter().try_for_each(|m| session.apply(m));
        let stats = session.stats;

        if let Err(err) = applied {
            warn!("Rolling back {}: {}", path.display(), err);
            if let Err(rollback) = tx.rollback() {
                warn!("Rollback failed: {}", rollback);
            }
            transition(&mut self.state, RunState::RolledBack);
            return Err(err);
        }

        match mode {
            RunMode::Apply => {
                tx.commit().map_err(|source| MigrateError::Commit { path: path.clone(), source })?;
                transition(&mut self.state, RunState::Committed);
                info!("Committed changes to {}", path.display());
            }
            RunMode::Simulation => {
                tx.rollback()?;
                transition(&mut self.state, RunState::RolledBack);
            }
        }

        Ok(WriteOutcome {
            mode,
            state: self.state,
            backup: self.backup.clone(),
            stats,
        })
    }
}

/// Per-run state: tag ids resolved so far and, when simulating, the rows
/// that would have been inserted.
struct Session<'a> {
    conn: &'a Connection,
    roots: &'a TagRoots,
    options: &'a WriteOptions,
    tag_ids: HashMap<TagRef, i64>,
    album_root: Option<i64>,
    image_tags: HashSet<(i64, i64)>,
    regions: HashSet<(i64, i64, String)>,
    stats: WriteStats,
}

impl<'a> Session<'a> {
    fn new(conn: &'a Connection, roots: &'a TagRoots, options: &'a WriteOptions) -> Self {
        Self {
            conn,
            roots,
            options,
            tag_ids: HashMap::new(),
            album_root: None,
            image_tags: HashSet::new(),
            regions: HashSet::new(),
            stats: WriteStats::default(),
        }
    }

    fn simulating(&self) -> bool {
        self.options.mode == RunMode::Simulation
    }

    fn verb(&self) -> &'static str {
        if self.simulating() {
            "Would"
        } else {
            "Will"
        }
    }

    fn apply(&mut self, mutation: &PendingMutation) -> Result<()> {
        match mutation {
            PendingMutation::CreateTag(tag) => self.tag_id(tag).map(|_| ()),
            PendingMutation::AssignTag { image, tag } => self.assign_tag(image, tag),
            PendingMutation::CreateFaceRegion { image, tag, region } => {
                self.add_face(image, tag, &region.to_digikam_xml())
            }
            PendingMutation::SetPickState { image, state } => self.set_pick(image, *state),
        }
    }

    /// Find or create the tag, once per run.
    fn tag_id(&mut self, tag: &TagRef) -> Result<i64> {
        if let Some(id) = self.tag_ids.get(tag) {
            return Ok(*id);
        }

        let parent = match tag.kind {
            TagKind::Plain => self.album_root()?,
            TagKind::Person => self.roots.person_root,
            TagKind::Pick => self.roots.internal_root,
        };

        let id = match tags::find_tag(self.conn, parent, &tag.name)? {
            Some(id) => {
                debug!("Reusing {} ({})", tag, id);
                self.stats.tags_reused += 1;
                id
            }
            None if tag.kind == TagKind::Pick => {
                return Err(MigrateError::Schema(format!("missing internal {tag}")));
            }
            None => {
                info!("{} create {}", self.verb(), tag);
                self.stats.tags_created += 1;
                self.create_tag(parent, tag)?
            }
        };
        self.tag_ids.insert(tag.clone(), id);
        Ok(id)
    }

    fn album_root(&mut self) -> Result<i64> {
        if let Some(id) = self.album_root {
            return Ok(id);
        }
        let name = self.options.album_root_tag.clone();
        let id = match tags::find_tag(self.conn, 0, &name)? {
            Some(id) => id,
            None => {
                info!("{} create root tag {:?}", self.verb(), name);
                self.stats.tags_created += 1;
                if self.simulating() {
                    simulated_tag_id(0, &name)
                } else {
                    tags::insert_tag(self.conn, 0, &name)?
                }
            }
        };
        self.album_root = Some(id);
        Ok(id)
    }

    fn create_tag(&mut self, parent: i64, tag: &TagRef) -> Result<i64> {
        if self.simulating() {
            return Ok(simulated_tag_id(parent, &tag.name));
        }
        match tag.kind {
            TagKind::Person => tags::insert_person_tag(self.conn, parent, &tag.name),
            _ => tags::insert_tag(self.conn, parent, &tag.name),
        }
    }

    fn has_image_tag(&self, image: i64, tag: i64) -> Result<bool> {
        if self.image_tags.contains(&(image, tag)) {
            return Ok(true);
        }
        tags::image_has_tag(self.conn, image, tag)
    }

    fn insert_image_tag(&mut self, image: i64, tag: i64) -> Result<()> {
        if self.simulating() {
            self.image_tags.insert((image, tag));
            Ok(())
        } else {
            tags::add_image_tag(self.conn, image, tag)
        }
    }

    fn assign_tag(&mut self, image: &ImageRef, tag: &TagRef) -> Result<()> {
        let tag_id = self.tag_id(tag)?;
        if self.has_image_tag(image.id, tag_id)? {
            debug!("{} already has {}", image.path.display(), tag);
            self.stats.already_present += 1;
            return Ok(());
        }
        debug!("{} add {} to {}", self.verb(), tag, image.path.display());
        self.insert_image_tag(image.id, tag_id)?;
        self.stats.tags_assigned += 1;
        Ok(())
    }

    fn add_face(&mut self, image: &ImageRef, tag: &TagRef, region: &str) -> Result<()> {
        let tag_id = self.tag_id(tag)?;

        let exists = self.regions.contains(&(image.id, tag_id, region.to_string()))
            || tags::has_region(self.conn, image.id, tag_id, region)?;
        if exists {
            debug!("{} already has a face for {}", image.path.display(), tag);
            self.stats.already_present += 1;
            return Ok(());
        }

        if self.has_image_tag(image.id, tag_id)? {
            warn!(
                "{} already has {} with a different region, leaving it alone",
                image.path.display(),
                tag
            );
            self.stats.conflicts += 1;
            return Ok(());
        }

        if self.options.same_rect == SameRectPolicy::Skip && self.region_taken(image.id, region)? {
            warn!(
                "{} already has a face at {} for another person, not adding {}",
                image.path.display(),
                region,
                tag
            );
            self.stats.conflicts += 1;
            return Ok(());
        }

        debug!("{} add face {} for {} to {}", self.verb(), region, tag, image.path.display());
        if self.simulating() {
            self.image_tags.insert((image.id, tag_id));
            self.regions.insert((image.id, tag_id, region.to_string()));
        } else {
            tags::add_region(self.conn, image.id, tag_id, region)?;
        }
        self.stats.faces_created += 1;
        Ok(())
    }

    fn region_taken(&self, image: i64, region: &str) -> Result<bool> {
        if self.regions.iter().any(|(i, _, r)| *i == image && r == region) {
            return Ok(true);
        }
        Ok(!tags::tags_with_region(self.conn, image, region)?.is_empty())
    }

    fn set_pick(&mut self, image: &ImageRef, state: PickState) -> Result<()> {
        let tag = TagRef { kind: TagKind::Pick, name: state.tag_name().to_string() };
        let wanted = self.tag_id(&tag)?;

        let labels = self.roots.pick_label_ids();
        let mut current = tags::image_tags_among(self.conn, image.id, &labels)?;
        current.extend(
            labels
                .iter()
                .filter(|label| self.image_tags.contains(&(image.id, **label))),
        );

        if current.contains(&wanted) {
            self.stats.already_present += 1;
            return Ok(());
        }
        if !current.is_empty() {
            warn!(
                "{} already has a different pick label, not marking it accepted",
                image.path.display()
            );
            self.stats.conflicts += 1;
            return Ok(());
        }

        debug!("{} mark {} accepted", self.verb(), image.path.display());
        self.insert_image_tag(image.id, wanted)?;
        self.stats.picks_set += 1;
        Ok(())
    }
}

/// Stand-in id for a tag a simulation would create. Negative, so it never
/// matches a real row.
fn simulated_tag_id(parent: i64, name: &str) -> i64 {
    let digest = Md5::digest(format!("{parent}/{name}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    -((u64::from_be_bytes(bytes) >> 2) as i64) - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{fixture, Fixture};
    use crate::db::OpenOptions;
    use crate::mapping::FaceRegion;

    fn options(mode: RunMode) -> WriteOptions {
        WriteOptions {
            mode,
            same_rect: SameRectPolicy::Skip,
            album_root_tag: "Picasa".into(),
            backup_dir: None,
        }
    }

    fn open(fixture: &Fixture, mode: RunMode) -> DigikamDb {
        let open = OpenOptions {
            read_only: mode == RunMode::Simulation,
            ..OpenOptions::default()
        };
        DigikamDb::open(&fixture.db_path, &open).unwrap()
    }

    fn image(id: i64) -> ImageRef {
        ImageRef { id, path: PathBuf::from(format!("/photos/{id}.jpg")) }
    }

    fn plan(fixture: &Fixture) -> Vec<PendingMutation> {
        let a = image(fixture.images[0]);
        let b = image(fixture.images[1]);
        let vacation = TagRef::plain("Vacation");
        let alice = TagRef::person("Alice");
        let region = FaceRegion { x: 10, y: 20, width: 30, height: 40 };
        vec![
            PendingMutation::SetPickState { image: a.clone(), state: PickState::Accepted },
            PendingMutation::CreateTag(vacation.clone()),
            PendingMutation::AssignTag { image: a.clone(), tag: vacation.clone() },
            PendingMutation::AssignTag { image: b.clone(), tag: vacation },
            PendingMutation::CreateTag(alice.clone()),
            PendingMutation::CreateFaceRegion { image: a, tag: alice.clone(), region },
            PendingMutation::CreateFaceRegion { image: b, tag: alice, region },
        ]
    }

    fn count(db: &DigikamDb, sql: &str) -> i64 {
        db.conn().query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_apply_commits_and_backs_up() {
        let fixture = fixture();
        let mut db = open(&fixture, RunMode::Apply);
        let mutations = plan(&fixture);

        let outcome = Writer::new(&mut db, options(RunMode::Apply)).run(&mutations).unwrap();
        assert_eq!(outcome.state, RunState::Committed);
        assert!(outcome.backup.as_ref().unwrap().exists());
        assert_eq!(
            outcome.stats,
            WriteStats {
                // Picasa, Vacation and Alice.
                tags_created: 3,
                tags_reused: 1,
                tags_assigned: 2,
                faces_created: 2,
                picks_set: 1,
                already_present: 0,
                conflicts: 0,
            }
        );

        assert_eq!(count(&db, "SELECT COUNT(*) FROM Tags WHERE name = 'Picasa' AND pid = 0"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM ImageTagProperties WHERE property = 'tagRegion'"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM TagProperties WHERE property = 'person' AND value = 'Alice'"), 1);
    }

    #[test]
    fn test_second_apply_changes_nothing() {
        let fixture = fixture();
        let mutations = plan(&fixture);
        let mut db = open(&fixture, RunMode::Apply);
        Writer::new(&mut db, options(RunMode::Apply)).run(&mutations).unwrap();
        let tags_before = count(&db, "SELECT COUNT(*) FROM Tags");
        let links_before = count(&db, "SELECT COUNT(*) FROM ImageTags");

        let again = Writer::new(&mut db, options(RunMode::Apply)).run(&mutations).unwrap();
        assert_eq!(again.stats.tags_created, 0);
        assert_eq!(again.stats.tags_assigned + again.stats.faces_created + again.stats.picks_set, 0);
        assert_eq!(again.stats.already_present, 5);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Tags"), tags_before);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM ImageTags"), links_before);
    }

    #[test]
    fn test_simulation_matches_apply() {
        let fixture = fixture();
        let mutations = plan(&fixture);
        let before = std::fs::read(&fixture.db_path).unwrap();

        let mut sim_db = open(&fixture, RunMode::Simulation);
        let simulated = Writer::new(&mut sim_db, options(RunMode::Simulation)).run(&mutations).unwrap();
        drop(sim_db);
        assert_eq!(simulated.state, RunState::RolledBack);
        assert!(simulated.backup.is_none());
        assert_eq!(std::fs::read(&fixture.db_path).unwrap(), before);

        let mut db = open(&fixture, RunMode::Apply);
        let applied = Writer::new(&mut db, options(RunMode::Apply)).run(&mutations).unwrap();
        assert_eq!(simulated.stats, applied.stats);
    }

    #[test]
    fn test_existing_pick_label_is_kept() {
        let fixture = fixture();
        let mut db = open(&fixture, RunMode::Apply);
        let rejected = db.roots().pick_label("Pick Label Rejected").unwrap();
        tags::add_image_tag(db.conn(), fixture.images[0], rejected).unwrap();

        let mutations = vec![PendingMutation::SetPickState {
            image: image(fixture.images[0]),
            state: PickState::Accepted,
        }];
        let outcome = Writer::new(&mut db, options(RunMode::Apply)).run(&mutations).unwrap();
        assert_eq!(outcome.stats.conflicts, 1);
        assert_eq!(outcome.stats.picks_set, 0);
    }

    #[test]
    fn test_same_rect_policy() {
        let region = FaceRegion { x: 1, y: 2, width: 3, height: 4 };
        let mutations = |fixture: &Fixture| {
            let a = image(fixture.images[0]);
            vec![
                PendingMutation::CreateFaceRegion { image: a.clone(), tag: TagRef::person("Bob"), region },
                PendingMutation::CreateFaceRegion { image: a, tag: TagRef::person("Robert"), region },
            ]
        };

        let skip = fixture();
        let mut db = open(&skip, RunMode::Apply);
        let outcome = Writer::new(&mut db, options(RunMode::Apply)).run(&mutations(&skip)).unwrap();
        assert_eq!((outcome.stats.faces_created, outcome.stats.conflicts), (1, 1));

        let add = fixture();
        let mut db = open(&add, RunMode::Apply);
        let opts = WriteOptions { same_rect: SameRectPolicy::Add, ..options(RunMode::Apply) };
        let outcome = Writer::new(&mut db, opts).run(&mutations(&add)).unwrap();
        assert_eq!((outcome.stats.faces_created, outcome.stats.conflicts), (2, 0));
    }

    #[test]
    fn test_failure_rolls_back() {
        let fixture = fixture();
        let mut db = open(&fixture, RunMode::Apply);
        db.conn().execute_batch("DROP TABLE ImageTagProperties").unwrap();

        let result = Writer::new(&mut db, options(RunMode::Apply)).run(&plan(&fixture));
        assert!(result.is_err());
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Tags WHERE name = 'Vacation'"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM ImageTags"), 0);
    }

    #[test]
    fn test_locked_database_is_refused() {
        let fixture = fixture();
        let mut db = open(&fixture, RunMode::Apply);
        let other = Connection::open(&fixture.db_path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let result = Writer::new(&mut db, options(RunMode::Apply)).run(&plan(&fixture));
        assert!(matches!(result, Err(MigrateError::StoreLocked(_))));
        other.execute_batch("ROLLBACK;").unwrap();
        let backups = std::fs::read_dir(fixture.dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().contains(".bak."))
            .count();
        assert_eq!(backups, 0);
    }

    #[test]
    fn test_unwritable_backup_dir_stops_the_run() {
        let fixture = fixture();
        let blocker = fixture.dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let before = std::fs::read(&fixture.db_path).unwrap();

        let mut db = open(&fixture, RunMode::Apply);
        let opts = WriteOptions { backup_dir: Some(blocker.join("backups")), ..options(RunMode::Apply) };
        let mut writer = Writer::new(&mut db, opts);
        let result = writer.run(&plan(&fixture));
        assert!(matches!(result, Err(MigrateError::Backup { .. })));
        assert_eq!(writer.state(), RunState::RolledBack);
        assert!(writer.backup().is_none());
        drop(writer);

        assert_eq!(count(&db, "SELECT COUNT(*) FROM Tags WHERE name IN ('Picasa', 'Vacation', 'Alice')"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM ImageTags"), 0);
        drop(db);
        assert_eq!(std::fs::read(&fixture.db_path).unwrap(), before);

        // The write lock is gone again.
        let other = Connection::open(&fixture.db_path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE; ROLLBACK;").unwrap();
    }

    #[test]
    fn test_backup_is_taken_under_the_write_lock() {
        let fixture = fixture();
        let mut db = open(&fixture, RunMode::Apply);
        let outcome = Writer::new(&mut db, options(RunMode::Apply)).run(&plan(&fixture)).unwrap();
        let backup = outcome.backup.unwrap();

        // The copy is the state the transaction started from.
        let copy = Connection::open(&backup).unwrap();
        let tags: i64 = copy
            .query_row("SELECT COUNT(*) FROM Tags WHERE name = 'Vacation'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tags, 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Tags WHERE name = 'Vacation'"), 1);
    }

    #[test]
    fn test_abort_goes_straight_to_rolled_back() {
        let fixture = fixture();
        let mut db = open(&fixture, RunMode::Apply);
        let writer = Writer::new(&mut db, options(RunMode::Apply));
        assert_eq!(writer.state(), RunState::Init);
        let outcome = writer.abort("mapping failed");
        assert_eq!(outcome.state, RunState::RolledBack);
        assert_eq!(outcome.stats, WriteStats::default());
    }
}
