//! Translation of reconciled Picasa data into digiKam mutations.
//!
//! The mapper knows digiKam's conceptual model (plain tags, person tags with
//! face regions, pick labels) but never talks to the database itself; the
//! photo lookup is the only outside information it needs.

pub mod region;

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::MappingConfig;
use crate::error::Result;
use crate::identity::IdentityTable;
use crate::picasa::{LegacyImageRecord, ParsedFolder};

pub use region::FaceRegion;

/// The three kinds of digiKam tags the import touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    /// Album tags, below the album root tag.
    Plain,
    /// People, below the persons root tag.
    Person,
    /// digiKam's internal pick labels.
    Pick,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TagKind::Plain => "plain",
            TagKind::Person => "person",
            TagKind::Pick => "pick",
        };
        f.write_str(name)
    }
}

/// Identifies a destination tag; `(kind, name)` is the idempotence key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TagRef {
    pub kind: TagKind,
    pub name: String,
}

impl TagRef {
    pub fn plain(name: impl Into<String>) -> Self {
        Self { kind: TagKind::Plain, name: name.into() }
    }

    pub fn person(name: impl Into<String>) -> Self {
        Self { kind: TagKind::Person, name: name.into() }
    }
}

impl fmt::Display for TagRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tag {:?}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageRef {
    /// `Images.id` in digiKam.
    pub id: i64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PickState {
    Accepted,
}

impl PickState {
    /// Name of the internal digiKam tag for this label.
    pub fn tag_name(&self) -> &'static str {
        match self {
            PickState::Accepted => "Pick Label Accepted",
        }
    }
}

/// One intended change to the destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PendingMutation {
    CreateTag(TagRef),
    AssignTag { image: ImageRef, tag: TagRef },
    CreateFaceRegion { image: ImageRef, tag: TagRef, region: FaceRegion },
    SetPickState { image: ImageRef, state: PickState },
}

impl PendingMutation {
    pub fn action(&self) -> &'static str {
        match self {
            PendingMutation::CreateTag(_) => "create_tag",
            PendingMutation::AssignTag { .. } => "assign_tag_to_image",
            PendingMutation::CreateFaceRegion { .. } => "create_face_region",
            PendingMutation::SetPickState { .. } => "set_pick_state",
        }
    }

    pub fn image(&self) -> Option<&ImageRef> {
        match self {
            PendingMutation::CreateTag(_) => None,
            PendingMutation::AssignTag { image, .. }
            | PendingMutation::CreateFaceRegion { image, .. }
            | PendingMutation::SetPickState { image, .. } => Some(image),
        }
    }
}

/// What the destination knows about a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoInfo {
    pub image_id: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// EXIF orientation code.
    pub orientation: i64,
}

/// Finds the destination's record for a photo on disk.
pub trait PhotoLookup {
    fn lookup(&self, folder: &Path, file_name: &str) -> Result<Option<PhotoInfo>>;
}

#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    skip_faces_on_extensions: Vec<String>,
}

impl MapOptions {
    pub fn new(config: &MappingConfig) -> Self {
        Self {
            skip_faces_on_extensions: config
                .skip_faces_on_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    fn skips_faces(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                self.skip_faces_on_extensions.contains(&ext)
            })
            .unwrap_or(false)
    }
}

/// Ordered, duplicate-free mutations plus what had to be left out.
#[derive(Debug, Clone, Default)]
pub struct MappingPlan {
    pub mutations: Vec<PendingMutation>,
    pub images_touched: usize,
    pub images_missing: usize,
    pub faces_skipped: usize,
    pub unknown_albums: usize,
    seen: HashSet<PendingMutation>,
}

impl MappingPlan {
    fn push(&mut self, mutation: PendingMutation) -> bool {
        if self.seen.contains(&mutation) {
            return false;
        }
        self.seen.insert(mutation.clone());
        self.mutations.push(mutation);
        true
    }

    /// Emit `create_tag` the first time a tag is needed.
    fn push_with_tag(&mut self, tag: &TagRef, mutation: PendingMutation) -> bool {
        self.push(PendingMutation::CreateTag(tag.clone()));
        self.push(mutation)
    }

    pub fn count(&self, action: &str) -> usize {
        self.mutations.iter().filter(|m| m.action() == action).count()
    }
}

/// Build the mutation plan for all folders, in folder order.
pub fn map_folders(
    folders: &[ParsedFolder],
    identities: &IdentityTable,
    lookup: &dyn PhotoLookup,
    options: &MapOptions,
) -> Result<MappingPlan> {
    let mut plan = MappingPlan::default();

    for folder in folders {
        for record in &folder.records {
            map_record(folder, record, identities, lookup, options, &mut plan)?;
        }
    }

    debug!("Planned {} mutations", plan.mutations.len());
    Ok(plan)
}

fn map_record(
    folder: &ParsedFolder,
    record: &LegacyImageRecord,
    identities: &IdentityTable,
    lookup: &dyn PhotoLookup,
    options: &MapOptions,
    plan: &mut MappingPlan,
) -> Result<()> {
    if !record.starred && record.albums.is_empty() && record.faces.is_empty() {
        return Ok(());
    }

    let path = folder.folder().join(&record.path);
    let Some(info) = lookup.lookup(folder.folder(), &record.path)? else {
        warn!("digiKam does not know {}, skipping it", path.display());
        plan.images_missing += 1;
        return Ok(());
    };
    let image = ImageRef { id: info.image_id, path };
    let mut touched = false;

    if record.starred {
        touched |= plan.push(PendingMutation::SetPickState {
            image: image.clone(),
            state: PickState::Accepted,
        });
    }

    for token in &record.albums {
        let Some(name) = folder.albums.get(token) else {
            warn!(
                "{} refers to album {} which {} does not declare",
                image.path.display(),
                token,
                folder.source.display()
            );
            plan.unknown_albums += 1;
            continue;
        };
        let tag = TagRef::plain(name.clone());
        touched |= plan.push_with_tag(
            &tag,
            PendingMutation::AssignTag { image: image.clone(), tag: tag.clone() },
        );
    }

    if record.faces.is_empty() {
        return finish(plan, touched);
    }

    let size = match (info.width, info.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
        _ => None,
    };
    let size = match size {
        Some(size) if !options.skips_faces(&record.path) => size,
        Some(_) => {
            warn!(
                "Skipping faces on {}: digiKam does not place faces on this format",
                image.path.display()
            );
            plan.faces_skipped += record.faces.len();
            return finish(plan, touched);
        }
        None => {
            warn!("Skipping faces on {}: digiKam has no pixel size for it", image.path.display());
            plan.faces_skipped += record.faces.len();
            return finish(plan, touched);
        }
    };

    for face in &record.faces {
        let Some(name) = identities.resolved_name(&face.contact_ref) else {
            warn!("No identity for contact {} on {}", face.contact_ref, image.path.display());
            plan.faces_skipped += 1;
            continue;
        };
        let region = match FaceRegion::from_rect(&face.rect, size.0, size.1, info.orientation) {
            Ok(region) => region,
            Err(reason) => {
                warn!("Skipping face of {:?} on {}: {}", name, image.path.display(), reason);
                plan.faces_skipped += 1;
                continue;
            }
        };
        let tag = TagRef::person(name);
        touched |= plan.push_with_tag(
            &tag,
            PendingMutation::CreateFaceRegion { image: image.clone(), tag: tag.clone(), region },
        );
    }

    finish(plan, touched)
}

fn finish(plan: &mut MappingPlan, touched: bool) -> Result<()> {
    if touched {
        plan.images_touched += 1;
    }
    Ok(())
}
