use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::error::Result;
use crate::mapping::PendingMutation;
use crate::migrate::MigrationReport;

/// One planned mutation, flattened for spreadsheets.
#[derive(Debug, Serialize)]
struct PlanRow<'a> {
    action: &'static str,
    image_id: Option<i64>,
    image: String,
    tag_kind: String,
    tag: &'a str,
    region: String,
}

impl<'a> From<&'a PendingMutation> for PlanRow<'a> {
    fn from(mutation: &'a PendingMutation) -> Self {
        let image = mutation.image();
        let (tag_kind, tag, region) = match mutation {
            PendingMutation::CreateTag(tag) | PendingMutation::AssignTag { tag, .. } => {
                (tag.kind.to_string(), tag.name.as_str(), String::new())
            }
            PendingMutation::CreateFaceRegion { tag, region, .. } => {
                (tag.kind.to_string(), tag.name.as_str(), region.to_digikam_xml())
            }
            PendingMutation::SetPickState { state, .. } => {
                ("pick".to_string(), state.tag_name(), String::new())
            }
        };
        Self {
            action: mutation.action(),
            image_id: image.map(|i| i.id),
            image: image.map(|i| i.path.display().to_string()).unwrap_or_default(),
            tag_kind,
            tag,
            region,
        }
    }
}

/// Write the planned mutations as CSV, one row per mutation.
pub fn write_plan_csv(mutations: &[PendingMutation], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path).map_err(io::Error::from)?;
    for mutation in mutations {
        wtr.serialize(PlanRow::from(mutation)).map_err(io::Error::from)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_report_json(report: &MigrationReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(io::Error::from)?;
    let mut file = File::create(output_path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FaceRegion, ImageRef, TagRef};
    use crate::writer::RunMode;
    use std::path::PathBuf;

    #[test]
    fn test_plan_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.csv");
        let image = ImageRef { id: 4, path: PathBuf::from("/p/a.jpg") };
        let mutations = vec![
            PendingMutation::CreateTag(TagRef::person("Alice")),
            PendingMutation::CreateFaceRegion {
                image,
                tag: TagRef::person("Alice"),
                region: FaceRegion { x: 1, y: 2, width: 3, height: 4 },
            },
        ];
        write_plan_csv(&mutations, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "action,image_id,image,tag_kind,tag,region");
        assert_eq!(lines[1], "create_tag,,,person,Alice,");
        assert!(lines[2].starts_with("create_face_region,4,/p/a.jpg,person,Alice,"));
    }

    #[test]
    fn test_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report_json(&MigrationReport::new(RunMode::Simulation), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["mode"], "simulation");
    }
}
