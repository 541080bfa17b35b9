//! Identity reconciliation.
//!
//! Picasa stores contact names per folder, so the same contact id can show
//! up with several spellings (renamed between exports), with a name hash
//! only, or with no name at all. This module folds every observation into
//! one canonical name per contact id. The result depends only on the set of
//! observations, which is what lets repeated imports find the tags they
//! created last time.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::picasa::{ContactOrigin, ContactRegistry, ParsedFolder, NO_NAME_PREFIX};

/// Joins conflicting names. Part of the naming contract, never change.
pub const MERGED_NAME_SEPARATOR: &str = "|";

/// Placeholder names are `PLACEHOLDER_PREFIX` + this many hex digits of
/// SHA-256(contact id). Part of the naming contract, never change.
pub const PLACEHOLDER_HASH_LEN: usize = 12;
pub const PLACEHOLDER_PREFIX: &str = NO_NAME_PREFIX;

/// How a contact's name was decided, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Registry,
    Unique,
    /// Several names were seen; they were merged.
    Merged,
    LegacyHash,
    Placeholder,
}

/// One canonical person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactIdentity {
    pub contact_id: String,
    /// Every `[Contacts2]` name observed, with how often it was seen.
    pub candidate_names: BTreeMap<String, usize>,
    /// `.NoName-HASH` names from old `[Contacts]` sections.
    pub legacy_names: BTreeSet<String>,
    pub resolved_name: String,
    pub resolution: Resolution,
}

impl ContactIdentity {
    pub fn is_ambiguous(&self) -> bool {
        self.resolution == Resolution::Merged
    }
}

/// Finalized identities, keyed by contact id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityTable {
    identities: BTreeMap<String, ContactIdentity>,
}

impl IdentityTable {
    pub fn get(&self, contact_id: &str) -> Option<&ContactIdentity> {
        self.identities.get(contact_id)
    }

    pub fn resolved_name(&self, contact_id: &str) -> Option<&str> {
        self.get(contact_id).map(|identity| identity.resolved_name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContactIdentity> {
        self.identities.values()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn count(&self, resolution: Resolution) -> usize {
        self.iter().filter(|i| i.resolution == resolution).count()
    }
}

#[derive(Debug, Default)]
struct Observations {
    names: BTreeMap<String, usize>,
    legacy: BTreeSet<String>,
}

/// Build the identity table from every parsed folder plus the optional registry.
pub fn reconcile(folders: &[ParsedFolder], registry: Option<&ContactRegistry>) -> IdentityTable {
    let mut observed: BTreeMap<String, Observations> = BTreeMap::new();

    if let Some(registry) = registry {
        for (contact_id, _) in registry.iter() {
            observed.entry(contact_id.to_string()).or_default();
        }
    }

    for folder in folders {
        for contact in &folder.contacts {
            let entry = observed.entry(contact.contact_id.clone()).or_default();
            match contact.origin {
                ContactOrigin::Contacts2 => {
                    if !entry.names.contains_key(&contact.name) && !entry.names.is_empty() {
                        warn!(
                            "Contact {} is called {:?} in {}, but had other names elsewhere",
                            contact.contact_id,
                            contact.name,
                            folder.source.display()
                        );
                    }
                    *entry.names.entry(contact.name.clone()).or_insert(0) += 1;
                }
                ContactOrigin::LegacyHash => {
                    entry.legacy.insert(contact.name.clone());
                }
            }
        }

        for record in &folder.records {
            for face in &record.faces {
                observed.entry(face.contact_ref.clone()).or_default();
            }
        }
    }

    let identities = observed
        .into_iter()
        .map(|(contact_id, seen)| {
            let (resolved_name, resolution) = resolve(&contact_id, &seen, registry);
            match resolution {
                Resolution::Merged => warn!(
                    "Contact {} has conflicting names, using {:?}",
                    contact_id, resolved_name
                ),
                Resolution::Placeholder => info!(
                    "Contact {} has no name anywhere, using {:?}",
                    contact_id, resolved_name
                ),
                _ => debug!("Contact {} -> {:?} ({:?})", contact_id, resolved_name, resolution),
            }
            let identity = ContactIdentity {
                contact_id: contact_id.clone(),
                candidate_names: seen.names,
                legacy_names: seen.legacy,
                resolved_name,
                resolution,
            };
            (contact_id, identity)
        })
        .collect();

    IdentityTable { identities }
}

fn resolve(
    contact_id: &str,
    seen: &Observations,
    registry: Option<&ContactRegistry>,
) -> (String, Resolution) {
    if let Some(name) = registry.and_then(|r| r.get(contact_id)) {
        return (name.to_string(), Resolution::Registry);
    }

    // BTreeMap keys are already in code point order.
    let mut names = seen.names.keys();
    match (names.next(), seen.names.len()) {
        (Some(only), 1) => return (only.clone(), Resolution::Unique),
        (Some(_), _) => {
            let merged = seen
                .names
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(MERGED_NAME_SEPARATOR);
            return (merged, Resolution::Merged);
        }
        (None, _) => {}
    }

    if let Some(legacy) = seen.legacy.iter().next() {
        return (legacy.clone(), Resolution::LegacyHash);
    }

    (placeholder_name(contact_id), Resolution::Placeholder)
}

/// Stable name for a contact nobody ever named.
pub fn placeholder_name(contact_id: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(contact_id.as_bytes()));
    format!("{PLACEHOLDER_PREFIX}{}", &digest[..PLACEHOLDER_HASH_LEN])
}
