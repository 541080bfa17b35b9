//! Picasa's global `contacts.xml`.
//!
//! ```xml
//! <contacts>
//!  <contact id="a1b2c3d4e5f60718" name="Alice Example" display="Alice" modified_time="..."/>
//! </contacts>
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::error::{MigrateError, Result};

/// Contact id -> display name, as declared by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactRegistry {
    names: BTreeMap<String, String>,
}

impl ContactRegistry {
    pub fn get(&self, contact_id: &str) -> Option<&str> {
        self.names.get(contact_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(id, name)| (id.as_str(), name.as_str()))
    }

    fn insert(&mut self, contact_id: String, name: String) {
        match self.names.get(&contact_id) {
            Some(existing) if *existing != name => warn!(
                "Contact {} is declared twice ({:?} and {:?}), keeping the first",
                contact_id, existing, name
            ),
            Some(_) => {}
            None => {
                self.names.insert(contact_id, name);
            }
        }
    }
}

impl FromIterator<(String, String)> for ContactRegistry {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut registry = ContactRegistry::default();
        for (id, name) in iter {
            registry.insert(id, name);
        }
        registry
    }
}

/// Read and parse a registry file.
pub fn load_registry(path: &Path) -> Result<ContactRegistry> {
    let text = std::fs::read_to_string(path)?;
    parse_registry(&text)
}

pub fn parse_registry(text: &str) -> Result<ContactRegistry> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut registry = ContactRegistry::default();
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            MigrateError::MalformedRegistry(format!("at byte {}: {e}", reader.buffer_position()))
        })?;

        match event {
            Event::Start(e) => {
                open_element(depth, &mut saw_root)?;
                depth += 1;
                read_contact(&e, &mut registry)?;
            }
            Event::Empty(e) => {
                open_element(depth, &mut saw_root)?;
                read_contact(&e, &mut registry)?;
            }
            Event::End(_) => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    MigrateError::MalformedRegistry("closing tag without opening tag".into())
                })?;
            }
            Event::Text(_) | Event::CData(_) if depth == 0 => {
                return Err(MigrateError::MalformedRegistry(
                    "text outside the root element".into(),
                ));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(MigrateError::MalformedRegistry("document has no root element".into()));
    }
    if depth != 0 {
        return Err(MigrateError::MalformedRegistry("document ends inside an element".into()));
    }

    Ok(registry)
}

fn open_element(depth: usize, saw_root: &mut bool) -> Result<()> {
    if depth == 0 {
        if *saw_root {
            return Err(MigrateError::MalformedRegistry("more than one root element".into()));
        }
        *saw_root = true;
    }
    Ok(())
}

fn read_contact(element: &BytesStart, registry: &mut ContactRegistry) -> Result<()> {
    if element.name().as_ref() != b"contact" {
        return Ok(());
    }

    let mut id = None;
    let mut name = None;
    for attr in element.attributes() {
        let attr = attr.map_err(|e| MigrateError::MalformedRegistry(e.to_string()))?;
        let value = || {
            attr.unescape_value()
                .map(|v| v.trim().to_string())
                .map_err(|e| MigrateError::MalformedRegistry(e.to_string()))
        };
        match attr.key.as_ref() {
            b"id" => id = Some(value()?),
            b"name" => name = Some(value()?),
            _ => {}
        }
    }

    match (id, name) {
        (Some(id), Some(name)) if !id.is_empty() && !name.is_empty() => registry.insert(id, name),
        (id, _) => warn!("Ignoring contact without id or name: {:?}", id),
    }
    Ok(())
}
