//! Diegoctl core types: entities shaped from cloud controller records,
//! the space index, and the application-to-space join.

#![forbid(unsafe_code)]

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One raw record as it appears in a collection page's `resources` array.
pub type RawRecord = serde_json::Map<String, Value>;

/// Field-level failure while shaping a raw record into an entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} record missing or invalid field: {field}")]
pub struct RecordError {
    pub kind: &'static str,
    pub field: &'static str,
}

impl RecordError {
    fn new(kind: &'static str, field: &'static str) -> Self {
        Self { kind, field }
    }
}

fn str_field<'a>(record: &'a RawRecord, section: &str, field: &str) -> Option<&'a str> {
    record
        .get(section)
        .and_then(|s| s.get(field))
        .and_then(|v| v.as_str())
}

/// An application as reported by the cloud controller. Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub guid: String,
    pub name: String,
    pub space_guid: String,
    pub diego: bool,
    /// Remaining entity attributes, passed through uninterpreted.
    pub attributes: RawRecord,
}

impl Application {
    /// Shape a raw `{metadata, entity}` record into an Application.
    /// Unknown fields are ignored; missing required fields are errors.
    pub fn from_record(record: &RawRecord) -> Result<Self, RecordError> {
        let guid = str_field(record, "metadata", "guid")
            .ok_or_else(|| RecordError::new("application", "metadata.guid"))?;
        let name = str_field(record, "entity", "name")
            .ok_or_else(|| RecordError::new("application", "entity.name"))?;
        let space_guid = str_field(record, "entity", "space_guid")
            .ok_or_else(|| RecordError::new("application", "entity.space_guid"))?;
        let diego = record
            .get("entity")
            .and_then(|e| e.get("diego"))
            .and_then(|v| v.as_bool())
            .ok_or_else(|| RecordError::new("application", "entity.diego"))?;
        let attributes = record
            .get("entity")
            .and_then(|e| e.as_object())
            .cloned()
            .unwrap_or_default();
        Ok(Self {
            guid: guid.to_string(),
            name: name.to_string(),
            space_guid: space_guid.to_string(),
            diego,
            attributes,
        })
    }
}

/// A space as reported by the cloud controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Space {
    pub guid: String,
    pub name: String,
    pub organization_guid: String,
}

impl Space {
    pub fn from_record(record: &RawRecord) -> Result<Self, RecordError> {
        let guid = str_field(record, "metadata", "guid")
            .ok_or_else(|| RecordError::new("space", "metadata.guid"))?;
        let name = str_field(record, "entity", "name")
            .ok_or_else(|| RecordError::new("space", "entity.name"))?;
        let organization_guid = str_field(record, "entity", "organization_guid")
            .ok_or_else(|| RecordError::new("space", "entity.organization_guid"))?;
        Ok(Self {
            guid: guid.to_string(),
            name: name.to_string(),
            organization_guid: organization_guid.to_string(),
        })
    }
}

/// Which enablement toggle the presenter shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Runtime {
    Diego,
    Dea,
}

impl Runtime {
    pub fn label(&self) -> &'static str {
        match self {
            Runtime::Diego => "Diego",
            Runtime::Dea => "DEA",
        }
    }

    /// Whether `app` runs on this runtime.
    pub fn enabled(&self, app: &Application) -> bool {
        match self {
            Runtime::Diego => app.diego,
            Runtime::Dea => !app.diego,
        }
    }
}

/// Lookup table from space guid to Space.
pub type SpaceIndex = FxHashMap<String, Space>;

/// Build the index in server order; a duplicate guid overwrites the
/// earlier entry (last write wins, never an error).
pub fn build_space_index(spaces: Vec<Space>) -> SpaceIndex {
    let mut index = SpaceIndex::default();
    for space in spaces {
        index.insert(space.guid.clone(), space);
    }
    index
}

/// An application paired with its resolved space. `space` is `None`
/// when the owning space is absent from the index; the join never
/// fails on an unresolved lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresentableApp {
    pub app: Application,
    pub space: Option<Space>,
}

impl PresentableApp {
    pub fn space_name(&self) -> Option<&str> {
        self.space.as_ref().map(|s| s.name.as_str())
    }
}

/// Pair each application with its space, preserving application fetch
/// order. Unresolved lookups are kept with an empty space marker.
pub fn join_spaces(apps: Vec<Application>, index: &SpaceIndex) -> Vec<PresentableApp> {
    apps.into_iter()
        .map(|app| {
            let space = index.get(&app.space_guid).cloned();
            PresentableApp { app, space }
        })
        .collect()
}
