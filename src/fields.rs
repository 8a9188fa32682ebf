//! Field boxes: the named text regions drawn on a template.
//!
//! A template carries at most one box per [`FieldName`]. Boxes live in
//! template-pixel space (origin top-left) and may overlap freely.
//!
//! The JSON form is what the field editor saves and what `fields.json`
//! holds in the directory store:
//!
//! ```json
//! {"fields": [
//!   {"name": "person-name", "x": 120, "y": 340, "w": 900, "h": 90, "align": "center"},
//!   {"name": "course", "x": 120, "y": 480, "w": 900, "h": 70, "align": "center"},
//!   {"name": "record-id", "x": 40, "y": 1100, "w": 400, "h": 30, "align": "left"}
//! ]}
//! ```
//!
//! Older payloads used `fio` and `id` for the person and identifier roles;
//! both are still accepted on input.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic role of a field box. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldName {
    #[serde(rename = "person-name", alias = "fio", alias = "person_name")]
    PersonName,
    #[serde(rename = "course")]
    Course,
    #[serde(rename = "record-id", alias = "id", alias = "record_id")]
    RecordId,
}

impl FieldName {
    pub const ALL: [FieldName; 3] = [FieldName::PersonName, FieldName::Course, FieldName::RecordId];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldName::PersonName => "person-name",
            FieldName::Course => "course",
            FieldName::RecordId => "record-id",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Horizontal anchor of each text line inside its box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Left,
    #[default]
    Center,
    Right,
}

impl Align {
    pub fn as_str(self) -> &'static str {
        match self {
            Align::Left => "left",
            Align::Center => "center",
            Align::Right => "right",
        }
    }
}

/// A named rectangle on the template, in template pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBox {
    pub name: FieldName,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(default)]
    pub align: Align,
}

/// On-disk and wire wrapper: `{"fields": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSet {
    pub fields: Vec<FieldBox>,
}

impl FieldSet {
    /// Parse either `{"fields": [...]}` or a bare JSON array of boxes.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Payload {
            Wrapped(FieldSet),
            Bare(Vec<FieldBox>),
        }
        Ok(match serde_json::from_str(json)? {
            Payload::Wrapped(set) => set,
            Payload::Bare(fields) => FieldSet { fields },
        })
    }
}

/// Collapse boxes so each role appears once.
///
/// A later box for a role replaces the earlier one in the earlier one's
/// position, matching how the editor redraws a field.
pub fn normalize(fields: Vec<FieldBox>) -> Vec<FieldBox> {
    let mut out: Vec<FieldBox> = Vec::with_capacity(fields.len());
    for field in fields {
        match out.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => out.push(field),
        }
    }
    out
}

/// Text resolved for every role of one render job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValues {
    pub person: String,
    pub course: String,
    pub identifier: String,
}

impl FieldValues {
    pub fn get(&self, name: FieldName) -> &str {
        match name {
            FieldName::PersonName => &self.person,
            FieldName::Course => &self.course,
            FieldName::RecordId => &self.identifier,
        }
    }
}
