//! Note data model
//!
//! Identifiers and snapshots of notes owned by the note store. Everything in
//! here is plain data: a `NoteData` is created fresh on every fetch and is
//! never mutated by the pipeline, changes are expressed as `FieldUpdate`s.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Note identifier assigned by the note store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub i64);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Card identifier assigned by the note store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub i64);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a single note
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteData {
    /// Field name → field value
    pub fields: HashMap<String, String>,
    /// Tags attached to the note
    pub tags: BTreeSet<String>,
}

impl NoteData {
    pub fn new(fields: HashMap<String, String>, tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            fields,
            tags: tags.into_iter().collect(),
        }
    }

    /// Field value, or `None` when the note has no such field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// True when the field is missing or holds an empty string
    pub fn is_field_empty(&self, name: &str) -> bool {
        self.field(name).map_or(true, str::is_empty)
    }
}

/// New content for a single note field
#[derive(Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    /// Plain text (HTML) value
    Value(String),
    /// Audio payload; the field ends up containing only this audio
    Audio(Vec<u8>),
}

impl fmt::Debug for FieldUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldUpdate::Value(value) => f.debug_tuple("Value").field(value).finish(),
            FieldUpdate::Audio(bytes) => write!(f, "Audio({} bytes)", bytes.len()),
        }
    }
}
