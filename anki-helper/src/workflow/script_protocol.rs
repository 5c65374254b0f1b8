//! Script output protocol
//!
//! A note-processing script prints nothing (no-op) or a JSON array of
//! modification objects, each with exactly one key:
//!
//! ```json
//! [
//!   {"set_field": {"Plural": "Häuser"}},
//!   {"set_field_if_empty": {"Gender": "das"}},
//!   {"add_tag": "noun"}
//! ]
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// One instruction from a script, applied to a single note
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    SetField(BTreeMap<String, String>),
    SetFieldIfEmpty(BTreeMap<String, String>),
    AddTag(String),
}

#[derive(Debug, Error)]
pub enum ScriptOutputError {
    #[error("script output is not a JSON array: {0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("malformed modification #{index}: {reason}")]
    MalformedModification { index: usize, reason: String },

    #[error("modification #{index} has {populated} keys set instead of exactly one")]
    AmbiguousModification { index: usize, populated: usize },
}

/// Wire shape of a modification; validated into [`Modification`]
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModification {
    set_field: Option<BTreeMap<String, String>>,
    set_field_if_empty: Option<BTreeMap<String, String>>,
    add_tag: Option<String>,
}

impl RawModification {
    fn into_modification(self, index: usize) -> Result<Modification, ScriptOutputError> {
        let populated = [
            self.set_field.is_some(),
            self.set_field_if_empty.is_some(),
            self.add_tag.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();

        match (self.set_field, self.set_field_if_empty, self.add_tag) {
            (Some(fields), None, None) => Ok(Modification::SetField(fields)),
            (None, Some(fields), None) => Ok(Modification::SetFieldIfEmpty(fields)),
            (None, None, Some(tag)) => Ok(Modification::AddTag(tag)),
            _ => Err(ScriptOutputError::AmbiguousModification { index, populated }),
        }
    }
}

/// Parse a script's stdout. Blank output is an empty modification list.
///
/// Output order is preserved; aggregation depends on it.
pub fn parse_script_output(stdout: &[u8]) -> Result<Vec<Modification>, ScriptOutputError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let items: Vec<serde_json::Value> =
        serde_json::from_slice(stdout).map_err(ScriptOutputError::MalformedJson)?;

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<RawModification>(item)
                .map_err(|e| ScriptOutputError::MalformedModification {
                    index,
                    reason: e.to_string(),
                })?
                .into_modification(index)
        })
        .collect()
}
