//! Test Helper Utilities
//!
//! In-memory collaborators for the workflow stages. Each test constructs its
//! own instances; nothing is shared between tests.

#![allow(dead_code)]

pub mod executor;
pub mod note_store;
pub mod synthesizer;

pub use executor::ScriptedExecutor;
pub use note_store::{RecordingNoteStore, StoreCall};
pub use synthesizer::FakeSynthesizer;

use anki_helper_common::NoteData;
use std::collections::HashMap;

/// Build a note snapshot from field pairs and tags
pub fn note(fields: &[(&str, &str)], tags: &[&str]) -> NoteData {
    NoteData::new(
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        tags.iter().map(|t| t.to_string()),
    )
}
