//! # Anki Helper Common Library
//!
//! Shared code for the anki-helper workspace:
//! - Note data model (note/card identifiers, note snapshots, field updates)
//! - Common error type
//! - Configuration file model and discovery
//! - Compact duration parsing and formatting

pub mod config;
pub mod error;
pub mod human_time;
pub mod note;

pub use error::{Error, Result};
pub use note::{CardId, FieldUpdate, NoteData, NoteId};
