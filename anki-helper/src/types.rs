//! Collaborator Seams
//!
//! The workflow stages talk to the outside world only through the traits in
//! this module:
//! - [`NoteStore`]: the flashcard application (AnkiConnect in production)
//! - [`SpeechSynthesizer`]: bulk text-to-speech (Azure in production)
//!
//! Tests substitute in-memory implementations constructed per test.

use anki_helper_common::{CardId, FieldUpdate, NoteData, NoteId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

// ============================================================================
// Note Store
// ============================================================================

/// Note store errors
#[derive(Debug, Error)]
pub enum NoteStoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Bad response status {0}: {1}")]
    Status(u16, String),

    /// Error reported by the note store itself
    #[error("AnkiConnect error: {0}")]
    Remote(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Action {action} failed after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        action: &'static str,
        attempts: u32,
        last: String,
    },
}

impl NoteStoreError {
    /// Transport-level failures that are safe to retry for idempotent actions
    pub fn is_transient(&self) -> bool {
        matches!(self, NoteStoreError::Network(_) | NoteStoreError::Timeout(_))
    }
}

/// Card template of a note type being created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardTemplate {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Front")]
    pub front: String,
    #[serde(rename = "Back")]
    pub back: String,
}

/// Definition of a note type to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNoteType {
    pub name: String,
    /// Field names in display order
    pub fields: Vec<String>,
    pub css: String,
    pub card_templates: Vec<CardTemplate>,
}

/// Flashcard note store
///
/// Mirrors the fixed action vocabulary of the flashcard application. Empty
/// inputs are valid and must not fail.
#[async_trait::async_trait]
pub trait NoteStore: Send + Sync {
    /// Find notes matching a search filter
    async fn find_notes(&self, filter: &str) -> Result<Vec<NoteId>, NoteStoreError>;

    /// Find cards matching a search filter
    async fn find_cards(&self, filter: &str) -> Result<Vec<CardId>, NoteStoreError>;

    /// Fetch snapshots of the given notes; unknown IDs are omitted
    async fn fetch_notes(
        &self,
        note_ids: &[NoteId],
    ) -> Result<HashMap<NoteId, NoteData>, NoteStoreError>;

    /// Update several fields of one note in a single request
    async fn update_fields(
        &self,
        note_id: NoteId,
        fields: BTreeMap<String, FieldUpdate>,
    ) -> Result<(), NoteStoreError>;

    /// Add tags to notes
    async fn add_tags(&self, note_ids: &[NoteId], tags: &[String]) -> Result<(), NoteStoreError>;

    /// Names of all existing note types
    async fn list_note_type_names(&self) -> Result<Vec<String>, NoteStoreError>;

    /// Create a note type. Not idempotent: never retried.
    async fn create_note_type(&self, note_type: &NewNoteType) -> Result<(), NoteStoreError>;

    /// Move cards to a deck
    async fn change_deck(&self, deck_name: &str, card_ids: &[CardId]) -> Result<(), NoteStoreError>;

    /// Store a file in the media folder
    async fn store_media_file(
        &self,
        file_name: &str,
        data: &[u8],
        overwrite: bool,
    ) -> Result<(), NoteStoreError>;
}

// ============================================================================
// Speech Synthesis
// ============================================================================

/// Speech synthesis errors (per text)
#[derive(Debug, Clone, Error)]
pub enum SpeechError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Text-to-speech request timed out")]
    Timeout,

    #[error("Too many requests")]
    TooManyRequests,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result of synthesizing one text
pub type SpeechResult = Result<Vec<u8>, SpeechError>;

/// Bulk text-to-speech
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize every text. A failure for one text must not affect others:
    /// the returned map holds one entry per input text.
    async fn synthesize(&self, texts: &BTreeSet<String>) -> BTreeMap<String, SpeechResult>;
}
