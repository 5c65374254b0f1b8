//! Recording note store
//!
//! Serves notes, cards and note types from memory and records every call in
//! order. Individual actions or note updates can be made to fail.

use anki_helper::types::{NewNoteType, NoteStore, NoteStoreError};
use anki_helper_common::{CardId, FieldUpdate, NoteData, NoteId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// A call received by the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    FindNotes(String),
    FindCards(String),
    FetchNotes(Vec<NoteId>),
    UpdateFields(NoteId, BTreeMap<String, FieldUpdate>),
    AddTags(Vec<NoteId>, Vec<String>),
    ListNoteTypeNames,
    CreateNoteType(NewNoteType),
    ChangeDeck(String, Vec<CardId>),
    StoreMediaFile(String, Vec<u8>, bool),
}

impl StoreCall {
    /// Action name as used by AnkiConnect
    pub fn action(&self) -> &'static str {
        match self {
            StoreCall::FindNotes(_) => "findNotes",
            StoreCall::FindCards(_) => "findCards",
            StoreCall::FetchNotes(_) => "notesInfo",
            StoreCall::UpdateFields(..) => "updateNoteFields",
            StoreCall::AddTags(..) => "addTags",
            StoreCall::ListNoteTypeNames => "modelNames",
            StoreCall::CreateNoteType(_) => "createModel",
            StoreCall::ChangeDeck(..) => "changeDeck",
            StoreCall::StoreMediaFile(..) => "storeMediaFile",
        }
    }
}

#[derive(Default)]
pub struct RecordingNoteStore {
    notes: HashMap<NoteId, NoteData>,
    note_filters: HashMap<String, Vec<NoteId>>,
    card_filters: HashMap<String, Vec<CardId>>,
    note_types: Vec<String>,
    failing_actions: HashSet<&'static str>,
    failing_updates: HashSet<NoteId>,
    calls: Mutex<Vec<StoreCall>>,
}

impl RecordingNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_note(mut self, note_id: i64, note: NoteData) -> Self {
        self.notes.insert(NoteId(note_id), note);
        self
    }

    /// Notes returned by `find_notes(filter)`, in the given order
    pub fn with_note_filter(mut self, filter: &str, note_ids: &[i64]) -> Self {
        self.note_filters
            .insert(filter.to_string(), note_ids.iter().copied().map(NoteId).collect());
        self
    }

    pub fn with_card_filter(mut self, filter: &str, card_ids: &[i64]) -> Self {
        self.card_filters
            .insert(filter.to_string(), card_ids.iter().copied().map(CardId).collect());
        self
    }

    pub fn with_note_types(mut self, names: &[&str]) -> Self {
        self.note_types = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Every call of the named action fails with a remote error
    pub fn failing_action(mut self, action: &'static str) -> Self {
        self.failing_actions.insert(action);
        self
    }

    /// Field updates of this note fail with a remote error
    pub fn failing_update(mut self, note_id: i64) -> Self {
        self.failing_updates.insert(NoteId(note_id));
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Names of the actions called, in order
    pub fn actions(&self) -> Vec<&'static str> {
        self.calls().iter().map(StoreCall::action).collect()
    }

    pub fn field_updates(&self) -> Vec<(NoteId, BTreeMap<String, FieldUpdate>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::UpdateFields(id, fields) => Some((id, fields)),
                _ => None,
            })
            .collect()
    }

    pub fn tag_additions(&self) -> Vec<(Vec<NoteId>, Vec<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::AddTags(ids, tags) => Some((ids, tags)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: StoreCall) -> Result<(), NoteStoreError> {
        let action = call.action();
        let failing_update = matches!(&call, StoreCall::UpdateFields(id, _) if self.failing_updates.contains(id));
        self.calls.lock().unwrap().push(call);

        if self.failing_actions.contains(action) || failing_update {
            return Err(NoteStoreError::Remote(format!("{} rejected", action)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl NoteStore for RecordingNoteStore {
    async fn find_notes(&self, filter: &str) -> Result<Vec<NoteId>, NoteStoreError> {
        self.record(StoreCall::FindNotes(filter.to_string()))?;
        Ok(self.note_filters.get(filter).cloned().unwrap_or_default())
    }

    async fn find_cards(&self, filter: &str) -> Result<Vec<CardId>, NoteStoreError> {
        self.record(StoreCall::FindCards(filter.to_string()))?;
        Ok(self.card_filters.get(filter).cloned().unwrap_or_default())
    }

    async fn fetch_notes(
        &self,
        note_ids: &[NoteId],
    ) -> Result<HashMap<NoteId, NoteData>, NoteStoreError> {
        self.record(StoreCall::FetchNotes(note_ids.to_vec()))?;
        Ok(note_ids
            .iter()
            .filter_map(|id| self.notes.get(id).map(|note| (*id, note.clone())))
            .collect())
    }

    async fn update_fields(
        &self,
        note_id: NoteId,
        fields: BTreeMap<String, FieldUpdate>,
    ) -> Result<(), NoteStoreError> {
        self.record(StoreCall::UpdateFields(note_id, fields))
    }

    async fn add_tags(&self, note_ids: &[NoteId], tags: &[String]) -> Result<(), NoteStoreError> {
        self.record(StoreCall::AddTags(note_ids.to_vec(), tags.to_vec()))
    }

    async fn list_note_type_names(&self) -> Result<Vec<String>, NoteStoreError> {
        self.record(StoreCall::ListNoteTypeNames)?;
        Ok(self.note_types.clone())
    }

    async fn create_note_type(&self, note_type: &NewNoteType) -> Result<(), NoteStoreError> {
        self.record(StoreCall::CreateNoteType(note_type.clone()))
    }

    async fn change_deck(&self, deck_name: &str, card_ids: &[CardId]) -> Result<(), NoteStoreError> {
        self.record(StoreCall::ChangeDeck(deck_name.to_string(), card_ids.to_vec()))
    }

    async fn store_media_file(
        &self,
        file_name: &str,
        data: &[u8],
        overwrite: bool,
    ) -> Result<(), NoteStoreError> {
        self.record(StoreCall::StoreMediaFile(file_name.to_string(), data.to_vec(), overwrite))
    }
}
