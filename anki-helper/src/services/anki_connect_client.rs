//! AnkiConnect client
//!
//! JSON-RPC style client for the AnkiConnect add-on. Every request is a POST
//! of `{"action": ..., "version": 6, "params": {...}}`; every response is
//! `{"result": ..., "error": null | "message"}`.
//!
//! Each request type names its action and result type statically through
//! [`ActionRequest`], so dispatch needs no runtime type inspection.
//!
//! Transport failures are retried with exponential backoff for idempotent
//! actions. `createModel` is sent exactly once.

use crate::config::AnkiConfig;
use crate::types::{NewNoteType, NoteStore, NoteStoreError};
use crate::utils::retry::{retry_with_backoff, RetryFailure, RetryPolicy};
use anki_helper_common::{CardId, FieldUpdate, NoteData, NoteId};
use base64::Engine;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const API_VERSION: u8 = 6;

/// Longest response body excerpt kept in errors
const MAX_ERROR_BODY: usize = 1000;

// ============================================================================
// Actions
// ============================================================================

/// AnkiConnect actions used by anki-helper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    FindNotes,
    FindCards,
    NotesInfo,
    UpdateNoteFields,
    AddTags,
    ModelNames,
    CreateModel,
    ChangeDeck,
    StoreMediaFile,
}

impl Action {
    /// Wire name of the action
    pub fn name(self) -> &'static str {
        match self {
            Action::FindNotes => "findNotes",
            Action::FindCards => "findCards",
            Action::NotesInfo => "notesInfo",
            Action::UpdateNoteFields => "updateNoteFields",
            Action::AddTags => "addTags",
            Action::ModelNames => "modelNames",
            Action::CreateModel => "createModel",
            Action::ChangeDeck => "changeDeck",
            Action::StoreMediaFile => "storeMediaFile",
        }
    }

    /// Whether a request may be repeated after a transport failure
    pub fn is_idempotent(self) -> bool {
        !matches!(self, Action::CreateModel)
    }
}

/// Params of one action together with the type of its result
pub trait ActionRequest: Serialize {
    const ACTION: Action;
    type Output: DeserializeOwned;
}

#[derive(Debug, Serialize)]
pub struct FindNotes<'a> {
    pub query: &'a str,
}

impl ActionRequest for FindNotes<'_> {
    const ACTION: Action = Action::FindNotes;
    type Output = Vec<NoteId>;
}

#[derive(Debug, Serialize)]
pub struct FindCards<'a> {
    pub query: &'a str,
}

impl ActionRequest for FindCards<'_> {
    const ACTION: Action = Action::FindCards;
    type Output = Vec<CardId>;
}

#[derive(Debug, Serialize)]
pub struct NotesInfo<'a> {
    pub notes: &'a [NoteId],
}

impl ActionRequest for NotesInfo<'_> {
    const ACTION: Action = Action::NotesInfo;
    type Output = Vec<NoteInfo>;
}

/// One `notesInfo` entry. Deleted notes come back as `{}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInfo {
    #[serde(default)]
    pub note_id: Option<NoteId>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fields: HashMap<String, NoteFieldValue>,
}

#[derive(Debug, Deserialize)]
pub struct NoteFieldValue {
    pub value: String,
    #[serde(default)]
    pub order: u32,
}

#[derive(Debug, Serialize)]
pub struct UpdateNoteFields {
    pub note: NoteFieldsUpdate,
}

#[derive(Debug, Serialize)]
pub struct NoteFieldsUpdate {
    pub id: NoteId,
    pub fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub audio: Vec<AudioAttachment>,
}

#[derive(Debug, Serialize)]
pub struct AudioAttachment {
    pub filename: String,
    pub data: String,
    pub fields: Vec<String>,
}

impl ActionRequest for UpdateNoteFields {
    const ACTION: Action = Action::UpdateNoteFields;
    type Output = ();
}

impl UpdateNoteFields {
    /// Build the request for a set of field updates.
    ///
    /// AnkiConnect sets plain values before attaching media, and attaching
    /// appends to the field. Audio fields are therefore cleared and then
    /// receive the attachment, so they end up containing only the new audio.
    pub fn new(note_id: NoteId, updates: BTreeMap<String, FieldUpdate>) -> Self {
        let mut fields = BTreeMap::new();
        let mut audio = Vec::new();
        for (field, update) in updates {
            match update {
                FieldUpdate::Value(value) => {
                    fields.insert(field, value);
                }
                FieldUpdate::Audio(bytes) => {
                    fields.insert(field.clone(), String::new());
                    audio.push(AudioAttachment {
                        filename: format!("{:x}.mp3", Sha256::digest(&bytes)),
                        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                        fields: vec![field],
                    });
                }
            }
        }

        Self {
            note: NoteFieldsUpdate {
                id: note_id,
                fields,
                audio,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AddTags<'a> {
    pub notes: &'a [NoteId],
    /// Space separated
    pub tags: String,
}

impl ActionRequest for AddTags<'_> {
    const ACTION: Action = Action::AddTags;
    type Output = ();
}

#[derive(Debug, Serialize)]
pub struct ModelNames {}

impl ActionRequest for ModelNames {
    const ACTION: Action = Action::ModelNames;
    type Output = Vec<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModel<'a> {
    pub model_name: &'a str,
    pub in_order_fields: &'a [String],
    pub css: &'a str,
    pub is_cloze: bool,
    pub card_templates: &'a [crate::types::CardTemplate],
}

impl ActionRequest for CreateModel<'_> {
    const ACTION: Action = Action::CreateModel;
    type Output = IgnoredAny;
}

#[derive(Debug, Serialize)]
pub struct ChangeDeck<'a> {
    pub deck: &'a str,
    pub cards: &'a [CardId],
}

impl ActionRequest for ChangeDeck<'_> {
    const ACTION: Action = Action::ChangeDeck;
    type Output = ();
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMediaFile<'a> {
    pub filename: &'a str,
    /// Base64 encoded content
    pub data: String,
    pub delete_existing: bool,
}

impl ActionRequest for StoreMediaFile<'_> {
    const ACTION: Action = Action::StoreMediaFile;
    type Output = IgnoredAny;
}

#[derive(Serialize)]
struct RequestEnvelope<'a, P> {
    action: Action,
    version: u8,
    params: &'a P,
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// AnkiConnect API client
pub struct AnkiConnectClient {
    http_client: reqwest::Client,
    url: reqwest::Url,
    log_requests: bool,
    retry_policy: RetryPolicy,
}

impl AnkiConnectClient {
    pub fn new(config: &AnkiConfig) -> Result<Self, NoteStoreError> {
        let url = reqwest::Url::parse(&config.connect_url)
            .map_err(|e| NoteStoreError::Network(format!("invalid AnkiConnect URL: {}", e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NoteStoreError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            url,
            log_requests: config.log_requests,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Replace the backoff policy used for idempotent actions
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Execute one action and decode its result
    pub async fn request<R: ActionRequest>(&self, params: &R) -> Result<R::Output, NoteStoreError> {
        let action = R::ACTION;
        let body = serde_json::to_vec(&RequestEnvelope {
            action,
            version: API_VERSION,
            params,
        })
        .map_err(|e| NoteStoreError::Parse(format!("failed to encode {} request: {}", action.name(), e)))?;

        let policy = if action.is_idempotent() {
            self.retry_policy
        } else {
            RetryPolicy::single_attempt()
        };

        let result = retry_with_backoff(
            action.name(),
            &policy,
            NoteStoreError::is_transient,
            || self.send_once(action, &body),
        )
        .await;

        let value = match result {
            Ok(value) => value,
            Err(RetryFailure { attempts, error }) if attempts > 1 && error.is_transient() => {
                return Err(NoteStoreError::RetriesExhausted {
                    action: action.name(),
                    attempts,
                    last: error.to_string(),
                });
            }
            Err(RetryFailure { error, .. }) => return Err(error),
        };

        serde_json::from_value(value)
            .map_err(|e| NoteStoreError::Parse(format!("malformed {} result: {}", action.name(), e)))
    }

    async fn send_once(&self, action: Action, body: &[u8]) -> Result<serde_json::Value, NoteStoreError> {
        if self.log_requests {
            debug!(
                action = action.name(),
                body = %String::from_utf8_lossy(body),
                "AnkiConnect request"
            );
        }

        let response = self
            .http_client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if self.log_requests {
            debug!(
                action = action.name(),
                status = status.as_u16(),
                body = %text,
                "AnkiConnect response"
            );
        }

        if !status.is_success() {
            return Err(NoteStoreError::Status(status.as_u16(), truncate(&text)));
        }

        let envelope: ResponseEnvelope = serde_json::from_str(&text)
            .map_err(|e| NoteStoreError::Parse(format!("malformed response envelope: {}", e)))?;
        if let Some(error) = envelope.error {
            return Err(NoteStoreError::Remote(error));
        }

        Ok(envelope.result)
    }
}

fn transport_error(e: reqwest::Error) -> NoteStoreError {
    if e.is_timeout() {
        NoteStoreError::Timeout(e.to_string())
    } else {
        NoteStoreError::Network(e.to_string())
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

#[async_trait::async_trait]
impl NoteStore for AnkiConnectClient {
    async fn find_notes(&self, filter: &str) -> Result<Vec<NoteId>, NoteStoreError> {
        self.request(&FindNotes { query: filter }).await
    }

    async fn find_cards(&self, filter: &str) -> Result<Vec<CardId>, NoteStoreError> {
        self.request(&FindCards { query: filter }).await
    }

    async fn fetch_notes(
        &self,
        note_ids: &[NoteId],
    ) -> Result<HashMap<NoteId, NoteData>, NoteStoreError> {
        if note_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let infos = self.request(&NotesInfo { notes: note_ids }).await?;

        Ok(infos
            .into_iter()
            .filter_map(|info| {
                let note_id = info.note_id?;
                let fields = info
                    .fields
                    .into_iter()
                    .map(|(name, field)| (name, field.value))
                    .collect();
                Some((note_id, NoteData::new(fields, info.tags)))
            })
            .collect())
    }

    async fn update_fields(
        &self,
        note_id: NoteId,
        fields: BTreeMap<String, FieldUpdate>,
    ) -> Result<(), NoteStoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        self.request(&UpdateNoteFields::new(note_id, fields)).await
    }

    async fn add_tags(&self, note_ids: &[NoteId], tags: &[String]) -> Result<(), NoteStoreError> {
        if note_ids.is_empty() || tags.is_empty() {
            return Ok(());
        }
        self.request(&AddTags {
            notes: note_ids,
            tags: tags.join(" "),
        })
        .await
    }

    async fn list_note_type_names(&self) -> Result<Vec<String>, NoteStoreError> {
        self.request(&ModelNames {}).await
    }

    async fn create_note_type(&self, note_type: &NewNoteType) -> Result<(), NoteStoreError> {
        self.request(&CreateModel {
            model_name: &note_type.name,
            in_order_fields: &note_type.fields,
            css: &note_type.css,
            is_cloze: false,
            card_templates: &note_type.card_templates,
        })
        .await
        .map(|_| ())
    }

    async fn change_deck(&self, deck_name: &str, card_ids: &[CardId]) -> Result<(), NoteStoreError> {
        if card_ids.is_empty() {
            return Ok(());
        }
        self.request(&ChangeDeck {
            deck: deck_name,
            cards: card_ids,
        })
        .await
    }

    async fn store_media_file(
        &self,
        file_name: &str,
        data: &[u8],
        overwrite: bool,
    ) -> Result<(), NoteStoreError> {
        self.request(&StoreMediaFile {
            filename: file_name,
            data: base64::engine::general_purpose::STANDARD.encode(data),
            delete_existing: overwrite,
        })
        .await
        .map(|_| ())
    }
}
