//! Error types for anki-helper
//!
//! Per-note and per-text failures (script errors, synthesis errors) are
//! logged and counted by the stages themselves. Everything that reaches
//! [`PipelineError`] is fatal for the current rule and aborts the run.

use crate::types::NoteStoreError;
use crate::workflow::arg_template::TemplateError;
use crate::workflow::card_template::CardTemplateError;
use anki_helper_common::NoteId;
use thiserror::Error;

/// Stage-level error
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration detected at load time
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] anki_helper_common::Error),

    #[error("Note store request failed: {0}")]
    NoteStore(#[from] NoteStoreError),

    #[error("Failed to render script arguments: {0}")]
    Template(#[from] TemplateError),

    #[error("Failed to render card template: {0}")]
    CardTemplate(#[from] CardTemplateError),

    /// A field the stage reads is absent from a fetched note
    #[error("Note {note_id} has no field {field:?}")]
    MissingField { note_id: NoteId, field: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error decorated with the failing stage and 1-based rule number
    #[error("failed to {stage} #{}: {source}", .index + 1)]
    Stage {
        stage: &'static str,
        index: usize,
        source: Box<PipelineError>,
    },
}

/// Result type alias for pipeline stages
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Decorate with the stage name and zero-based rule index
    pub fn in_stage(self, stage: &'static str, index: usize) -> Self {
        PipelineError::Stage {
            stage,
            index,
            source: Box::new(self),
        }
    }
}

/// `.in_stage(..)` on results
pub trait StageContext<T> {
    fn in_stage(self, stage: &'static str, index: usize) -> PipelineResult<T>;
}

impl<T, E> StageContext<T> for std::result::Result<T, E>
where
    E: Into<PipelineError>,
{
    fn in_stage(self, stage: &'static str, index: usize) -> PipelineResult<T> {
        self.map_err(|e| e.into().in_stage(stage, index))
    }
}
