//! Workflow stages
//!
//! Each stage consumes one section of the configured actions and talks to
//! the outside world only through the collaborator traits in
//! [`crate::types`] and [`crate::utils::process_runner::ScriptExecutor`].

pub mod arg_template;
pub mod card_organizer;
pub mod card_template;
pub mod media_uploader;
pub mod note_processor;
pub mod note_type_provisioner;
pub mod pipeline;
pub mod script_protocol;
pub mod tts_generator;

pub use card_organizer::CardOrganizer;
pub use media_uploader::MediaUploader;
pub use note_processor::{NoteProcessor, RuleSummary};
pub use note_type_provisioner::{NoteTypeProvisioner, ProvisioningSummary};
pub use pipeline::{load_run_list, run_config_file, Pipeline};
pub use tts_generator::{TtsGenerator, TtsSummary};
