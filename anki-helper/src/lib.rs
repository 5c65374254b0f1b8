//! anki-helper library interface
//!
//! Exposes the configuration model, collaborator seams, wire clients and
//! workflow stages for the binary and for integration testing.

pub mod config;
pub mod error;
pub mod services;
pub mod types;
pub mod utils;
pub mod workflow;

pub use crate::config::Config;
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::types::{NoteStore, NoteStoreError, SpeechError, SpeechSynthesizer};
pub use crate::workflow::{load_run_list, run_config_file, Pipeline};
