//! Pipeline runner
//!
//! Executes the actions of one configuration file in a fixed order:
//! 1. Media upload
//! 2. Note type provisioning
//! 3. Note processing
//! 4. Text-to-speech generation
//! 5. Card organization
//!
//! The first stage error aborts the run. A configuration file listing
//! `runConfigs` is a run list: all listed files are loaded and validated
//! first, then run in order under the same policy. The list's own actions
//! are ignored.

use crate::config::{Actions, Config};
use crate::error::{PipelineError, PipelineResult};
use crate::services::{AnkiConnectClient, AzureTtsClient};
use crate::types::{NoteStore, SpeechSynthesizer};
use crate::utils::process_runner::{ProcessRunner, ScriptExecutor};
use crate::workflow::card_organizer::CardOrganizer;
use crate::workflow::media_uploader::MediaUploader;
use crate::workflow::note_processor::NoteProcessor;
use crate::workflow::note_type_provisioner::NoteTypeProvisioner;
use crate::workflow::tts_generator::TtsGenerator;
use anki_helper_common::config::{load_config_file, resolve_relative};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deepest accepted nesting of run lists
pub const MAX_RUN_LIST_DEPTH: usize = 16;

/// Stage runner bound to its collaborators
pub struct Pipeline {
    store: Arc<dyn NoteStore>,
    executor: Arc<dyn ScriptExecutor>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn NoteStore>, executor: Arc<dyn ScriptExecutor>) -> Self {
        Self {
            store,
            executor,
            synthesizer: None,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Build production clients for a validated configuration
    pub fn from_config(config: &Config, cancel: CancellationToken) -> PipelineResult<Self> {
        let store = AnkiConnectClient::new(&config.anki)?;
        let mut pipeline = Self::new(
            Arc::new(store),
            Arc::new(ProcessRunner::with_cancellation(cancel)),
        );

        if let Some(azure) = &config.azure {
            let synthesizer = AzureTtsClient::new(azure).map_err(|e| {
                PipelineError::Config(format!("failed to create text-to-speech client: {}", e))
            })?;
            pipeline = pipeline.with_synthesizer(Arc::new(synthesizer));
        }
        Ok(pipeline)
    }

    /// Run every stage in order
    pub async fn run(&self, actions: &Actions) -> PipelineResult<()> {
        if actions.is_empty() {
            warn!("No actions configured, nothing to do");
            return Ok(());
        }

        MediaUploader::new(self.store.clone())
            .run(&actions.upload_media)
            .await?;

        NoteTypeProvisioner::new(self.store.clone())
            .run(&actions.note_types)
            .await?;

        NoteProcessor::new(self.store.clone(), self.executor.clone())
            .run(&actions.note_processing)
            .await?;

        if !actions.tts.is_empty() {
            let synthesizer = self.synthesizer.clone().ok_or_else(|| {
                PipelineError::Config(
                    "text-to-speech actions require an azure section".to_string(),
                )
            })?;
            TtsGenerator::new(self.store.clone(), synthesizer)
                .run(&actions.tts, &actions.note_types)
                .await?;
        }

        CardOrganizer::new(self.store.clone())
            .run(&actions.cards_organization)
            .await?;

        Ok(())
    }
}

/// Load a configuration file and every file its run lists name
///
/// Run lists are expanded depth-first, so the result holds the runnable
/// configurations in execution order. Every file is validated before any
/// of them runs.
pub fn load_run_list(path: &Path) -> PipelineResult<Vec<Config>> {
    let mut configs = Vec::new();
    let mut pending: Vec<(PathBuf, usize)> = vec![(path.to_path_buf(), 0)];

    while let Some((path, depth)) = pending.pop() {
        let loaded = load_config_file(&path)?;

        if loaded.file.run_configs.is_empty() {
            debug!("Loaded config file {}", loaded.path.display());
            configs.push(Config::from_loaded(&loaded)?);
            continue;
        }

        if depth >= MAX_RUN_LIST_DEPTH {
            return Err(PipelineError::Config(format!(
                "run lists nested deeper than {} levels at {}",
                MAX_RUN_LIST_DEPTH,
                loaded.path.display()
            )));
        }
        // Reverse so the first listed file is popped first
        for entry in loaded.file.run_configs.iter().rev() {
            pending.push((resolve_relative(&loaded.base_dir, entry), depth + 1));
        }
    }

    Ok(configs)
}

/// Run a configuration file, expanding run lists depth-first
pub async fn run_config_file(path: &Path, cancel: CancellationToken) -> PipelineResult<()> {
    let configs = load_run_list(path)?;
    info!("Loaded {} config file(s)", configs.len());

    let pipelines = configs
        .iter()
        .map(|config| Pipeline::from_config(config, cancel.clone()))
        .collect::<PipelineResult<Vec<_>>>()?;

    for (config, pipeline) in configs.iter().zip(&pipelines) {
        if cancel.is_cancelled() {
            return Err(PipelineError::Config("run cancelled".to_string()));
        }

        info!("Running config file {}", config.source.display());
        pipeline.run(&config.actions).await?;
    }

    Ok(())
}
