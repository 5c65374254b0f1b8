//! Text-to-speech generation
//!
//! Fills audio fields of notes with synthesized speech of their text fields:
//! 1. Expand the configured rules into (filter, text field, audio field)
//!    sources; a rule for a generated note type yields one source per voiced
//!    field of that type
//! 2. Find matching notes and derive one task per (note, text, audio field),
//!    applying the rule's text preprocessors
//! 3. Synthesize every distinct text exactly once
//! 4. Store the audio of each task in its note
//!
//! Synthesis and per-note update failures are counted and logged; only
//! discovery failures and missing text fields abort the stage.

use crate::config::{NoteType, TextPreprocessor, TtsRule, TtsSource};
use crate::error::{PipelineError, PipelineResult, StageContext};
use crate::types::{NoteStore, SpeechSynthesizer};
use anki_helper_common::{FieldUpdate, NoteId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Audio to generate for one field of one note
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TtsTask {
    pub note_id: NoteId,
    /// Preprocessed text to speak
    pub text: String,
    pub target_field: String,
}

/// Where to look for texts lacking audio
#[derive(Debug, Clone)]
pub struct TtsTaskSource<'a> {
    pub note_filter: String,
    pub text_field: String,
    pub audio_field: String,
    pub preprocessors: &'a [TextPreprocessor],
}

/// Counts reported after the stage
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TtsSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Expand rules into concrete task sources
pub fn expand_task_sources<'a>(
    rules: &'a [TtsRule],
    note_types: &[NoteType],
) -> PipelineResult<Vec<TtsTaskSource<'a>>> {
    let mut sources = Vec::new();
    for (i, rule) in rules.iter().enumerate() {
        match &rule.source {
            TtsSource::Fields {
                note_filter,
                text_field,
                audio_field,
            } => sources.push(TtsTaskSource {
                note_filter: note_filter.clone(),
                text_field: text_field.clone(),
                audio_field: audio_field.clone(),
                preprocessors: &rule.preprocessors,
            }),
            TtsSource::GeneratedNoteType(type_name) => {
                let note_type = note_types
                    .iter()
                    .find(|t| &t.name == type_name)
                    .ok_or_else(|| {
                        PipelineError::Config(format!(
                            "broken generated note type reference {:?} in tts #{}",
                            type_name,
                            i + 1
                        ))
                    })?;

                for field in &note_type.fields {
                    let Some(voiceover) = field.voiceover_field() else {
                        continue;
                    };
                    sources.push(TtsTaskSource {
                        note_filter: format!(
                            "\"note:{}\" \"{}:_*\" \"{}:\"",
                            type_name, field.name, voiceover
                        ),
                        text_field: field.name.clone(),
                        audio_field: voiceover,
                        preprocessors: &rule.preprocessors,
                    });
                }
            }
        }
    }
    Ok(sources)
}

/// Generates speech audio through a synthesizer and stores it in notes
pub struct TtsGenerator {
    store: Arc<dyn NoteStore>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl TtsGenerator {
    pub fn new(store: Arc<dyn NoteStore>, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { store, synthesizer }
    }

    pub async fn run(&self, rules: &[TtsRule], note_types: &[NoteType]) -> PipelineResult<TtsSummary> {
        if rules.is_empty() {
            return Ok(TtsSummary::default());
        }

        info!("Generating text-to-speech...");
        let sources = expand_task_sources(rules, note_types)?;
        let tasks = self.find_tasks(&sources).await?;
        if tasks.is_empty() {
            info!("No text to generate speech for found, skipping text-to-speech generation");
            return Ok(TtsSummary::default());
        }

        let texts: BTreeSet<String> = tasks.iter().map(|task| task.text.clone()).collect();
        info!(
            "Synthesizing {} distinct texts for {} fields",
            texts.len(),
            tasks.len()
        );
        let speech = self.synthesizer.synthesize(&texts).await;

        let mut summary = TtsSummary::default();
        for task in &tasks {
            let audio = match speech.get(&task.text) {
                Some(Ok(audio)) => audio,
                Some(Err(e)) => {
                    warn!(
                        note_id = %task.note_id,
                        field = %task.target_field,
                        "Skipping field due to text-to-speech error: {}",
                        e
                    );
                    summary.failed += 1;
                    continue;
                }
                None => {
                    warn!(
                        note_id = %task.note_id,
                        field = %task.target_field,
                        "Skipping field, synthesizer returned no result for its text"
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            let update = BTreeMap::from([(task.target_field.clone(), FieldUpdate::Audio(audio.clone()))]);
            match self.store.update_fields(task.note_id, update).await {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    warn!(
                        note_id = %task.note_id,
                        field = %task.target_field,
                        "Failed to store generated audio: {}",
                        e
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Finished text-to-speech generation (succeeded/failed): {}/{}",
            summary.succeeded, summary.failed
        );
        Ok(summary)
    }

    /// Collect tasks from every source, deduplicated
    pub async fn find_tasks(&self, sources: &[TtsTaskSource<'_>]) -> PipelineResult<BTreeSet<TtsTask>> {
        let mut tasks = BTreeSet::new();
        for (i, source) in sources.iter().enumerate() {
            self.collect_source_tasks(source, &mut tasks)
                .await
                .in_stage("find notes for text-to-speech source", i)?;
        }
        Ok(tasks)
    }

    async fn collect_source_tasks(
        &self,
        source: &TtsTaskSource<'_>,
        tasks: &mut BTreeSet<TtsTask>,
    ) -> PipelineResult<()> {
        let note_ids = self.store.find_notes(&source.note_filter).await?;
        let notes = self.store.fetch_notes(&note_ids).await?;

        for (note_id, note) in notes {
            let text = note
                .field(&source.text_field)
                .ok_or_else(|| PipelineError::MissingField {
                    note_id,
                    field: source.text_field.clone(),
                })?;
            let text = source
                .preprocessors
                .iter()
                .fold(text.to_string(), |text, preprocessor| preprocessor.process(&text));

            tasks.insert(TtsTask {
                note_id,
                text,
                target_field: source.audio_field.clone(),
            });
        }
        Ok(())
    }
}
