//! Note processing rule engine
//!
//! For every configured rule:
//! 1. Find the notes matching the rule's filter and fetch their snapshots
//! 2. For each note, in ascending note ID order:
//!    - wait for the rule's pacing gate
//!    - render the script arguments and stdin from the note
//!    - run the script and parse its output into modifications
//!    - aggregate the modifications and submit at most one field update and
//!      one tag addition for the note
//!
//! # Error Handling
//! - Discovery, fetch, template rendering and note store mutation failures
//!   abort the rule
//! - Script failures (spawn, exit status, timeout, malformed output) skip
//!   the note; the rule continues with the next one

use crate::config::{ExecArg, NoteProcessingRule};
use crate::error::{PipelineResult, StageContext};
use crate::types::NoteStore;
use crate::utils::pacing::PacingGate;
use crate::utils::process_runner::{ProcessParams, ScriptExecutor};
use crate::workflow::arg_template::TemplateError;
use crate::workflow::script_protocol::{parse_script_output, Modification};
use anki_helper_common::{FieldUpdate, NoteData, NoteId};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Counts reported after a rule
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RuleSummary {
    /// Notes matching the filter
    pub discovered: usize,
    /// Notes whose script ran and whose changes were submitted
    pub succeeded: usize,
    /// Notes skipped because of a script failure
    pub failed: usize,
}

impl RuleSummary {
    /// Notes whose script was run, whatever the outcome
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Changes for one note aggregated from a script's modifications
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NoteChanges {
    pub fields: BTreeMap<String, FieldUpdate>,
    /// Tags to add, deduplicated, in first-seen order
    pub tags: Vec<String>,
}

impl NoteChanges {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.tags.is_empty()
    }
}

/// Aggregate modifications against the note's fetched snapshot.
///
/// - `SetField`: later values for the same field win
/// - `SetFieldIfEmpty`: applies only when the snapshot's value is empty, and
///   only the first occurrence per field counts
/// - `AddTag`: duplicates are dropped
pub fn aggregate_modifications(snapshot: &NoteData, modifications: &[Modification]) -> NoteChanges {
    let mut changes = NoteChanges::default();
    let mut claimed_if_empty = HashSet::new();

    for modification in modifications {
        match modification {
            Modification::SetField(fields) => {
                for (field, value) in fields {
                    changes
                        .fields
                        .insert(field.clone(), FieldUpdate::Value(value.clone()));
                }
            }
            Modification::SetFieldIfEmpty(fields) => {
                for (field, value) in fields {
                    if claimed_if_empty.insert(field.as_str()) && snapshot.is_field_empty(field) {
                        changes
                            .fields
                            .insert(field.clone(), FieldUpdate::Value(value.clone()));
                    }
                }
            }
            Modification::AddTag(tag) => {
                if !changes.tags.contains(tag) {
                    changes.tags.push(tag.clone());
                }
            }
        }
    }

    changes
}

/// Render the process parameters of a rule for one note
pub fn build_process_params(
    rule: &NoteProcessingRule,
    note: &NoteData,
) -> Result<ProcessParams, TemplateError> {
    let render = |arg: &ExecArg| match arg {
        ExecArg::Plain(text) => Ok(text.clone()),
        ExecArg::Template(template) => template.render(note),
    };

    Ok(ProcessParams {
        command: rule.exec.command.clone(),
        args: rule.exec.args.iter().map(render).collect::<Result<_, _>>()?,
        stdin: rule.exec.stdin.as_ref().map(render).transpose()?,
        env: rule.exec.env.clone(),
    })
}

/// Runs note processing rules against a note store
pub struct NoteProcessor {
    store: Arc<dyn NoteStore>,
    executor: Arc<dyn ScriptExecutor>,
}

impl NoteProcessor {
    pub fn new(store: Arc<dyn NoteStore>, executor: Arc<dyn ScriptExecutor>) -> Self {
        Self { store, executor }
    }

    /// Apply all rules in order, stopping at the first rule-fatal error
    pub async fn run(&self, rules: &[NoteProcessingRule]) -> PipelineResult<()> {
        if rules.is_empty() {
            return Ok(());
        }

        info!("Processing notes...");
        for (i, rule) in rules.iter().enumerate() {
            info!("Running note processing rule #{}...", i + 1);
            let summary = self
                .apply_rule(rule)
                .await
                .in_stage("apply note processing rule", i)?;
            info!(
                discovered = summary.discovered,
                processed = summary.processed(),
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Finished note processing rule #{} (succeeded/failed): {}/{}",
                i + 1,
                summary.succeeded,
                summary.failed
            );
        }
        Ok(())
    }

    pub async fn apply_rule(&self, rule: &NoteProcessingRule) -> PipelineResult<RuleSummary> {
        let note_ids = self.store.find_notes(&rule.note_filter).await?;
        let mut notes: Vec<(NoteId, NoteData)> =
            self.store.fetch_notes(&note_ids).await?.into_iter().collect();
        notes.sort_by_key(|(note_id, _)| *note_id);

        let mut summary = RuleSummary {
            discovered: notes.len(),
            ..Default::default()
        };
        info!("Found {} notes to process", notes.len());

        let mut gate = PacingGate::new(rule.min_pause_between_executions);
        for (i, (note_id, note)) in notes.iter().enumerate() {
            gate.acquire().await;

            let params = build_process_params(rule, note)?;
            info!(
                "Executing note processing command [{}/{}]: {}",
                i + 1,
                notes.len(),
                params.display_command_line()
            );

            let stdout = match self.executor.execute(&params, rule.timeout).await {
                Ok(stdout) => stdout,
                Err(e) => {
                    warn!(note_id = %note_id, "Failed to process note: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };
            let modifications = match parse_script_output(&stdout) {
                Ok(modifications) => modifications,
                Err(e) => {
                    warn!(note_id = %note_id, "Failed to process note: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };

            let changes = aggregate_modifications(note, &modifications);
            self.submit(*note_id, changes).await?;
            summary.succeeded += 1;
        }

        Ok(summary)
    }

    async fn submit(&self, note_id: NoteId, changes: NoteChanges) -> PipelineResult<()> {
        if !changes.fields.is_empty() {
            self.store.update_fields(note_id, changes.fields).await?;
        }
        if !changes.tags.is_empty() {
            self.store.add_tags(&[note_id], &changes.tags).await?;
        }
        Ok(())
    }
}
