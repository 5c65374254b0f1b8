//! Note type provisioning
//!
//! Creates the configured note types that do not exist yet. Existing types
//! are left untouched. Creation is not idempotent and is never retried.

use crate::config::{validate_name, CardTemplateSpec, NoteField, NoteType};
use crate::error::{PipelineError, PipelineResult, StageContext};
use crate::types::{CardTemplate, NewNoteType, NoteStore};
use crate::workflow::card_template::{substitute_variables, CardTemplateError};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Counts reported after the stage
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningSummary {
    pub created: usize,
    pub skipped: usize,
}

/// Field list of a note type: configured fields in order, then one
/// voiceover field per voiced field
pub fn field_names(note_type: &NoteType) -> Vec<String> {
    note_type
        .fields
        .iter()
        .map(|field| field.name.clone())
        .chain(note_type.fields.iter().filter_map(NoteField::voiceover_field))
        .collect()
}

/// Card templates of a note type, one per (template, field) pair
pub fn card_templates(note_type: &NoteType) -> PipelineResult<Vec<CardTemplate>> {
    let mut templates = Vec::new();
    for (i, spec) in note_type.templates.iter().enumerate() {
        for field_name in &spec.for_fields {
            let field = note_type.field(field_name).ok_or_else(|| {
                PipelineError::Config(format!(
                    "card template #{} refers to unknown field {:?}",
                    i + 1,
                    field_name
                ))
            })?;
            templates.push(render_card_template(spec, field)?);
        }
    }
    Ok(templates)
}

fn render_card_template(spec: &CardTemplateSpec, field: &NoteField) -> PipelineResult<CardTemplate> {
    let mut vars: BTreeMap<String, String> = field.vars.clone();
    vars.insert("Field".to_string(), field.name.clone());
    if let Some(voiceover) = field.voiceover_field() {
        vars.insert("FieldVoiceover".to_string(), voiceover);
    }

    let name = substitute_variables(&spec.name, &vars)?;
    if validate_name(&name).is_err() {
        return Err(CardTemplateError::InvalidName(name).into());
    }
    let front = substitute_variables(&spec.front, &vars)?;
    let back = substitute_variables(&spec.back, &vars)?;

    Ok(CardTemplate {
        name,
        front: format!("{{{{#{0}}}}}\n{1}\n{{{{/{0}}}}}", field.name, front),
        back,
    })
}

/// Full definition sent to the note store
pub fn new_note_type(note_type: &NoteType) -> PipelineResult<NewNoteType> {
    Ok(NewNoteType {
        name: note_type.name.clone(),
        fields: field_names(note_type),
        css: note_type.css.clone(),
        card_templates: card_templates(note_type)?,
    })
}

/// Creates missing note types
pub struct NoteTypeProvisioner {
    store: Arc<dyn NoteStore>,
}

impl NoteTypeProvisioner {
    pub fn new(store: Arc<dyn NoteStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, note_types: &[NoteType]) -> PipelineResult<ProvisioningSummary> {
        if note_types.is_empty() {
            info!("No note types defined in the configuration, skipping note type creation");
            return Ok(ProvisioningSummary::default());
        }

        info!("Ensuring note types...");
        let existing: HashSet<String> = self.store.list_note_type_names().await?.into_iter().collect();

        let mut summary = ProvisioningSummary::default();
        for (i, note_type) in note_types.iter().enumerate() {
            if existing.contains(&note_type.name) {
                info!("Note type {:?} already exists, skipping its creation", note_type.name);
                summary.skipped += 1;
                continue;
            }

            let definition = new_note_type(note_type).in_stage("create note type", i)?;
            self.store
                .create_note_type(&definition)
                .await
                .in_stage("create note type", i)?;
            info!(
                "Created note type {:?} with {} fields and {} card templates",
                definition.name,
                definition.fields.len(),
                definition.card_templates.len()
            );
            summary.created += 1;
        }

        info!(
            "Finished note type creation (created/skipped): {}/{}",
            summary.created, summary.skipped
        );
        Ok(summary)
    }
}
