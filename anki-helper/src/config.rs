//! Typed runtime configuration for anki-helper
//!
//! Converts the raw file model from `anki_helper_common::config` into
//! validated settings: durations parsed, defaults applied, relative paths
//! resolved against the configuration file's directory, argument templates
//! and regular expressions compiled. Every problem found here is a
//! configuration error reported before any stage runs.

use crate::workflow::arg_template::ArgTemplate;
use anki_helper_common::config::{
    resolve_relative, ActionsSection, AnkiSection, AzureSection, CardTemplateEntry,
    CardsOrganizationEntry, ConfigFile, ExecEntry, LoadedConfig, NoteFieldEntry,
    NoteProcessingEntry, NoteTypeEntry, TextPreprocessingEntry, TtsEntry, UploadMediaEntry,
};
use anki_helper_common::human_time::parse_duration;
use anki_helper_common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_ANKI_CONNECT_URL: &str = "http://localhost:8765";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_AZURE_MIN_PAUSE: Duration = Duration::from_secs(1);
pub const DEFAULT_AZURE_MAX_RETRIES: u32 = 5;

/// Suffix of generated audio fields
pub const VOICEOVER_SUFFIX: &str = "Voiceover";

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("valid name regex"));

/// Check that a note type, field or card template name is an identifier
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "malformed name, expected a valid identifier but got {:?}",
            name
        )))
    }
}

// ============================================================================
// Typed configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    /// File this configuration was loaded from
    pub source: PathBuf,
    pub anki: AnkiConfig,
    /// Present whenever text-to-speech actions are configured
    pub azure: Option<AzureConfig>,
    pub actions: Actions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnkiConfig {
    pub connect_url: String,
    pub request_timeout: Duration,
    pub log_requests: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    pub api_key: String,
    pub endpoint_url: String,
    pub voice: String,
    /// `xml:lang` of synthesized speech, e.g. `de-DE`
    pub language: String,
    pub request_timeout: Duration,
    pub min_pause_between_requests: Duration,
    pub log_requests: bool,
    pub retry_on_too_many_requests: bool,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Actions {
    pub upload_media: Vec<UploadMedia>,
    pub note_types: Vec<NoteType>,
    pub note_processing: Vec<NoteProcessingRule>,
    pub tts: Vec<TtsRule>,
    pub cards_organization: Vec<OrganizationRule>,
}

impl Actions {
    pub fn is_empty(&self) -> bool {
        self.upload_media.is_empty()
            && self.note_types.is_empty()
            && self.note_processing.is_empty()
            && self.tts.is_empty()
            && self.cards_organization.is_empty()
    }
}

/// File copied into the media folder under `anki_name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMedia {
    pub anki_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteType {
    pub name: String,
    pub css: String,
    pub fields: Vec<NoteField>,
    pub templates: Vec<CardTemplateSpec>,
}

impl NoteType {
    pub fn field(&self, name: &str) -> Option<&NoteField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteField {
    pub name: String,
    pub skip_voiceover: bool,
    /// Extra `$VAR$` substitutions for card templates generated for this field
    pub vars: BTreeMap<String, String>,
}

impl NoteField {
    /// Name of the generated audio field, unless voiceover is skipped
    pub fn voiceover_field(&self) -> Option<String> {
        (!self.skip_voiceover).then(|| format!("{}{}", self.name, VOICEOVER_SUFFIX))
    }
}

/// Card template instantiated once per field in `for_fields`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardTemplateSpec {
    pub name: String,
    pub for_fields: Vec<String>,
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteProcessingRule {
    pub note_filter: String,
    pub min_pause_between_executions: Duration,
    /// `None` means no deadline
    pub timeout: Option<Duration>,
    pub exec: ExecSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: String,
    pub args: Vec<ExecArg>,
    pub stdin: Option<ExecArg>,
    pub env: BTreeMap<String, String>,
}

/// Script argument or stdin payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecArg {
    Plain(String),
    Template(ArgTemplate),
}

impl ExecArg {
    fn parse(text: &str) -> Result<Self> {
        if ArgTemplate::is_template(text) {
            ArgTemplate::parse(text)
                .map(ExecArg::Template)
                .map_err(|e| Error::Config(e.to_string()))
        } else {
            Ok(ExecArg::Plain(text.to_string()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct TtsRule {
    pub source: TtsSource,
    /// Applied in order to the source text before synthesis
    pub preprocessors: Vec<TextPreprocessor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtsSource {
    Fields {
        note_filter: String,
        text_field: String,
        audio_field: String,
    },
    /// Every voiced field of a note type declared under `noteTypes`
    GeneratedNoteType(String),
}

/// Pure text transform applied before synthesis
#[derive(Debug, Clone)]
pub enum TextPreprocessor {
    RegexReplace { pattern: Regex, replacement: String },
}

impl TextPreprocessor {
    pub fn process(&self, text: &str) -> String {
        match self {
            TextPreprocessor::RegexReplace {
                pattern,
                replacement,
            } => pattern.replace_all(text, replacement.as_str()).into_owned(),
        }
    }
}

/// Cards matching `filter` outside `target_deck` are moved into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationRule {
    pub filter: String,
    pub target_deck: String,
}

// ============================================================================
// Conversion
// ============================================================================

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_loaded(&anki_helper_common::config::load_config_file(path)?)
    }

    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        Self::from_file(&loaded.file, &loaded.path, &loaded.base_dir)
    }

    pub fn from_file(file: &ConfigFile, source: &Path, base_dir: &Path) -> Result<Self> {
        let anki = parse_anki(&file.anki).map_err(|e| e.context("invalid anki section"))?;
        let actions =
            parse_actions(&file.actions, base_dir).map_err(|e| e.context("invalid actions"))?;

        let azure = match &file.azure {
            Some(section) if !actions.tts.is_empty() => Some(
                parse_azure(section, base_dir).map_err(|e| e.context("invalid azure section"))?,
            ),
            Some(_) => {
                debug!("No text-to-speech actions configured, ignoring azure section");
                None
            }
            None if !actions.tts.is_empty() => {
                return Err(Error::Config(
                    "text-to-speech actions require an azure section".to_string(),
                ))
            }
            None => None,
        };

        Ok(Config {
            source: source.to_path_buf(),
            anki,
            azure,
            actions,
        })
    }
}

fn parse_duration_or(raw: Option<&str>, default: Duration, what: &str) -> Result<Duration> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => parse_duration(raw).map_err(|e| e.context(format!("malformed {}", what))),
        None => Ok(default),
    }
}

fn parse_anki(section: &AnkiSection) -> Result<AnkiConfig> {
    let connect_url = match section.connect_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => {
            info!(
                "AnkiConnect address is not specified, using default {}",
                DEFAULT_ANKI_CONNECT_URL
            );
            DEFAULT_ANKI_CONNECT_URL.to_string()
        }
    };
    validate_url(&connect_url, "connectUrl")?;

    Ok(AnkiConfig {
        connect_url,
        request_timeout: parse_duration_or(
            section.request_timeout.as_deref(),
            DEFAULT_REQUEST_TIMEOUT,
            "requestTimeout",
        )?,
        log_requests: section.log_requests,
    })
}

fn parse_azure(section: &AzureSection, base_dir: &Path) -> Result<AzureConfig> {
    let api_key = match (non_blank(&section.api_key), non_blank(&section.api_key_file)) {
        (Some(key), _) => key.to_string(),
        (None, Some(key_file)) => {
            let path = resolve_relative(base_dir, key_file);
            info!("Loading Azure API key from {}", path.display());
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                Error::from(e).context(format!("failed to read Azure API key file {}", path.display()))
            })?;
            raw.trim().to_string()
        }
        (None, None) => return Err(Error::Config("API key is not specified".to_string())),
    };

    let endpoint_url = non_blank(&section.endpoint_url)
        .ok_or_else(|| Error::Config("endpointUrl is not specified".to_string()))?
        .to_string();
    validate_url(&endpoint_url, "endpointUrl")?;

    let voice = non_blank(&section.voice)
        .ok_or_else(|| Error::Config("voice is not specified".to_string()))?
        .to_string();

    let language = match non_blank(&section.language) {
        Some(language) => language.to_string(),
        None => infer_language(&voice)?,
    };

    let max_retries = match section.max_retries {
        Some(n) if n <= 0 => {
            return Err(Error::Config("maxRetries must be positive".to_string()));
        }
        Some(n) => u32::try_from(n)
            .map_err(|_| Error::Config(format!("maxRetries is too large: {}", n)))?,
        None => DEFAULT_AZURE_MAX_RETRIES,
    };

    Ok(AzureConfig {
        api_key,
        endpoint_url,
        voice,
        language,
        request_timeout: parse_duration_or(
            section.request_timeout.as_deref(),
            DEFAULT_REQUEST_TIMEOUT,
            "requestTimeout",
        )?,
        min_pause_between_requests: parse_duration_or(
            section.min_pause_between_requests.as_deref(),
            DEFAULT_AZURE_MIN_PAUSE,
            "minPauseBetweenRequests",
        )?,
        log_requests: section.log_requests,
        retry_on_too_many_requests: section.retry_on_too_many_requests,
        max_retries,
    })
}

/// `de-DE-KatjaNeural` → `de-DE`
fn infer_language(voice: &str) -> Result<String> {
    let parts: Vec<&str> = voice.splitn(3, '-').collect();
    match parts.as_slice() {
        [lang, locale, name] if !lang.is_empty() && !locale.is_empty() && !name.is_empty() => {
            let language = format!("{}-{}", lang, locale);
            info!(
                "Text-to-speech language is not specified, inferred {} from voice {}",
                language, voice
            );
            Ok(language)
        }
        _ => Err(Error::Config(format!(
            "failed to infer language from voice name, expected <lang>-<locale>-<voice> but got {:?}",
            voice
        ))),
    }
}

fn parse_actions(section: &ActionsSection, base_dir: &Path) -> Result<Actions> {
    let upload_media = section
        .upload_media
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            parse_upload_media(entry, base_dir)
                .map_err(|e| e.context(format!("invalid uploadMedia #{}", i + 1)))
        })
        .collect::<Result<Vec<_>>>()?;

    let note_types = section
        .note_types
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            parse_note_type(entry).map_err(|e| e.context(format!("invalid note type #{}", i + 1)))
        })
        .collect::<Result<Vec<_>>>()?;

    let note_processing = section
        .note_processing
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            parse_note_processing(entry, base_dir)
                .map_err(|e| e.context(format!("invalid note processing rule #{}", i + 1)))
        })
        .collect::<Result<Vec<_>>>()?;

    let tts = section
        .tts
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            parse_tts(entry, &note_types).map_err(|e| e.context(format!("invalid tts #{}", i + 1)))
        })
        .collect::<Result<Vec<_>>>()?;

    let cards_organization = section
        .cards_organization
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            parse_organization(entry)
                .map_err(|e| e.context(format!("invalid cards organization rule #{}", i + 1)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Actions {
        upload_media,
        note_types,
        note_processing,
        tts,
        cards_organization,
    })
}

fn parse_upload_media(entry: &UploadMediaEntry, base_dir: &Path) -> Result<UploadMedia> {
    if entry.anki_name.trim().is_empty() {
        return Err(Error::Config("ankiName must be specified".to_string()));
    }
    if entry.path.trim().is_empty() {
        return Err(Error::Config("path must be specified".to_string()));
    }
    Ok(UploadMedia {
        anki_name: entry.anki_name.clone(),
        path: resolve_relative(base_dir, &entry.path),
    })
}

fn parse_note_type(entry: &NoteTypeEntry) -> Result<NoteType> {
    validate_name(&entry.name)?;

    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(entry.fields.len());
    for (i, field) in entry.fields.iter().enumerate() {
        let parsed =
            parse_note_field(field).map_err(|e| e.context(format!("invalid field #{}", i + 1)))?;
        if !seen.insert(parsed.name.clone()) {
            return Err(Error::Config(format!("field {:?} is duplicated", parsed.name)));
        }
        fields.push(parsed);
    }

    let templates = entry
        .templates
        .iter()
        .enumerate()
        .map(|(i, template)| {
            parse_card_template(template, &seen)
                .map_err(|e| e.context(format!("invalid card template #{}", i + 1)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(NoteType {
        name: entry.name.clone(),
        css: entry.css.clone(),
        fields,
        templates,
    })
}

fn parse_note_field(entry: &NoteFieldEntry) -> Result<NoteField> {
    validate_name(&entry.name)?;
    Ok(NoteField {
        name: entry.name.clone(),
        skip_voiceover: entry.skip_voiceover,
        vars: entry.vars.clone(),
    })
}

fn parse_card_template(entry: &CardTemplateEntry, fields: &HashSet<String>) -> Result<CardTemplateSpec> {
    if let Some(unknown) = entry.for_fields.iter().find(|name| !fields.contains(*name)) {
        return Err(Error::Config(format!("there is no field {:?}", unknown)));
    }
    Ok(CardTemplateSpec {
        name: entry.name.clone(),
        for_fields: entry.for_fields.clone(),
        front: entry.front.clone(),
        back: entry.back.clone(),
    })
}

fn parse_note_processing(entry: &NoteProcessingEntry, base_dir: &Path) -> Result<NoteProcessingRule> {
    if entry.note_filter.trim().is_empty() {
        return Err(Error::Config("noteFilter must be specified".to_string()));
    }

    let timeout = parse_duration_or(entry.timeout.as_deref(), Duration::ZERO, "timeout")?;

    Ok(NoteProcessingRule {
        note_filter: entry.note_filter.clone(),
        min_pause_between_executions: parse_duration_or(
            entry.min_pause_between_executions.as_deref(),
            Duration::ZERO,
            "minPauseBetweenExecutions",
        )?,
        timeout: (!timeout.is_zero()).then_some(timeout),
        exec: parse_exec(&entry.exec, base_dir)?,
    })
}

fn parse_exec(entry: &ExecEntry, base_dir: &Path) -> Result<ExecSpec> {
    let command = entry.command.trim();
    if command.is_empty() {
        return Err(Error::Config("exec command must be specified".to_string()));
    }
    let command = if command.starts_with("./") || command.starts_with("../") {
        let resolved = base_dir.join(command);
        info!(
            "Resolved relative exec command against configuration directory: {}",
            resolved.display()
        );
        resolved.to_string_lossy().into_owned()
    } else {
        command.to_string()
    };

    let args = entry
        .args
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            ExecArg::parse(arg).map_err(|e| e.context(format!("invalid exec argument #{}", i + 1)))
        })
        .collect::<Result<Vec<_>>>()?;

    let stdin = entry
        .stdin
        .as_deref()
        .map(ExecArg::parse)
        .transpose()
        .map_err(|e| e.context("invalid exec stdin"))?;

    Ok(ExecSpec {
        command,
        args,
        stdin,
        env: entry.env.clone(),
    })
}

fn parse_tts(entry: &TtsEntry, note_types: &[NoteType]) -> Result<TtsRule> {
    let generated = non_blank(&entry.for_generated_note_type);
    let text_field = non_blank(&entry.text_field);
    let audio_field = non_blank(&entry.audio_field);
    let note_filter = non_blank(&entry.note_filter);

    let source = match (generated, text_field, audio_field) {
        (Some(type_name), None, None) => {
            if note_filter.is_some() {
                return Err(Error::Config(
                    "noteFilter is not supported together with forGeneratedNoteType".to_string(),
                ));
            }
            if !note_types.iter().any(|t| t.name == type_name) {
                return Err(Error::Config(format!(
                    "broken generated note type reference {:?}",
                    type_name
                )));
            }
            TtsSource::GeneratedNoteType(type_name.to_string())
        }
        (None, Some(text_field), Some(audio_field)) => {
            let note_filter = match note_filter {
                Some(filter) => filter.to_string(),
                None => {
                    let filter = format!("\"{}:_*\" \"{}:\"", text_field, audio_field);
                    info!(
                        "No note filter for text-to-speech {} -> {}, using {}",
                        text_field, audio_field, filter
                    );
                    filter
                }
            };
            TtsSource::Fields {
                note_filter,
                text_field: text_field.to_string(),
                audio_field: audio_field.to_string(),
            }
        }
        _ => {
            return Err(Error::Config(
                "either forGeneratedNoteType or both textField and audioField must be specified"
                    .to_string(),
            ))
        }
    };

    let preprocessors = entry
        .text_preprocessing
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            parse_preprocessor(entry)
                .map_err(|e| e.context(format!("invalid textPreprocessing #{}", i + 1)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TtsRule {
        source,
        preprocessors,
    })
}

fn parse_preprocessor(entry: &TextPreprocessingEntry) -> Result<TextPreprocessor> {
    let pattern = Regex::new(&entry.regexp)
        .map_err(|e| Error::Config(format!("malformed regexp {:?}: {}", entry.regexp, e)))?;
    Ok(TextPreprocessor::RegexReplace {
        pattern,
        replacement: entry.replacement.clone(),
    })
}

fn parse_organization(entry: &CardsOrganizationEntry) -> Result<OrganizationRule> {
    if entry.filter.trim().is_empty() {
        return Err(Error::Config("filter is missing".to_string()));
    }
    if entry.target_deck.trim().is_empty() {
        return Err(Error::Config("target deck is missing".to_string()));
    }
    Ok(OrganizationRule {
        filter: entry.filter.clone(),
        target_deck: entry.target_deck.clone(),
    })
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn validate_url(url: &str, what: &str) -> Result<()> {
    reqwest::Url::parse(url)
        .map(|_| ())
        .map_err(|e| Error::Config(format!("malformed {} {:?}: {}", what, url, e)))
}
