//! Configuration file model, discovery and loading
//!
//! The configuration file mirrors what the user writes: plain strings,
//! optional sections, camelCase keys. Validation and conversion into the typed
//! runtime configuration happens in the `anki-helper` crate, this module only
//! finds the file and deserializes it.
//!
//! Config file resolution priority:
//! 1. Explicit path (command-line argument or `ANKI_HELPER_CONFIG`)
//! 2. `anki-helper.yaml` in the current directory
//! 3. `anki-helper.yaml` in the user config directory
//! 4. `anki-helper.yaml` in the user home directory
//!
//! Files ending in `.toml` are parsed as TOML, everything else as YAML.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default configuration file name looked up in well-known directories
pub const DEFAULT_CONFIG_FILE_NAME: &str = "anki-helper.yaml";

/// Environment variable that may hold the configuration file path
pub const CONFIG_PATH_ENV: &str = "ANKI_HELPER_CONFIG";

// ============================================================================
// File model
// ============================================================================

/// Root of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub anki: AnkiSection,
    #[serde(default)]
    pub azure: Option<AzureSection>,
    #[serde(default)]
    pub actions: ActionsSection,
    /// Other configuration files to run in order instead of this one
    #[serde(default)]
    pub run_configs: Vec<String>,
}

/// AnkiConnect connection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnkiSection {
    pub connect_url: Option<String>,
    pub request_timeout: Option<String>,
    #[serde(default)]
    pub log_requests: bool,
}

/// Azure text-to-speech settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AzureSection {
    pub api_key: Option<String>,
    pub api_key_file: Option<String>,
    pub endpoint_url: Option<String>,
    pub voice: Option<String>,
    pub language: Option<String>,
    pub request_timeout: Option<String>,
    pub min_pause_between_requests: Option<String>,
    #[serde(default)]
    pub log_requests: bool,
    #[serde(default)]
    pub retry_on_too_many_requests: bool,
    pub max_retries: Option<i64>,
}

/// Actions to run, grouped by pipeline stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActionsSection {
    #[serde(default)]
    pub upload_media: Vec<UploadMediaEntry>,
    #[serde(default)]
    pub note_types: Vec<NoteTypeEntry>,
    #[serde(default)]
    pub note_processing: Vec<NoteProcessingEntry>,
    #[serde(default)]
    pub tts: Vec<TtsEntry>,
    #[serde(default)]
    pub cards_organization: Vec<CardsOrganizationEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UploadMediaEntry {
    #[serde(default)]
    pub anki_name: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NoteTypeEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub css: String,
    #[serde(default)]
    pub fields: Vec<NoteFieldEntry>,
    #[serde(default)]
    pub templates: Vec<CardTemplateEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NoteFieldEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub skip_voiceover: bool,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CardTemplateEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub for_fields: Vec<String>,
    #[serde(default)]
    pub front: String,
    #[serde(default)]
    pub back: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NoteProcessingEntry {
    #[serde(default)]
    pub note_filter: String,
    pub min_pause_between_executions: Option<String>,
    pub timeout: Option<String>,
    #[serde(default)]
    pub exec: ExecEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecEntry {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub stdin: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TtsEntry {
    pub for_generated_note_type: Option<String>,
    pub text_field: Option<String>,
    pub audio_field: Option<String>,
    pub note_filter: Option<String>,
    #[serde(default)]
    pub text_preprocessing: Vec<TextPreprocessingEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TextPreprocessingEntry {
    #[serde(default)]
    pub regexp: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CardsOrganizationEntry {
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub target_deck: String,
}

// ============================================================================
// Loading
// ============================================================================

/// A configuration file together with where it was loaded from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Absolute or user-given path of the file
    pub path: PathBuf,
    /// Directory against which relative paths inside the file are resolved
    pub base_dir: PathBuf,
    pub file: ConfigFile,
}

/// Parse configuration text; `.toml` paths are read as TOML, others as YAML
pub fn parse_config_str(content: &str, path: &Path) -> Result<ConfigFile> {
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        toml::from_str(content)
            .map_err(|e| Error::Parse(format!("malformed TOML in {}: {}", path.display(), e)))
    } else if content.trim().is_empty() {
        Ok(ConfigFile::default())
    } else {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Parse(format!("malformed YAML in {}: {}", path.display(), e)))
    }
}

/// Read and deserialize a configuration file
pub fn load_config_file(path: &Path) -> Result<LoadedConfig> {
    info!("Loading configuration from {}", path.display());
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::from(e).context(format!("failed to read {}", path.display())))?;
    let file = parse_config_str(&content, path)?;

    let base_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok(LoadedConfig {
        path: path.to_path_buf(),
        base_dir,
        file,
    })
}

/// Resolve a path found inside a config file against the file's directory
pub fn resolve_relative(base_dir: &Path, path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        candidate
    } else {
        let resolved = base_dir.join(candidate);
        debug!("Resolved relative path {:?} to {}", path, resolved.display());
        resolved
    }
}

/// Locate the configuration file.
///
/// An explicit path is returned as-is (existence is checked when loading).
/// Otherwise the well-known directories are searched in priority order.
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        info!("Use config path from command line: {}", path.display());
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            info!("Use config path from {}: {}", CONFIG_PATH_ENV, path);
            return Ok(PathBuf::from(path));
        }
    }

    let candidate_dirs = [
        ("current directory", std::env::current_dir().ok()),
        ("user config directory", dirs::config_dir()),
        ("user home directory", dirs::home_dir()),
    ];

    for (dir_type, dir) in candidate_dirs {
        let Some(dir) = dir else {
            warn!("Failed to determine {}", dir_type);
            continue;
        };
        let path = dir.join(DEFAULT_CONFIG_FILE_NAME);
        debug!("Check for config file at {}", path.display());
        if std::fs::symlink_metadata(&path).is_ok_and(|meta| meta.is_file()) {
            info!("Use configuration from {}", path.display());
            return Ok(path);
        }
    }

    Err(Error::Config(format!(
        "no configuration file given and no {} found in the current, config or home directory",
        DEFAULT_CONFIG_FILE_NAME
    )))
}
