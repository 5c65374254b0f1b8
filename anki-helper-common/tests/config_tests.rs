//! Configuration file discovery and loading tests
//!
//! Tests that set `ANKI_HELPER_CONFIG` or change the working directory are
//! marked with #[serial] so they never run in parallel with each other.

use anki_helper_common::config::{find_config_file, load_config_file, CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE_NAME};
use anki_helper_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;

#[test]
#[serial]
fn test_env_var_path_is_used() {
    env::set_var(CONFIG_PATH_ENV, "/tmp/from-env.yaml");
    let path = find_config_file(None);
    env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(path.unwrap(), PathBuf::from("/tmp/from-env.yaml"));
}

#[test]
#[serial]
fn test_explicit_path_beats_env_var() {
    env::set_var(CONFIG_PATH_ENV, "/tmp/from-env.yaml");
    let path = find_config_file(Some(std::path::Path::new("cli.yaml")));
    env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(path.unwrap(), PathBuf::from("cli.yaml"));
}

#[test]
#[serial]
fn test_current_directory_is_searched() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(DEFAULT_CONFIG_FILE_NAME), "anki: {}\n").unwrap();

    let original = env::current_dir().unwrap();
    env::remove_var(CONFIG_PATH_ENV);
    env::set_current_dir(dir.path()).unwrap();
    let found = find_config_file(None);
    env::set_current_dir(original).unwrap();

    let found = found.unwrap();
    assert_eq!(found.file_name().unwrap(), DEFAULT_CONFIG_FILE_NAME);
    assert_eq!(
        found.parent().unwrap().canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
}

#[test]
#[serial]
fn test_directory_named_like_config_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join(DEFAULT_CONFIG_FILE_NAME)).unwrap();

    let original = env::current_dir().unwrap();
    env::remove_var(CONFIG_PATH_ENV);
    env::set_current_dir(dir.path()).unwrap();
    let found = find_config_file(None);
    env::set_current_dir(original).unwrap();

    // Either nothing is found or a file from the config/home directory wins
    if let Ok(path) = found {
        assert!(path.is_file());
    }
}

#[test]
fn test_load_sets_base_dir_to_file_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("decks.yaml");
    fs::write(
        &path,
        "actions:\n  uploadMedia:\n    - ankiName: _font.ttf\n      path: fonts/font.ttf\n",
    )
    .unwrap();

    let loaded = load_config_file(&path).unwrap();

    assert_eq!(loaded.path, path);
    assert_eq!(loaded.base_dir, dir.path());
    assert_eq!(loaded.file.actions.upload_media[0].anki_name, "_font.ttf");
    assert_eq!(loaded.file.actions.upload_media[0].path, "fonts/font.ttf");
}

#[test]
fn test_load_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anki-helper.toml");
    fs::write(
        &path,
        r#"
[anki]
connectUrl = "http://127.0.0.1:8765"

[[actions.cardsOrganization]]
filter = "tag:verbs"
targetDeck = "German::Verbs"
"#,
    )
    .unwrap();

    let loaded = load_config_file(&path).unwrap();

    assert_eq!(loaded.file.anki.connect_url.as_deref(), Some("http://127.0.0.1:8765"));
    assert_eq!(loaded.file.actions.cards_organization[0].target_deck, "German::Verbs");
}

#[test]
fn test_missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config_file(&dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "unexpected error: {:?}", err);
    assert!(err.to_string().contains("absent.yaml"));
}

#[test]
fn test_malformed_yaml_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    fs::write(&path, "actions: [unclosed\n").unwrap();

    let err = load_config_file(&path).unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "unexpected error: {:?}", err);
}
