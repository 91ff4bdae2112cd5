// Process-wide state handle tests
//
// The handle is shared by every test in this binary, so each test runs
// serially and starts from `global::reset()`.

use anyhow::Result;
use labstate::config::LabConfig;
use labstate::laboratory::Device;
use labstate::state::document::{content_digest, render, SHA256_KEY};
use labstate::state::{global, LabState, CURRENT_VERSION};
use labstate::LabStateError;
use serde_json::{json, Value};
use serial_test::serial;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn config_for(dir: &Path) -> LabConfig {
    let mut config = LabConfig::default();
    config.storage.state_path = dir.join("labstate.json");
    config.storage.fallback_path = dir.join("labstate-local.json");
    config
}

#[test]
#[serial]
fn test_nothing_loaded_until_first_access() {
    global::reset();
    assert!(!global::is_loaded());
}

#[test]
#[serial]
fn test_missing_file_starts_empty_on_fallback() -> Result<()> {
    global::reset();
    let dir = tempdir()?;
    let config = config_for(dir.path());

    {
        let lab = global::open(&config)?;
        assert!(lab.instruments().is_empty());
        assert_eq!(lab.path(), Some(config.storage.fallback_path.as_path()));
    }
    assert!(global::is_loaded());

    // The first save creates the fallback file.
    {
        let mut lab = global::open(&config)?;
        lab.insert_device(Device::new("chip"))?;
        lab.save_in_place()?;
    }
    assert!(config.storage.fallback_path.exists());

    global::reset();
    Ok(())
}

#[test]
#[serial]
fn test_existing_file_is_loaded_once() -> Result<()> {
    global::reset();
    let dir = tempdir()?;
    let config = config_for(dir.path());
    let mut lab = LabState::new();
    lab.insert_device(Device::new("chip"))?;
    lab.save(&config.storage.state_path)?;

    assert!(global::open(&config)?.device("chip").is_some());

    // Later changes on disk are not picked up by the cached state.
    fs::remove_file(&config.storage.state_path)?;
    assert!(global::open(&config)?.device("chip").is_some());

    global::reset();
    Ok(())
}

#[test]
#[serial]
fn test_unparseable_file_starts_empty() -> Result<()> {
    global::reset();
    let dir = tempdir()?;
    let config = config_for(dir.path());
    fs::write(&config.storage.state_path, "{ not json")?;

    let lab = global::open(&config)?;
    assert!(lab.devices().is_empty());
    assert_eq!(lab.path(), Some(config.storage.state_path.as_path()));
    drop(lab);

    global::reset();
    Ok(())
}

#[test]
#[serial]
fn test_corrupted_file_is_an_error() -> Result<()> {
    global::reset();
    let dir = tempdir()?;
    let config = config_for(dir.path());
    let mut lab = LabState::new();
    lab.insert_device(Device::new("chip"))?;
    lab.save(&config.storage.state_path)?;

    let text = fs::read_to_string(&config.storage.state_path)?;
    fs::write(&config.storage.state_path, text.replace("chip", "chop"))?;

    assert!(matches!(
        global::open(&config),
        Err(LabStateError::Integrity { .. })
    ));
    assert!(!global::is_loaded());
    Ok(())
}

#[test]
#[serial]
fn test_wrongly_shaped_file_is_an_error() -> Result<()> {
    global::reset();
    let dir = tempdir()?;
    let config = config_for(dir.path());
    let mut content = serde_json::Map::new();
    content.insert("__version__".to_string(), json!(CURRENT_VERSION));
    content.insert("devices".to_string(), json!([ { "name": "chip", "ports": 5 } ]));
    let sha = content_digest(&content)?;
    content.insert(SHA256_KEY.to_string(), json!(sha));
    fs::write(&config.storage.state_path, render(&Value::Object(content))?)?;

    assert!(matches!(
        global::open(&config),
        Err(LabStateError::MalformedDocument(_))
    ));
    assert!(!global::is_loaded());
    Ok(())
}

#[test]
#[serial]
fn test_install_replaces_state() -> Result<()> {
    global::reset();
    let mut lab = LabState::new();
    lab.insert_device(Device::new("ring"))?;
    global::install(lab);

    let dir = tempdir()?;
    let lab = global::open(&config_for(dir.path()))?;
    assert!(lab.device("ring").is_some());
    drop(lab);

    global::reset();
    Ok(())
}
