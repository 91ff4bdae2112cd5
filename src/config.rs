//! Configuration using Figment
//!
//! Settings are loaded from:
//! 1. built-in defaults
//! 2. `config/labstate.toml` (optional)
//! 3. environment variables prefixed with `LABSTATE_`, nested with `__`
//!    (e.g. `LABSTATE_STORAGE__STATE_PATH=/srv/lab/labstate.json`)
//!
//! # Example
//! ```no_run
//! use labstate::config::LabConfig;
//!
//! let config = LabConfig::load()?;
//! let path = config.resolve_state_path();
//! println!("Using {}", path.display());
//! # Ok::<(), labstate::error::LabStateError>(())
//! ```

use crate::error::{AppResult, LabStateError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/labstate.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LabConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// State file settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Name stamped as the author of saved files instead of the account name
    #[serde(default)]
    pub author: Option<String>,
}

/// State file configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Well-known shared state file
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Local file used when the shared one is not readable
    #[serde(default = "default_fallback_path")]
    pub fallback_path: PathBuf,
    /// Copy the previous file aside before every overwrite
    #[serde(default = "default_true")]
    pub backup_on_save: bool,
    /// Verify the content digest when loading
    #[serde(default = "default_true")]
    pub verify_hash: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/home/jupyter/labstate.json")
}

fn default_fallback_path() -> PathBuf {
    PathBuf::from("labstate-local.json")
}

fn default_true() -> bool {
    true
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            author: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            fallback_path: default_fallback_path(),
            backup_on_save: true,
            verify_hash: true,
        }
    }
}

impl LabConfig {
    /// Load configuration from `config/labstate.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: LabConfig = Figment::from(Serialized::defaults(LabConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LABSTATE_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(LabStateError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.storage.state_path.as_os_str().is_empty() {
            return Err(LabStateError::Configuration(
                "storage.state_path must not be empty".to_string(),
            ));
        }
        if self.storage.fallback_path.as_os_str().is_empty() {
            return Err(LabStateError::Configuration(
                "storage.fallback_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Picks the state file to use.
    ///
    /// The well-known path wins when it can be opened for reading; a warning is logged
    /// if it is not writable, since saves will then fail. Otherwise the local fallback
    /// path is used and a warning says why.
    pub fn resolve_state_path(&self) -> PathBuf {
        let primary = &self.storage.state_path;
        match File::open(primary) {
            Ok(_) => {
                if OpenOptions::new().append(true).open(primary).is_err() {
                    warn!(
                        path = %primary.display(),
                        "Write permission denied, you will not be able to save the labstate"
                    );
                }
                primary.clone()
            }
            Err(err) => {
                match err.kind() {
                    ErrorKind::NotFound => warn!(path = %primary.display(), "State file was not found"),
                    ErrorKind::PermissionDenied => {
                        warn!(path = %primary.display(), "You don't have permission to read the state file")
                    }
                    _ => warn!(path = %primary.display(), error = %err, "Cannot open state file"),
                }
                let fallback = self.storage.fallback_path.clone();
                warn!(
                    path = %primary.display(),
                    fallback = %fallback.display(),
                    "State file not available, falling back to local file"
                );
                fallback
            }
        }
    }
}
