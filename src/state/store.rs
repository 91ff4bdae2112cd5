//! Loading and saving state files.
//!
//! ## Save protocol
//!
//! [`LabState::save`] never blindly overwrites a file. It first loads whatever is on
//! disk at the target path:
//!
//! 1. No file: this is a first save, write it.
//! 2. The file holds a state equal to ours: nothing to do.
//! 3. The file's digest equals the digest we recorded at our last load or save: nobody
//!    else touched it, overwrite it (after a timestamped backup).
//! 4. Otherwise someone else saved in the meantime: refuse with
//!    [`LabStateError::Conflict`] and leave the file alone.
//!
//! There is no file lock, so a save by another process between step 3's comparison and
//! our write is not detected.
//!
//! ## Load
//!
//! [`LabState::load`] verifies the stored digest, refuses documents from a newer schema
//! and runs the migration chain on older ones before rebuilding the registry.

use super::document::{self, content_digest, DATETIME_KEY, SHA256_KEY, USER_KEY, VERSION_KEY};
use super::migration::{self, MigrationContext, CURRENT_VERSION};
use super::{LabDocument, LabState, SaveStatus, StateMetadata};
use crate::config::LabConfig;
use crate::error::{AppResult, LabStateError};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Options for [`LabState::load_with`].
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Recompute the digest and fail on mismatch.
    pub verify_hash: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { verify_hash: true }
    }
}

/// Options for [`LabState::save_with`].
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Copy the existing file to a timestamped sibling before overwriting it.
    pub backup: bool,
    /// Name stamped as `__user__`. Defaults to the current account name.
    pub author: Option<String>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveOptions {
    /// Backups enabled, author from the environment.
    pub fn new() -> Self {
        Self {
            backup: true,
            author: None,
        }
    }

    /// Options taken from the `[storage]` and `[application]` configuration sections.
    pub fn from_config(config: &LabConfig) -> Self {
        Self {
            backup: config.storage.backup_on_save,
            author: config.application.author.clone(),
        }
    }

    /// Enables or disables the backup copy.
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    /// Overrides the author name.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    fn resolved_author(&self) -> String {
        self.author.clone().unwrap_or_else(current_user)
    }
}

/// What a successful save did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// There was no file yet; it was created.
    FirstWrite,
    /// The file was overwritten, optionally after a backup.
    Written {
        /// Where the previous contents were copied to.
        backup: Option<PathBuf>,
    },
    /// The file already held this exact state.
    Unchanged,
}

/// Result of checking a file's digest without rebuilding the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Schema version stored in the file.
    pub version: u32,
    /// Digest stored in the file.
    pub stored: String,
    /// Digest recomputed from the file content.
    pub computed: String,
    /// Last saver.
    pub user: Option<String>,
    /// Last save timestamp.
    pub datetime: Option<String>,
}

impl VerifyReport {
    /// Returns `true` if the stored digest matches the content.
    pub fn is_intact(&self) -> bool {
        self.stored == self.computed
    }
}

/// Account name of the current user, or `"unknown"`.
pub fn current_user() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Sibling of `path` named `<stem>_<timestamp>.json`.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "labstate".to_string());
    let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f");
    path.with_file_name(format!("{stem}_{timestamp}.json"))
}

struct RawDocument {
    version: u32,
    sha256: String,
    user: Option<String>,
    datetime: Option<String>,
    content: Map<String, Value>,
}

fn read_raw(path: &Path) -> AppResult<RawDocument> {
    let text = fs::read_to_string(path)?;
    let mut content = match serde_json::from_str(&text)? {
        Value::Object(map) => map,
        _ => {
            return Err(LabStateError::MalformedDocument(
                "top level is not an object".to_string(),
            ))
        }
    };

    let user = take_string(&mut content, USER_KEY);
    let datetime = take_string(&mut content, DATETIME_KEY);
    let sha256 = take_string(&mut content, SHA256_KEY)
        .ok_or_else(|| LabStateError::MalformedDocument(format!("missing {SHA256_KEY}")))?;
    let version = content
        .get(VERSION_KEY)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| LabStateError::MalformedDocument(format!("missing {VERSION_KEY}")))?;

    Ok(RawDocument {
        version,
        sha256,
        user,
        datetime,
        content,
    })
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

impl LabState {
    /// Loads and verifies the state stored at `path`.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        Self::load_with(path, LoadOptions::default())
    }

    /// Loads the state stored at `path`.
    ///
    /// # Errors
    ///
    /// - [`LabStateError::Integrity`] if `verify_hash` is set and the digest does not match
    /// - [`LabStateError::UnsupportedVersion`] if the file is from a newer schema
    /// - [`LabStateError::MigrationNotFound`] if an older schema cannot be upgraded
    /// - [`LabStateError::Io`] / [`LabStateError::Json`] if the file cannot be read or parsed
    pub fn load_with(path: impl AsRef<Path>, options: LoadOptions) -> AppResult<Self> {
        let path = path.as_ref();
        let RawDocument {
            version,
            sha256,
            user,
            datetime,
            mut content,
        } = read_raw(path)?;

        if options.verify_hash {
            let actual = content_digest(&content)?;
            if actual != sha256 {
                return Err(LabStateError::Integrity {
                    expected: sha256,
                    actual,
                });
            }
        }

        if version > CURRENT_VERSION {
            return Err(LabStateError::UnsupportedVersion {
                found: version,
                supported: CURRENT_VERSION,
            });
        }

        content.remove(VERSION_KEY);
        let mut content = Value::Object(content);
        if version < CURRENT_VERSION {
            warn!(path = %path.display(), version, "Loading older version of labstate");
            content = migration::migrate(version, content, &MigrationContext::from_environment())?;
        }

        let document: LabDocument = serde_json::from_value(content)
            .map_err(|e| LabStateError::MalformedDocument(e.to_string()))?;
        let mut state = LabState::from_document(document)?;
        state.meta = StateMetadata {
            version: CURRENT_VERSION,
            sha256: Some(sha256),
            user,
            datetime,
        };
        state.path = Some(path.to_path_buf());
        state.status = SaveStatus::Unmodified;
        Ok(state)
    }

    /// Checks the digest of the file at `path` without rebuilding the registry.
    pub fn verify(path: impl AsRef<Path>) -> AppResult<VerifyReport> {
        let raw = read_raw(path.as_ref())?;
        Ok(VerifyReport {
            version: raw.version,
            computed: content_digest(&raw.content)?,
            stored: raw.sha256,
            user: raw.user,
            datetime: raw.datetime,
        })
    }

    /// Saves to `path` with backups enabled.
    pub fn save(&mut self, path: impl AsRef<Path>) -> AppResult<SaveOutcome> {
        self.save_with(path, &SaveOptions::new())
    }

    /// Saves to the file this state was last loaded from or saved to.
    pub fn save_in_place(&mut self) -> AppResult<SaveOutcome> {
        let path = self.path.clone().ok_or(LabStateError::NoPath)?;
        self.save(path)
    }

    /// Saves to `path` unless the file changed since this state last saw it.
    pub fn save_with(
        &mut self,
        path: impl AsRef<Path>,
        options: &SaveOptions,
    ) -> AppResult<SaveOutcome> {
        let path = path.as_ref();
        let on_disk = match LabState::load(path) {
            Ok(state) => state,
            Err(err) if err.is_not_found() => {
                debug!(path = %path.display(), "File not found, saving for the first time");
                self.write_unchecked(path, &options.clone().with_backup(false))?;
                return Ok(SaveOutcome::FirstWrite);
            }
            Err(err) => return Err(err),
        };

        if self.meta.sha256.is_none() {
            debug!("Comparing fabricated labstate against the file on disk");
            self.meta.sha256 = Some(self.digest()?);
        }

        if on_disk == *self {
            debug!(path = %path.display(), "Detected no changes in labstate, nothing to do");
            self.meta.sha256 = on_disk.meta.sha256;
            self.path = Some(path.to_path_buf());
            self.status = SaveStatus::Saved;
            return Ok(SaveOutcome::Unchanged);
        }

        if on_disk.meta.sha256 == self.meta.sha256 {
            let backup = self.write_unchecked(path, options)?;
            Ok(SaveOutcome::Written { backup })
        } else {
            self.status = SaveStatus::Conflict;
            let err = LabStateError::Conflict {
                path: path.to_path_buf(),
            };
            error!("{err}");
            Err(err)
        }
    }

    /// Writes to `path` without the conflict check.
    ///
    /// The backup copy, when requested and when the file exists, is completed before the
    /// file is truncated. Returns the backup path.
    pub fn write_unchecked(
        &mut self,
        path: impl AsRef<Path>,
        options: &SaveOptions,
    ) -> AppResult<Option<PathBuf>> {
        let path = path.as_ref();
        let backup = if options.backup && path.exists() {
            let backup = backup_path_for(path);
            debug!(from = %path.display(), to = %backup.display(), "Backing up labstate");
            fs::copy(path, &backup)?;
            Some(backup)
        } else {
            None
        };

        self.meta.version = CURRENT_VERSION;
        let author = options.resolved_author();
        let (stamped, sha256) = self.to_stamped_document(&author)?;
        let rendered = document::render(&Value::Object(stamped.clone()))?;

        {
            let file = File::create(path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(rendered.as_bytes())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        debug!(path = %path.display(), sha256 = %sha256, "Saved labstate");
        self.meta = StateMetadata {
            version: CURRENT_VERSION,
            sha256: Some(sha256),
            user: Some(author),
            datetime: stamped
                .get(DATETIME_KEY)
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        self.path = Some(path.to_path_buf());
        self.status = SaveStatus::Saved;
        Ok(backup)
    }
}
