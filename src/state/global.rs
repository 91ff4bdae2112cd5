//! Process-wide lab state handle.
//!
//! Nothing is read from disk when the crate is linked or its modules are used. The first
//! call to [`lab`] (or [`open`]) loads the default state file and caches the result for
//! the rest of the process.
//!
//! A file that is missing, unreadable or not JSON does not stop a session from starting:
//! the failure is logged and an empty state bound to the same path is used instead, so
//! the first save creates the file. A file that fails its integrity check, is malformed,
//! comes from a newer schema, or cannot be migrated is reported as an error and nothing
//! is cached.
//!
//! Tests that touch the handle must call [`reset`] between cases (and run serially) so
//! one test's state does not leak into the next.
//!
//! # Example
//!
//! ```no_run
//! use labstate::laboratory::Instrument;
//! use labstate::state::global;
//!
//! # fn main() -> labstate::error::AppResult<()> {
//! let mut lab = global::lab()?;
//! lab.insert_instrument(Instrument::new("Keithley2").with_ports(["front"]))?;
//! lab.save_in_place()?;
//! # Ok(())
//! # }
//! ```

use super::{LabState, LoadOptions};
use crate::config::LabConfig;
use crate::error::AppResult;
use once_cell::sync::Lazy;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

static LAB: Lazy<Mutex<Option<LabState>>> = Lazy::new(|| Mutex::new(None));

/// Exclusive access to the process-wide [`LabState`].
///
/// Holds the global lock until dropped.
pub struct LabGuard {
    // Always `Some`: `LabGuard::fill` is the only constructor.
    guard: MutexGuard<'static, Option<LabState>>,
}

impl LabGuard {
    fn fill(
        mut guard: MutexGuard<'static, Option<LabState>>,
        load: impl FnOnce() -> AppResult<LabState>,
    ) -> AppResult<Self> {
        if guard.is_none() {
            *guard = Some(load()?);
        }
        Ok(Self { guard })
    }
}

impl Deref for LabGuard {
    type Target = LabState;

    fn deref(&self) -> &LabState {
        match self.guard.as_ref() {
            Some(state) => state,
            None => unreachable!("LabGuard is only built around an initialized state"),
        }
    }
}

impl DerefMut for LabGuard {
    fn deref_mut(&mut self) -> &mut LabState {
        match self.guard.as_mut() {
            Some(state) => state,
            None => unreachable!("LabGuard is only built around an initialized state"),
        }
    }
}

fn slot() -> MutexGuard<'static, Option<LabState>> {
    LAB.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The process-wide state, loading it with the configuration from
/// [`LabConfig::load`] on first access.
pub fn lab() -> AppResult<LabGuard> {
    LabGuard::fill(slot(), || {
        let config = LabConfig::load().unwrap_or_else(|err| {
            warn!(error = %err, "Invalid labstate configuration, using defaults");
            LabConfig::default()
        });
        load_default(&config)
    })
}

/// The process-wide state, loading it with `config` on first access.
///
/// If the state is already loaded, `config` is ignored.
pub fn open(config: &LabConfig) -> AppResult<LabGuard> {
    LabGuard::fill(slot(), || load_default(config))
}

/// Replaces the process-wide state with `state`.
pub fn install(state: LabState) {
    *slot() = Some(state);
}

/// Drops the cached state so the next access loads from disk again.
pub fn reset() {
    *slot() = None;
}

/// Returns `true` once the state has been loaded or installed.
pub fn is_loaded() -> bool {
    slot().is_some()
}

fn load_default(config: &LabConfig) -> AppResult<LabState> {
    let path = config.resolve_state_path();
    let options = LoadOptions {
        verify_hash: config.storage.verify_hash,
    };
    match LabState::load_with(&path, options) {
        Ok(state) => {
            info!(path = %path.display(), "Loaded labstate");
            Ok(state)
        }
        Err(err) if err.is_unreadable() => {
            error!(path = %path.display(), error = %err, "Could not load labstate");
            error!("Starting fresh new LabState, it will be written on the first save");
            Ok(LabState::with_path(path))
        }
        Err(err) => {
            error!(path = %path.display(), error = %err, "Refusing to use labstate");
            Err(err)
        }
    }
}
