//! # Lab State Library
//!
//! This crate keeps a record of the physical state of a laboratory: which instruments
//! and devices exist, which bench each one sits on, which host talks to each instrument,
//! and how their ports are cabled together. The record lives in memory as a
//! [`state::LabState`] and is persisted to a single JSON file that is protected by a
//! content digest, versioned, and guarded against concurrent overwrites.
//!
//! ## Crate Structure
//!
//! - **`laboratory`**: The entity types (`Host`, `Bench`, `Instrument`, `Device`) and
//!   the `Connection` between two `(entity, port)` bindings.
//! - **`state`**: The `LabState` aggregate with its registry operations, the document
//!   and digest layer, the load/save protocol, schema migrations and the process-wide
//!   handle.
//! - **`config`**: Figment-based configuration, including resolution of the default
//!   state file path.
//! - **`error`**: The `LabStateError` enum for centralized error handling.
//! - **`tracing_init`**: `tracing-subscriber` setup for binaries.
//!
//! Instrument drivers are not part of this crate. An instrument names its driver and
//! carries driver-owned parameters, but nothing here interprets them.

pub mod config;
pub mod error;
pub mod laboratory;
pub mod state;
pub mod tracing_init;

pub use error::{AppResult, LabStateError};
pub use state::LabState;
