//! # Salvor Engine
//!
//! Orchestration layer of the Salvor deleted-file recovery engine:
//! drive-health assessment, filesystem-aware mode selection, the
//! parallel and resumable scan pipeline, the external deleted-entry
//! adapter boundary, and the verified save path.
//!
//! A scan is driven through [`Orchestrator`]; results aggregate into a
//! [`ScanSession`] and surface through [`ScanCallbacks`]. Selected
//! records are persisted by [`Saver`], which re-reads, repairs,
//! writes and verifies each file.

pub mod adapter;
pub mod checkpoint;
pub mod health;
mod orchestrator;
mod saver;
mod session;

pub use adapter::{ADAPTER_TIMEOUT, AdapterOutcome, DeletedEntry, DeletedEntryAdapter};
pub use checkpoint::{CHECKPOINT_FILE, CHECKPOINT_VERSION, Checkpoint};
pub use health::{
    Connection, DriveHealth, DriveObservation, MediaClass, RecoveryConfidence, assess, probe_path,
};
pub use orchestrator::{Orchestrator, ScanError, ScanOptions};
pub use saver::{SaveError, SaveSummary, Saver, verify_saved_file};
pub use session::{ScanCallbacks, ScanCounters, ScanMode, ScanSession};
