//! # Salvor Core
//!
//! Domain layer of the Salvor deleted-file recovery engine: the
//! signature catalog, carve strategies, validators, damage analysis,
//! repair engine and deduplication, all operating over the
//! [`BlockSource`] abstraction so the same logic runs on raw devices,
//! disk images, or in-memory fixtures.
//!
//! The crate performs no device discovery and never writes to a
//! source; persistence and orchestration live in `salvor_engine`.

pub mod carve;
pub mod catalog;
pub mod damage;
pub mod dedup;
pub mod entropy;
mod error;
pub mod fingerprint;
pub mod repair;
mod source;
pub mod types;
pub mod validate;

pub use carve::{CarveOutcome, CarvedFile, Carver, CarverConfig, OrphanHeader};
pub use catalog::{CarveMode, PatternHit, Signature, SignatureCatalog};
pub use damage::{DamageLevel, DamageReport, RepairAction};
pub use dedup::DedupTracker;
pub use error::{CoreError, Result};
pub use fingerprint::fingerprint;
pub use repair::{IntegrityCheck, RepairResult};
pub use source::{BlockSource, MemSource};
pub use types::{
    FileCategory, FilesystemOrigin, Provenance, RecoveredFile, RecoveryLogEntry, ValidationState,
    WireRecord,
};

#[cfg(test)]
pub(crate) mod testutil;
