//! Session-scoped duplicate rejection.
//!
//! Two accepted records may share neither an offset within the
//! proximity window nor a content fingerprint, regardless of
//! provenance. The tracker is created per scan (or per worker, merged
//! serially by the orchestrator) and discarded at session end.

use std::collections::{BTreeSet, HashSet};
use std::ops::Bound;

/// Offsets closer than this are considered the same discovery.
pub const OFFSET_WINDOW: u64 = 512;

#[derive(Debug, Default)]
pub struct DedupTracker {
    window: u64,
    offsets: BTreeSet<u64>,
    fingerprints: HashSet<String>,
}

impl DedupTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(OFFSET_WINDOW)
    }

    #[must_use]
    pub fn with_window(window: u64) -> Self {
        Self {
            window,
            offsets: BTreeSet::new(),
            fingerprints: HashSet::new(),
        }
    }

    #[must_use]
    pub fn is_duplicate_offset(&self, offset: u64) -> bool {
        let low = offset.saturating_sub(self.window.saturating_sub(1));
        self.offsets
            .range((Bound::Included(low), Bound::Unbounded))
            .next()
            .is_some_and(|&near| near < offset.saturating_add(self.window))
    }

    #[must_use]
    pub fn is_duplicate_fingerprint(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    #[must_use]
    pub fn is_duplicate(&self, offset: u64, fingerprint: Option<&str>) -> bool {
        self.is_duplicate_offset(offset)
            || fingerprint.is_some_and(|fp| self.is_duplicate_fingerprint(fp))
    }

    /// Registers a record; returns `false` when it is a duplicate and
    /// was not registered.
    pub fn register(&mut self, offset: u64, fingerprint: Option<&str>) -> bool {
        if self.is_duplicate(offset, fingerprint) {
            return false;
        }
        self.offsets.insert(offset);
        if let Some(fp) = fingerprint {
            self.fingerprints.insert(fp.to_string());
        }
        true
    }

    /// Seeds known offsets, e.g. from a resume checkpoint.
    pub fn seed_offsets(&mut self, offsets: impl IntoIterator<Item = u64>) {
        self.offsets.extend(offsets);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
