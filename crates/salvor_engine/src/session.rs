//! Scan session state and the outbound callback surface.
//!
//! The orchestrator owns the session; callbacks are outbound only and
//! never hand the caller a way back into engine internals.

use crate::health::DriveHealth;
use chrono::{DateTime, Utc};
use salvor_core::{FileCategory, RecoveredFile, RecoveryLogEntry};
use salvor_fs::FilesystemInfo;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Scan restricted to filesystem free ranges.
    Forensic,
    /// Whole-device scan when no filesystem could be parsed.
    BruteForce,
}

impl ScanMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Forensic => "forensic",
            Self::BruteForce => "brute-force",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanCounters {
    pub bytes_scanned: u64,
    pub empty_skipped: u64,
    pub entropy_skipped: u64,
    pub used_mmap: bool,
}

/// Aggregate state for one scan run.
#[derive(Debug)]
pub struct ScanSession {
    pub device: String,
    pub categories: Vec<FileCategory>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: ScanMode,
    pub filesystem: Option<FilesystemInfo>,
    pub drive_health: Option<DriveHealth>,
    pub counters: ScanCounters,
    pub files: Vec<RecoveredFile>,
    pub recovery_log: Vec<RecoveryLogEntry>,
    pub warnings: Vec<String>,
    pub status: Option<String>,
    pub cancelled: bool,
}

impl ScanSession {
    pub fn new(device: impl Into<String>, categories: Vec<FileCategory>) -> Self {
        Self {
            device: device.into(),
            categories,
            started_at: Utc::now(),
            finished_at: None,
            mode: ScanMode::BruteForce,
            filesystem: None,
            drive_health: None,
            counters: ScanCounters::default(),
            files: Vec::new(),
            recovery_log: Vec::new(),
            warnings: Vec::new(),
            status: None,
            cancelled: false,
        }
    }

    /// Registers a record and appends its recovery-log line.
    pub fn add_file(&mut self, file: RecoveredFile) -> &RecoveredFile {
        self.recovery_log.push(RecoveryLogEntry {
            counter: self.recovery_log.len() as u64 + 1,
            extension: file.extension().to_string(),
            offset: file.offset,
            size: file.size,
            damage_level: file.damage_level().as_str().to_string(),
        });
        self.files.push(file);
        self.files.last().expect("just pushed")
    }

    #[must_use]
    pub fn valid_files(&self) -> usize {
        self.files.iter().filter(|f| f.validation.is_workable()).count()
    }

    #[must_use]
    pub fn files_found(&self) -> usize {
        self.files.len()
    }
}

pub type ProgressFn = Box<dyn Fn(&ScanSession) + Send + Sync>;
pub type FileFoundFn = Box<dyn Fn(&RecoveredFile) + Send + Sync>;

/// Outbound callback surface. Progress fires at least every 300 ms
/// while the scan is active; file-found once per accepted record;
/// complete exactly once.
#[derive(Default)]
pub struct ScanCallbacks {
    pub on_progress: Option<ProgressFn>,
    pub on_file_found: Option<FileFoundFn>,
    pub on_complete: Option<ProgressFn>,
}

impl ScanCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(&ScanSession) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_file_found(mut self, f: impl Fn(&RecoveredFile) + Send + Sync + 'static) -> Self {
        self.on_file_found = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl Fn(&ScanSession) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub(crate) fn emit_progress(&self, session: &ScanSession) {
        if let Some(cb) = &self.on_progress {
            cb(session);
        }
    }

    pub(crate) fn emit_file_found(&self, file: &RecoveredFile) {
        if let Some(cb) = &self.on_file_found {
            cb(file);
        }
    }

    pub(crate) fn emit_complete(&self, session: &ScanSession) {
        if let Some(cb) = &self.on_complete {
            cb(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salvor_core::catalog::SIG_JPEG;

    #[test]
    fn test_recovery_log_tracks_files() {
        let mut session = ScanSession::new("/dev/null", vec![]);
        session.add_file(RecoveredFile::carved(&SIG_JPEG, 4096, 20_000, "/dev/null"));
        session.add_file(RecoveredFile::carved(&SIG_JPEG, 90_000, 10_000, "/dev/null"));
        assert_eq!(session.files_found(), 2);
        assert_eq!(session.recovery_log.len(), 2);
        assert_eq!(session.recovery_log[0].counter, 1);
        assert_eq!(session.recovery_log[1].offset, 90_000);
    }
}
