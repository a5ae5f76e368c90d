//! Resumable-scan checkpoints.
//!
//! A single JSON document, written atomically (temp file + rename)
//! every 100 MiB of scan advance and erased on successful completion.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const CHECKPOINT_VERSION: u32 = 2;
pub const CHECKPOINT_FILE: &str = "scan_checkpoint.json";

/// Checkpoints older than this are stale and refused on resume.
const MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub mode: String,
    pub last_offset: u64,
    pub file_counter: u64,
    pub files_found: u64,
    pub bytes_scanned: u64,
    /// Recent accepted offsets, used to seed dedup on resume.
    pub last_500_offsets: Vec<u64>,
    pub entropy_skipped: u64,
}

impl Checkpoint {
    pub fn new(device: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            timestamp: Utc::now(),
            device: device.into(),
            mode: mode.into(),
            last_offset: 0,
            file_counter: 0,
            files_found: 0,
            bytes_scanned: 0,
            last_500_offsets: Vec::new(),
            entropy_skipped: 0,
        }
    }

    pub fn push_offset(&mut self, offset: u64) {
        self.last_500_offsets.push(offset);
        if self.last_500_offsets.len() > 500 {
            let excess = self.last_500_offsets.len() - 500;
            self.last_500_offsets.drain(..excess);
        }
    }

    /// Atomic write: temp file in the same directory, fsync, rename.
    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        let target = dir.join(CHECKPOINT_FILE);
        let temp = dir.join(format!("{CHECKPOINT_FILE}.tmp"));
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, &target)?;
        tracing::debug!(offset = self.last_offset, "checkpoint written");
        Ok(())
    }

    /// Loads and validates a checkpoint for `device`; `None` when
    /// missing, unparseable, for another device, from an older engine
    /// version, or stale.
    #[must_use]
    pub fn load(dir: &Path, device: &str) -> Option<Checkpoint> {
        let raw = fs::read_to_string(dir.join(CHECKPOINT_FILE)).ok()?;
        let checkpoint: Checkpoint = serde_json::from_str(&raw).ok()?;
        if checkpoint.device != device {
            tracing::debug!("checkpoint is for a different device, ignoring");
            return None;
        }
        if checkpoint.version < CHECKPOINT_VERSION {
            tracing::debug!(version = checkpoint.version, "checkpoint from older version, ignoring");
            return None;
        }
        if Utc::now() - checkpoint.timestamp > Duration::hours(MAX_AGE_HOURS) {
            tracing::debug!("checkpoint older than 24 hours, ignoring");
            return None;
        }
        Some(checkpoint)
    }

    pub fn clear(dir: &Path) {
        let _ = fs::remove_file(dir.join(CHECKPOINT_FILE));
        let _ = fs::remove_file(dir.join(format!("{CHECKPOINT_FILE}.tmp")));
    }
}
