//! Verified save pipeline: re-read from the source, re-trim by carve
//! mode, repair when worthwhile, write with fsync, and confirm the
//! readback byte-for-byte.

use crate::adapter::DeletedEntryAdapter;
use crate::session::ScanSession;
use salvor_core::carve::Carver;
use salvor_core::repair::{self, IntegrityCheck};
use salvor_core::{BlockSource, CoreError, Provenance, RecoveredFile, damage, fingerprint};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SECTOR: u64 = 512;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Source(#[from] CoreError),

    #[error("adapter read failed: {0}")]
    Adapter(String),

    #[error("no bytes available at offset {0}")]
    Empty(u64),

    #[error("readback verification failed: {0}")]
    Readback(String),
}

#[derive(Debug, Default)]
pub struct SaveSummary {
    pub saved: usize,
    pub failed: usize,
    /// `(session file index, error)` pairs; one entry never aborts the
    /// remaining saves.
    pub errors: Vec<(usize, String)>,
}

pub struct Saver<'a> {
    carver: &'a Carver,
    adapter: Option<&'a dyn DeletedEntryAdapter>,
}

impl<'a> Saver<'a> {
    #[must_use]
    pub fn new(carver: &'a Carver) -> Self {
        Self {
            carver,
            adapter: None,
        }
    }

    #[must_use]
    pub fn with_adapter(mut self, adapter: &'a dyn DeletedEntryAdapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Saves every selected file (all of them when `selection` is
    /// `None`) under `<output_dir>/<Category>/`.
    pub fn save_all(
        &self,
        session: &mut ScanSession,
        source: &dyn BlockSource,
        output_dir: &Path,
        selection: Option<&[usize]>,
    ) -> SaveSummary {
        let indices: Vec<usize> = match selection {
            Some(sel) => sel.to_vec(),
            None => (0..session.files.len()).collect(),
        };
        let mut summary = SaveSummary::default();
        for (counter, &idx) in indices.iter().enumerate() {
            let Some(file) = session.files.get_mut(idx) else {
                continue;
            };
            match self.save_one(file, source, output_dir, counter as u64 + 1) {
                Ok(()) => summary.saved += 1,
                Err(e) => {
                    tracing::warn!(index = idx, error = %e, "save failed");
                    summary.failed += 1;
                    summary.errors.push((idx, e.to_string()));
                }
            }
        }
        summary
    }

    fn save_one(
        &self,
        file: &mut RecoveredFile,
        source: &dyn BlockSource,
        output_dir: &Path,
        counter: u64,
    ) -> Result<(), SaveError> {
        let mut data = self.reread(file, source)?;
        if data.is_empty() {
            return Err(SaveError::Empty(file.offset));
        }

        // Re-apply the carve-mode trim so the written file matches the
        // computed size rather than the padded read.
        let trimmed = self.carver.retrim(file.signature, &data);
        data.truncate(trimmed);

        // Repair when the analyzer thinks it is worth trying; a failed
        // repair keeps the pre-repair bytes.
        let report = damage::analyze(file.extension(), &data, file.size);
        if report.level != damage::DamageLevel::Healthy && report.repairable {
            let result = repair::repair(file.extension(), &data, &report);
            if result.success {
                if let Some(repaired) = &result.data {
                    data = repaired.clone();
                }
            }
            file.repair = Some(result);
        }
        file.damage = Some(damage::analyze(file.extension(), &data, 0));

        // Informational pre-write check; the write always proceeds.
        let pre_write = repair::verify_data_integrity(&data, file.extension());
        tracing::debug!(
            offset = file.offset,
            valid = pre_write.is_valid,
            level = %pre_write.damage_level,
            "pre-write integrity"
        );

        let dir = output_dir.join(file.category().name());
        fs::create_dir_all(&dir)?;
        let path = disambiguate(&dir, counter, file.extension());

        {
            let out = fs::File::create(&path)?;
            let mut writer = BufWriter::with_capacity(128 * 1024, out);
            writer.write_all(&data)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        let memory_fp = fingerprint(&data);
        file.fingerprint = Some(memory_fp.clone());
        file.size = data.len() as u64;
        file.is_saved = true;
        file.saved_path = Some(path.clone());

        // Post-save readback: size, fingerprint and format validator.
        let readback = fs::read(&path)?;
        let readback_fp = fingerprint(&readback);
        let fp_match = readback_fp == memory_fp;
        let size_ok = readback.len() == data.len();
        let mut check = repair::verify_data_integrity(&readback, file.extension());
        check.fingerprint_match = Some(fp_match);
        check.size_ok = size_ok;
        file.integrity = Some(check);

        if !fp_match || !size_ok {
            return Err(SaveError::Readback(format!(
                "{}: fingerprint/size mismatch after write",
                path.display()
            )));
        }
        Ok(())
    }

    /// Re-reads candidate bytes: sector-aligned and size-padded from
    /// the raw source, or through the adapter's data-run-aware reader
    /// for filesystem-provenance records.
    fn reread(
        &self,
        file: &RecoveredFile,
        source: &dyn BlockSource,
    ) -> Result<Vec<u8>, SaveError> {
        if file.provenance == Provenance::Filesystem {
            if let Some(origin) = &file.origin {
                if let Some(adapter) = self.adapter {
                    return adapter
                        .read_random(origin.inode, 0, file.size as usize)
                        .map_err(|e| SaveError::Adapter(e.to_string()));
                }
            }
        }

        let aligned = file.offset / SECTOR * SECTOR;
        let lead = (file.offset - aligned) as usize;
        let padded = (lead as u64 + file.size).div_ceil(SECTOR) * SECTOR;
        let raw = source.read_at(aligned, padded as usize)?;
        if raw.len() <= lead {
            return Ok(Vec::new());
        }
        let end = (lead + file.size as usize).min(raw.len());
        Ok(raw[lead..end].to_vec())
    }
}

/// `recovered_NNNNNN.ext`, with `_1`, `_2`, ... on collision.
fn disambiguate(dir: &Path, counter: u64, extension: &str) -> PathBuf {
    let base = dir.join(format!("recovered_{counter:06}.{extension}"));
    if !base.exists() {
        return base;
    }
    let mut suffix = 1u32;
    loop {
        let candidate = dir.join(format!("recovered_{counter:06}_{suffix}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}

/// Re-checks a saved file on disk against an expected fingerprint.
pub fn verify_saved_file(path: &Path, expected_fingerprint: &str, extension: &str) -> IntegrityCheck {
    match fs::read(path) {
        Ok(data) => {
            let mut check = repair::verify_data_integrity(&data, extension);
            check.fingerprint_match = Some(fingerprint(&data) == expected_fingerprint);
            check
        }
        Err(e) => IntegrityCheck {
            is_valid: false,
            damage_level: damage::DamageLevel::Fatal,
            fingerprint_match: Some(false),
            size_ok: false,
            notes: vec![format!("readback failed: {e}")],
        },
    }
}
