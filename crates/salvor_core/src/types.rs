//! Domain records shared across the engine: categories, provenance,
//! recovered-file entries and the serializable worker-boundary record.

use crate::catalog::{Signature, SignatureCatalog};
use crate::damage::{DamageLevel, DamageReport};
use crate::repair::{IntegrityCheck, RepairResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// File category; doubles as the output sub-directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    Document,
    Archive,
    Executable,
    Font,
    Database,
    System,
}

impl FileCategory {
    pub const ALL: [FileCategory; 9] = [
        FileCategory::Image,
        FileCategory::Video,
        FileCategory::Audio,
        FileCategory::Document,
        FileCategory::Archive,
        FileCategory::Executable,
        FileCategory::Font,
        FileCategory::Database,
        FileCategory::System,
    ];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Video => "Video",
            Self::Audio => "Audio",
            Self::Document => "Document",
            Self::Archive => "Archive",
            Self::Executable => "Executable",
            Self::Font => "Font",
            Self::Database => "Database",
            Self::System => "System",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a record was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Found by signature carving over raw bytes.
    Carved,
    /// Reported by the external deleted-entry adapter.
    Filesystem,
}

/// Validator verdict for a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationState {
    Unverified,
    Workable(String),
    Nonworkable(String),
}

impl ValidationState {
    #[must_use]
    pub fn is_workable(&self) -> bool {
        matches!(self, Self::Workable(_))
    }
}

/// Directory metadata carried by filesystem-provenance records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemOrigin {
    pub name: String,
    pub path: String,
    pub inode: u64,
    pub deleted_time: Option<i64>,
}

/// One candidate artifact discovered during a scan.
///
/// Created by a carver (or from an adapter entry); validation, damage
/// and repair fields are filled in later. Once registered with the
/// session the record is never deleted.
#[derive(Debug, Clone)]
pub struct RecoveredFile {
    pub signature: &'static Signature,
    pub offset: u64,
    pub size: u64,
    pub source_path: String,
    pub fingerprint: Option<String>,
    pub provenance: Provenance,
    pub origin: Option<FilesystemOrigin>,
    pub validation: ValidationState,
    pub damage: Option<DamageReport>,
    pub repair: Option<RepairResult>,
    pub is_saved: bool,
    pub saved_path: Option<PathBuf>,
    pub integrity: Option<IntegrityCheck>,
}

impl RecoveredFile {
    pub fn carved(
        signature: &'static Signature,
        offset: u64,
        size: u64,
        source_path: impl Into<String>,
    ) -> Self {
        Self {
            signature,
            offset,
            size,
            source_path: source_path.into(),
            fingerprint: None,
            provenance: Provenance::Carved,
            origin: None,
            validation: ValidationState::Unverified,
            damage: None,
            repair: None,
            is_saved: false,
            saved_path: None,
            integrity: None,
        }
    }

    #[must_use]
    pub fn extension(&self) -> &'static str {
        self.signature.extension
    }

    #[must_use]
    pub fn category(&self) -> FileCategory {
        self.signature.category
    }

    #[must_use]
    pub fn damage_level(&self) -> DamageLevel {
        self.damage
            .as_ref()
            .map(|d| d.level)
            .unwrap_or(DamageLevel::Healthy)
    }

    #[must_use]
    pub fn is_repairable(&self) -> bool {
        self.damage.as_ref().map(|d| d.repairable).unwrap_or(false)
    }

    /// `true` once a successful repair is attached.
    #[must_use]
    pub fn is_repaired(&self) -> bool {
        self.repair.as_ref().map(|r| r.success).unwrap_or(false)
    }

    #[must_use]
    pub fn sector(&self) -> u64 {
        self.offset / 512
    }
}

/// The record workers send across the thread boundary.
///
/// Only plain data crosses; the orchestrator reconstructs the static
/// `Signature` reference by `(extension, category)` lookup. The
/// validator verdict and damage report travel with the record so a
/// damaged discovery survives the merge intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRecord {
    pub offset: u64,
    pub size: u64,
    pub extension: String,
    pub category: String,
    pub fingerprint: Option<String>,
    pub saved_path: String,
    pub validation: ValidationState,
    pub damage: Option<DamageReport>,
}

impl WireRecord {
    pub fn from_file(file: &RecoveredFile) -> Self {
        Self {
            offset: file.offset,
            size: file.size,
            extension: file.signature.extension.to_string(),
            category: file.signature.category.name().to_string(),
            fingerprint: file.fingerprint.clone(),
            saved_path: file
                .saved_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            validation: file.validation.clone(),
            damage: file.damage.clone(),
        }
    }

    /// Rebuilds a full record on the orchestrator side.
    pub fn into_file(self, catalog: &SignatureCatalog, source_path: &str) -> Option<RecoveredFile> {
        let category = FileCategory::parse(&self.category)?;
        let signature = catalog.lookup(&self.extension, category)?;
        let mut file = RecoveredFile::carved(signature, self.offset, self.size, source_path);
        file.fingerprint = self.fingerprint;
        file.validation = self.validation;
        file.damage = self.damage;
        if !self.saved_path.is_empty() {
            file.is_saved = true;
            file.saved_path = Some(PathBuf::from(self.saved_path));
        }
        Some(file)
    }
}

/// One line of the session recovery log, consumed by report writers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryLogEntry {
    pub counter: u64,
    pub extension: String,
    pub offset: u64,
    pub size: u64,
    pub damage_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    #[test]
    fn test_category_roundtrip() {
        for cat in FileCategory::ALL {
            assert_eq!(FileCategory::parse(cat.name()), Some(cat));
        }
        assert_eq!(FileCategory::parse("Nonsense"), None);
    }

    #[test]
    fn test_wire_record_roundtrip() {
        let catalog = SignatureCatalog::new();
        let mut file = RecoveredFile::carved(&catalog::SIG_JPEG, 4096, 20_034, "/dev/null");
        file.fingerprint = Some("abc123".to_string());

        let wire = WireRecord::from_file(&file);
        let back = wire.into_file(&catalog, "/dev/null").unwrap();
        assert_eq!(back.offset, 4096);
        assert_eq!(back.size, 20_034);
        assert_eq!(back.extension(), "jpg");
        assert_eq!(back.fingerprint.as_deref(), Some("abc123"));
        assert_eq!(back.validation, ValidationState::Unverified);
        assert!(back.damage.is_none());
    }

    #[test]
    fn test_wire_record_carries_validation_and_damage() {
        let catalog = SignatureCatalog::new();
        let mut file = RecoveredFile::carved(&catalog::SIG_JPEG, 8192, 4096, "/dev/null");
        file.validation = ValidationState::Nonworkable("terminator not found".to_string());
        file.damage = Some(crate::damage::analyze("jpg", &vec![0x55u8; 8192], 0));

        let wire = WireRecord::from_file(&file);
        // The record survives serialization, the path real workers take.
        let json = serde_json::to_string(&wire).unwrap();
        let wire: WireRecord = serde_json::from_str(&json).unwrap();

        let back = wire.into_file(&catalog, "/dev/null").unwrap();
        assert!(matches!(back.validation, ValidationState::Nonworkable(_)));
        let report = back.damage.expect("damage report preserved");
        assert_eq!(report.level, file.damage.as_ref().unwrap().level);
        assert_eq!(report.header_damaged, file.damage.as_ref().unwrap().header_damaged);
    }

    #[test]
    fn test_recovered_file_defaults() {
        let file = RecoveredFile::carved(&catalog::SIG_PNG, 0, 8192, "/tmp/img");
        assert_eq!(file.provenance, Provenance::Carved);
        assert_eq!(file.validation, ValidationState::Unverified);
        assert_eq!(file.damage_level(), DamageLevel::Healthy);
        assert!(!file.is_repairable());
        assert!(!file.is_saved);
    }
}
