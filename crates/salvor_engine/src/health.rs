//! Drive-health assessment: media class and TRIM state mapped to a
//! recovery-confidence level.
//!
//! OS-specific device enumeration is an external service; callers feed
//! an observation in, or let [`probe_path`] classify the obvious cases
//! (disk images, device-path heuristics). The prober never aborts a
//! scan; its verdict travels with the session as a warning.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaClass {
    Hdd,
    Ssd,
    NvmeSsd,
    PcieSsd,
    UsbFlash,
    SdCard,
    Emmc,
    Optical,
    Virtual,
    DiskImage,
    Unknown,
}

impl MediaClass {
    #[must_use]
    pub const fn is_solid_state(&self) -> bool {
        matches!(self, Self::Ssd | Self::NvmeSsd | Self::PcieSsd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connection {
    Sata,
    Nvme,
    Usb,
    Thunderbolt,
    FireWire,
    Pcie,
    Sdio,
    Virtual,
    Unknown,
}

impl Connection {
    #[must_use]
    pub const fn is_external_bus(&self) -> bool {
        matches!(self, Self::Usb | Self::Thunderbolt | Self::FireWire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecoveryConfidence {
    None,
    Low,
    Medium,
    High,
    Unknown,
}

impl fmt::Display for RecoveryConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// What the external enumeration service reported about the device.
#[derive(Debug, Clone, Copy)]
pub struct DriveObservation {
    pub media: MediaClass,
    pub connection: Connection,
    pub external: bool,
    pub trim_supported: bool,
    pub trim_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct DriveHealth {
    pub media: MediaClass,
    pub connection: Connection,
    pub external: bool,
    pub trim_supported: bool,
    pub trim_enabled: bool,
    pub confidence: RecoveryConfidence,
    pub warning: String,
}

/// Applies the confidence rule table to an observation.
#[must_use]
pub fn assess(obs: &DriveObservation) -> DriveHealth {
    let external = obs.external || obs.connection.is_external_bus();
    let (confidence, warning) = match obs.media {
        MediaClass::Hdd => (
            RecoveryConfidence::High,
            "Magnetic disk: deleted data persists until overwritten.".to_string(),
        ),
        media if media.is_solid_state() && external => (
            RecoveryConfidence::Medium,
            "External SSD: enclosures typically do not pass TRIM through, \
             so deleted data often survives."
                .to_string(),
        ),
        media if media.is_solid_state() && obs.trim_enabled => (
            RecoveryConfidence::Low,
            "Internal SSD with TRIM enabled: the firmware erases deleted \
             blocks in the background. Recently deleted files are likely \
             already gone; scanning will proceed regardless."
                .to_string(),
        ),
        media if media.is_solid_state() => (
            RecoveryConfidence::Medium,
            "Internal SSD without active TRIM: deleted data may survive \
             until garbage collection."
                .to_string(),
        ),
        MediaClass::UsbFlash | MediaClass::SdCard => (
            RecoveryConfidence::High,
            "Removable flash media rarely receives TRIM; prospects are good.".to_string(),
        ),
        MediaClass::Emmc if obs.trim_enabled => (
            RecoveryConfidence::Low,
            "eMMC with DISCARD enabled: deleted blocks are erased eagerly.".to_string(),
        ),
        MediaClass::Emmc => (
            RecoveryConfidence::Medium,
            "eMMC without DISCARD: deleted data may survive.".to_string(),
        ),
        MediaClass::Optical | MediaClass::Virtual | MediaClass::DiskImage => (
            RecoveryConfidence::High,
            "Static medium: contents do not change underneath the scan.".to_string(),
        ),
        _ => (
            RecoveryConfidence::Unknown,
            "Media type unknown; recovery prospects cannot be estimated.".to_string(),
        ),
    };

    DriveHealth {
        media: obs.media,
        connection: obs.connection,
        external,
        trim_supported: obs.trim_supported,
        trim_enabled: obs.trim_enabled,
        confidence,
        warning,
    }
}

/// Best-effort classification when no enumeration service is wired up:
/// regular files are disk images; device paths are classified from
/// their naming convention, everything else is unknown.
#[must_use]
pub fn probe_path(path: impl AsRef<Path>) -> DriveHealth {
    let path = path.as_ref();
    let is_regular = std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
    if is_regular {
        return assess(&DriveObservation {
            media: MediaClass::DiskImage,
            connection: Connection::Virtual,
            external: false,
            trim_supported: false,
            trim_enabled: false,
        });
    }

    let name = path.to_string_lossy();
    let media = if name.contains("nvme") {
        MediaClass::NvmeSsd
    } else if name.contains("mmcblk") {
        MediaClass::Emmc
    } else {
        MediaClass::Unknown
    };
    let connection = match media {
        MediaClass::NvmeSsd => Connection::Nvme,
        MediaClass::Emmc => Connection::Sdio,
        _ => Connection::Unknown,
    };
    assess(&DriveObservation {
        media,
        connection,
        external: false,
        trim_supported: media.is_solid_state(),
        trim_enabled: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(media: MediaClass, connection: Connection, trim: bool) -> DriveObservation {
        DriveObservation {
            media,
            connection,
            external: false,
            trim_supported: trim,
            trim_enabled: trim,
        }
    }

    #[test]
    fn test_hdd_high() {
        let health = assess(&obs(MediaClass::Hdd, Connection::Sata, false));
        assert_eq!(health.confidence, RecoveryConfidence::High);
    }

    #[test]
    fn test_internal_ssd_with_trim_low() {
        let health = assess(&obs(MediaClass::Ssd, Connection::Sata, true));
        assert_eq!(health.confidence, RecoveryConfidence::Low);
        assert!(health.warning.contains("TRIM"));
    }

    #[test]
    fn test_external_ssd_medium_regardless_of_trim() {
        let mut o = obs(MediaClass::NvmeSsd, Connection::Usb, true);
        o.external = true;
        let health = assess(&o);
        assert_eq!(health.confidence, RecoveryConfidence::Medium);
    }

    #[test]
    fn test_flash_and_static_media() {
        assert_eq!(
            assess(&obs(MediaClass::SdCard, Connection::Sdio, false)).confidence,
            RecoveryConfidence::High
        );
        assert_eq!(
            assess(&obs(MediaClass::DiskImage, Connection::Virtual, false)).confidence,
            RecoveryConfidence::High
        );
        assert_eq!(
            assess(&obs(MediaClass::Emmc, Connection::Sdio, true)).confidence,
            RecoveryConfidence::Low
        );
    }

    #[test]
    fn test_unknown_media() {
        let health = assess(&obs(MediaClass::Unknown, Connection::Unknown, false));
        assert_eq!(health.confidence, RecoveryConfidence::Unknown);
    }

    #[test]
    fn test_probe_path_regular_file_is_disk_image() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let health = probe_path(temp.path());
        assert_eq!(health.media, MediaClass::DiskImage);
        assert_eq!(health.confidence, RecoveryConfidence::High);
    }
}
