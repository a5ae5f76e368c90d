//! # Salvor FS
//!
//! Filesystem detection and free-space probers. Each prober reads a
//! small header region from an open [`BlockSource`], parses the
//! allocation metadata bit-exactly, and emits a sorted, disjoint list
//! of free byte ranges for the forensic scan domain.
//!
//! Malformed on-disk structures never panic a prober: parsing is
//! defensive, returns what was recovered, or reports the filesystem as
//! unsupported so the orchestrator falls back to brute force.

use salvor_core::BlockSource;
use std::fmt;
use thiserror::Error;

mod bitmap;
mod exfat;
mod ext;
mod fat;
mod ntfs;

pub use bitmap::bitmap_free_runs;

/// Families the probers can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsFamily {
    ExFat,
    Fat12,
    Fat16,
    Fat32,
    Ntfs,
    Ext2,
    Ext3,
    Ext4,
}

impl FsFamily {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ExFat => "exFAT",
            Self::Fat12 => "FAT12",
            Self::Fat16 => "FAT16",
            Self::Fat32 => "FAT32",
            Self::Ntfs => "NTFS",
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
        }
    }
}

impl fmt::Display for FsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Outcome of the header sniff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// A family we can extract free ranges from.
    Supported(FsFamily),
    /// Recognized on-disk format we do not parse; brute-force fallback.
    Recognized(&'static str),
    Unknown,
}

/// Free-space map produced by a prober.
#[derive(Debug, Clone)]
pub struct FilesystemInfo {
    pub family: FsFamily,
    pub cluster_size: u64,
    pub total_clusters: u64,
    pub free_clusters: u64,
    /// Sorted, pairwise-disjoint `(start_byte, end_byte)` intervals.
    pub free_ranges: Vec<(u64, u64)>,
    pub free_bytes: u64,
}

impl FilesystemInfo {
    #[must_use]
    pub fn free_percent(&self) -> f64 {
        if self.total_clusters == 0 {
            return 0.0;
        }
        self.free_clusters as f64 * 100.0 / self.total_clusters as f64
    }

    /// Clamps ranges to the device length and drops empties; keeps the
    /// sorted/disjoint invariant intact after defensive parsing.
    pub(crate) fn clamp_to(&mut self, device_size: u64) {
        for range in &mut self.free_ranges {
            range.0 = range.0.min(device_size);
            range.1 = range.1.min(device_size);
        }
        self.free_ranges.retain(|&(start, end)| start < end);
        self.free_bytes = self.free_ranges.iter().map(|&(s, e)| e - s).sum();
    }
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error(transparent)]
    Io(#[from] salvor_core::CoreError),

    #[error("unsupported filesystem: {0}")]
    Unsupported(String),

    #[error("cannot parse {family} structure: {reason}")]
    InvalidStructure { family: &'static str, reason: String },
}

impl FsError {
    pub(crate) fn invalid(family: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidStructure {
            family,
            reason: reason.into(),
        }
    }
}

/// Sniffs the filesystem family from the boot sector and an extended
/// header region (the first 64 KiB; the ISO 9660 anchor is checked only
/// when the caller provides enough bytes).
#[must_use]
pub fn detect(boot: &[u8], header: &[u8]) -> Detection {
    if boot.len() < 512 {
        return Detection::Unknown;
    }

    if &boot[3..11] == b"EXFAT   " {
        return Detection::Supported(FsFamily::ExFat);
    }
    if &boot[3..11] == b"NTFS    " {
        return Detection::Supported(FsFamily::Ntfs);
    }
    if &boot[82..87] == b"FAT32" {
        return Detection::Supported(FsFamily::Fat32);
    }

    let bps = u16::from_le_bytes([boot[11], boot[12]]);
    let plausible_bps = matches!(bps, 512 | 1024 | 2048 | 4096);

    if plausible_bps {
        let fat_sz16 = u16::from_le_bytes([boot[22], boot[23]]);
        let tot_sec16 = u16::from_le_bytes([boot[19], boot[20]]);
        let fat_sz32 = u32::from_le_bytes([boot[36], boot[37], boot[38], boot[39]]);
        if fat_sz16 == 0 && tot_sec16 == 0 && fat_sz32 > 0 {
            return Detection::Supported(FsFamily::Fat32);
        }
    }
    if &boot[54..59] == b"FAT16" {
        return Detection::Supported(FsFamily::Fat16);
    }
    if &boot[54..59] == b"FAT12" {
        return Detection::Supported(FsFamily::Fat12);
    }
    if plausible_bps {
        // Bucket a typeless FAT by its computed cluster count.
        let fat_sz16 = u16::from_le_bytes([boot[22], boot[23]]) as u64;
        if fat_sz16 > 0 {
            let spc = boot[13] as u64;
            let tot16 = u16::from_le_bytes([boot[19], boot[20]]) as u64;
            let tot32 = u32::from_le_bytes([boot[32], boot[33], boot[34], boot[35]]) as u64;
            let total = if tot16 > 0 { tot16 } else { tot32 };
            if spc > 0 && total > 0 {
                let reserved = u16::from_le_bytes([boot[14], boot[15]]) as u64;
                let num_fats = boot[16] as u64;
                let root_entries = u16::from_le_bytes([boot[17], boot[18]]) as u64;
                let root_sectors = (root_entries * 32).div_ceil(bps as u64);
                let data_sectors =
                    total.saturating_sub(reserved + num_fats * fat_sz16 + root_sectors);
                let clusters = data_sectors / spc;
                if clusters < 4085 {
                    return Detection::Supported(FsFamily::Fat12);
                } else if clusters < 65525 {
                    return Detection::Supported(FsFamily::Fat16);
                }
            }
        }
    }

    // ext2/3/4: superblock magic at 1024 + 56.
    if header.len() >= 1024 + 100 {
        let magic = u16::from_le_bytes([header[1024 + 56], header[1024 + 57]]);
        if magic == 0xEF53 {
            let compat = u32::from_le_bytes([
                header[1024 + 92],
                header[1024 + 93],
                header[1024 + 94],
                header[1024 + 95],
            ]);
            let incompat = u32::from_le_bytes([
                header[1024 + 96],
                header[1024 + 97],
                header[1024 + 98],
                header[1024 + 99],
            ]);
            return Detection::Supported(if incompat & ext::INCOMPAT_EXTENTS != 0 {
                FsFamily::Ext4
            } else if compat & ext::COMPAT_HAS_JOURNAL != 0 {
                FsFamily::Ext3
            } else {
                FsFamily::Ext2
            });
        }
    }

    // Recognized-but-unparsed families.
    if header.len() >= 1026 {
        let hfs = u16::from_be_bytes([header[1024], header[1025]]);
        if hfs == 0x482B || hfs == 0x4858 {
            return Detection::Recognized("HFS+");
        }
    }
    if header.len() >= 36 && &header[32..36] == b"NXSB" {
        return Detection::Recognized("APFS");
    }
    if header.len() >= 0x10048 && &header[0x10040..0x10048] == b"_BHRfS_M" {
        return Detection::Recognized("Btrfs");
    }
    if &boot[..4] == b"XFSB" {
        return Detection::Recognized("XFS");
    }
    if header.len() >= 1028 {
        let f2fs = u32::from_le_bytes([
            header[1024],
            header[1025],
            header[1026],
            header[1027],
        ]);
        if f2fs == 0xF2F5_2010 {
            return Detection::Recognized("F2FS");
        }
    }
    if header.len() >= 0x1003C && header[0x10034..0x1003A].starts_with(b"ReIsEr") {
        return Detection::Recognized("ReiserFS");
    }
    if header.len() >= 32774 {
        let anchor = &header[32769..32774];
        if anchor == b"NSR02" || anchor == b"NSR03" {
            return Detection::Recognized("UDF");
        }
        if anchor == b"CD001" {
            return Detection::Recognized("ISO 9660");
        }
    }
    if &boot[510..512] == b"\x55\xAA" {
        if boot[450] == 0xEE {
            return Detection::Recognized("GPT");
        }
        if (0..4).any(|i| boot[446 + i * 16 + 4] != 0) {
            return Detection::Recognized("MBR");
        }
    }

    Detection::Unknown
}

/// Detects the filesystem on `source` and extracts its free-range map.
pub fn probe(source: &dyn BlockSource) -> Result<FilesystemInfo, FsError> {
    let boot = source.read_at(0, 512)?;
    if boot.len() < 512 {
        return Err(FsError::Unsupported("source smaller than a sector".into()));
    }
    let header = source.read_at(0, 64 * 1024)?;

    let family = match detect(&boot, &header) {
        Detection::Supported(family) => family,
        Detection::Recognized(name) => {
            tracing::info!(filesystem = name, "recognized but unsupported, brute-force fallback");
            return Err(FsError::Unsupported(name.to_string()));
        }
        Detection::Unknown => return Err(FsError::Unsupported("unknown".into())),
    };

    let mut info = match family {
        FsFamily::ExFat => exfat::parse(source, &boot)?,
        FsFamily::Fat32 => fat::parse_fat32(source, &boot)?,
        FsFamily::Fat12 | FsFamily::Fat16 => fat::parse_fat12_16(source, &boot, family)?,
        FsFamily::Ntfs => ntfs::parse(source, &boot)?,
        FsFamily::Ext2 | FsFamily::Ext3 | FsFamily::Ext4 => ext::parse(source, family)?,
    };
    info.clamp_to(source.size());

    debug_assert!(info.free_ranges.windows(2).all(|w| w[0].1 <= w[1].0));
    Ok(info)
}
