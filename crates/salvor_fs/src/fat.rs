//! FAT12/16/32 free-space probers.
//!
//! Free clusters are the FAT entries equal to zero. FAT32 entries are
//! 28-bit little-endian, FAT16 entries 16-bit, FAT12 entries 12-bit
//! packed two-per-three-bytes.

use crate::{FilesystemInfo, FsError, FsFamily};
use byteorder::{LittleEndian, ReadBytesExt};
use salvor_core::BlockSource;
use std::io::Cursor;

const FAT_READ_CAP: u64 = 512 * 1024 * 1024;

struct Bpb {
    bytes_per_sector: u64,
    sectors_per_cluster: u64,
    reserved_sectors: u64,
    num_fats: u64,
    root_entries: u64,
    total_sectors: u64,
    fat_size_sectors: u64,
    fat32: bool,
}

impl Bpb {
    fn parse(boot: &[u8], fat32: bool) -> Result<Self, FsError> {
        let family = if fat32 { "FAT32" } else { "FAT12/16" };
        let mut cursor = Cursor::new(boot);
        cursor.set_position(11);
        let bytes_per_sector = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| FsError::invalid("FAT", e.to_string()))? as u64;
        let sectors_per_cluster = boot[13] as u64;
        cursor.set_position(14);
        let reserved_sectors = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| FsError::invalid("FAT", e.to_string()))? as u64;
        let num_fats = boot[16] as u64;
        cursor.set_position(17);
        let root_entries = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| FsError::invalid("FAT", e.to_string()))? as u64;
        let total_sectors_16 = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| FsError::invalid("FAT", e.to_string()))? as u64;
        cursor.set_position(22);
        let fat_size_16 = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| FsError::invalid("FAT", e.to_string()))? as u64;
        cursor.set_position(32);
        let total_sectors_32 = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| FsError::invalid("FAT", e.to_string()))? as u64;
        let fat_size_32 = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| FsError::invalid("FAT", e.to_string()))? as u64;

        let total_sectors = if total_sectors_16 > 0 {
            total_sectors_16
        } else {
            total_sectors_32
        };
        let fat_size_sectors = if fat32 { fat_size_32 } else { fat_size_16 };

        if bytes_per_sector == 0
            || !bytes_per_sector.is_power_of_two()
            || sectors_per_cluster == 0
            || fat_size_sectors == 0
            || total_sectors == 0
            || num_fats == 0
        {
            return Err(FsError::invalid("FAT", format!("{family}: implausible BPB")));
        }

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            root_entries: if fat32 { 0 } else { root_entries },
            total_sectors,
            fat_size_sectors,
            fat32,
        })
    }

    fn cluster_size(&self) -> u64 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    fn root_dir_sectors(&self) -> u64 {
        (self.root_entries * 32).div_ceil(self.bytes_per_sector)
    }

    fn fat_offset(&self) -> u64 {
        self.reserved_sectors * self.bytes_per_sector
    }

    /// First byte of the data region, where cluster 2 begins.
    fn data_offset(&self) -> u64 {
        (self.reserved_sectors + self.num_fats * self.fat_size_sectors + self.root_dir_sectors())
            * self.bytes_per_sector
    }

    fn total_clusters(&self) -> u64 {
        let meta = self.reserved_sectors
            + self.num_fats * self.fat_size_sectors
            + self.root_dir_sectors();
        self.total_sectors.saturating_sub(meta) / self.sectors_per_cluster
    }
}

/// FAT entry for `cluster`, already masked to the entry width.
fn fat_entry(fat: &[u8], cluster: u64, family: FsFamily) -> Option<u32> {
    match family {
        FsFamily::Fat32 => {
            let at = (cluster * 4) as usize;
            let raw = u32::from_le_bytes([
                *fat.get(at)?,
                *fat.get(at + 1)?,
                *fat.get(at + 2)?,
                *fat.get(at + 3)?,
            ]);
            Some(raw & 0x0FFF_FFFF)
        }
        FsFamily::Fat16 => {
            let at = (cluster * 2) as usize;
            Some(u16::from_le_bytes([*fat.get(at)?, *fat.get(at + 1)?]) as u32)
        }
        FsFamily::Fat12 => {
            let at = (cluster * 3 / 2) as usize;
            let lo = *fat.get(at)? as u32;
            let hi = *fat.get(at + 1)? as u32;
            Some(if cluster % 2 == 0 {
                lo | ((hi & 0x0F) << 8)
            } else {
                (lo >> 4) | (hi << 4)
            })
        }
        _ => None,
    }
}

fn free_ranges_from_fat(
    fat: &[u8],
    bpb: &Bpb,
    family: FsFamily,
) -> (Vec<(u64, u64)>, u64) {
    let total_clusters = bpb.total_clusters();
    let cluster_size = bpb.cluster_size();
    let data_offset = bpb.data_offset();
    // Entries 0 and 1 are reserved; usable clusters start at 2.
    let last = total_clusters + 2;

    let mut ranges = Vec::new();
    let mut free_count = 0u64;
    let mut run_start: Option<u64> = None;
    for cluster in 2..last {
        let entry = fat_entry(fat, cluster, family);
        let free = entry == Some(0);
        if free {
            free_count += 1;
            if run_start.is_none() {
                run_start = Some(cluster);
            }
        } else if let Some(start) = run_start.take() {
            ranges.push((
                data_offset + (start - 2) * cluster_size,
                data_offset + (cluster - 2) * cluster_size,
            ));
        }
        if entry.is_none() {
            break;
        }
    }
    if let Some(start) = run_start {
        ranges.push((
            data_offset + (start - 2) * cluster_size,
            data_offset + (last - 2) * cluster_size,
        ));
    }
    (ranges, free_count)
}

fn parse_common(
    source: &dyn BlockSource,
    bpb: Bpb,
    family: FsFamily,
) -> Result<FilesystemInfo, FsError> {
    let entry_bytes = match family {
        FsFamily::Fat32 => (bpb.total_clusters() + 2) * 4,
        FsFamily::Fat16 => (bpb.total_clusters() + 2) * 2,
        _ => (bpb.total_clusters() + 2) * 3 / 2 + 2,
    };
    let fat_bytes = entry_bytes
        .min(bpb.fat_size_sectors * bpb.bytes_per_sector)
        .min(FAT_READ_CAP);
    let fat = source.read_at(bpb.fat_offset(), fat_bytes as usize)?;
    if fat.len() < 8 {
        return Err(FsError::invalid("FAT", "file allocation table unreadable"));
    }

    let (free_ranges, free_clusters) = free_ranges_from_fat(&fat, &bpb, family);
    let free_bytes = free_ranges.iter().map(|&(s, e)| e - s).sum();

    Ok(FilesystemInfo {
        family,
        cluster_size: bpb.cluster_size(),
        total_clusters: bpb.total_clusters(),
        free_clusters,
        free_ranges,
        free_bytes,
    })
}

pub(crate) fn parse_fat32(
    source: &dyn BlockSource,
    boot: &[u8],
) -> Result<FilesystemInfo, FsError> {
    let bpb = Bpb::parse(boot, true)?;
    parse_common(source, bpb, FsFamily::Fat32)
}

pub(crate) fn parse_fat12_16(
    source: &dyn BlockSource,
    boot: &[u8],
    family: FsFamily,
) -> Result<FilesystemInfo, FsError> {
    let bpb = Bpb::parse(boot, false)?;
    parse_common(source, bpb, family)
}
