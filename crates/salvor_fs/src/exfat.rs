//! exFAT free-space prober.
//!
//! The allocation bitmap is not at a fixed location: a root-directory
//! entry of type 0x81 names its first cluster and byte length. One bit
//! per cluster, bit 0 = free, bit 0 of byte 0 = cluster 2.

use crate::bitmap::{bitmap_free_runs, runs_to_byte_ranges};
use crate::{FilesystemInfo, FsError, FsFamily};
use byteorder::{LittleEndian, ReadBytesExt};
use salvor_core::BlockSource;
use std::io::Cursor;

/// Root directory scan cap: entry walks stop after 16 clusters or
/// 512 KiB, whichever is smaller.
const ROOT_DIR_READ_CAP: usize = 512 * 1024;
const BITMAP_READ_CAP: u64 = 256 * 1024 * 1024;

struct BootSector {
    bytes_per_cluster: u64,
    heap_offset: u64,
    cluster_count: u32,
    root_cluster: u32,
}

fn parse_boot(boot: &[u8]) -> Result<BootSector, FsError> {
    let mut cursor = Cursor::new(boot);
    cursor.set_position(88);
    let cluster_heap_offset = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| FsError::invalid("exFAT", e.to_string()))?;
    let cluster_count = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| FsError::invalid("exFAT", e.to_string()))?;
    let root_cluster = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| FsError::invalid("exFAT", e.to_string()))?;

    let bytes_per_sector_shift = boot[108];
    let sectors_per_cluster_shift = boot[109];
    if bytes_per_sector_shift < 9
        || bytes_per_sector_shift > 12
        || sectors_per_cluster_shift > 25 - bytes_per_sector_shift
    {
        return Err(FsError::invalid("exFAT", "implausible sector/cluster shifts"));
    }
    let bytes_per_sector = 1u64 << bytes_per_sector_shift;
    let bytes_per_cluster = bytes_per_sector << sectors_per_cluster_shift;
    if root_cluster < 2 || cluster_count == 0 {
        return Err(FsError::invalid("exFAT", "empty cluster heap"));
    }

    Ok(BootSector {
        bytes_per_cluster,
        heap_offset: cluster_heap_offset as u64 * bytes_per_sector,
        cluster_count,
        root_cluster,
    })
}

fn cluster_offset(boot: &BootSector, cluster: u32) -> u64 {
    boot.heap_offset + (cluster as u64 - 2) * boot.bytes_per_cluster
}

/// Scans the root directory for the Allocation Bitmap entry (0x81):
/// first cluster at +20, data length at +24.
fn find_bitmap_entry(
    source: &dyn BlockSource,
    boot: &BootSector,
) -> Result<Option<(u32, u64)>, FsError> {
    let read_cap = (16 * boot.bytes_per_cluster as usize).min(ROOT_DIR_READ_CAP);
    let root = source.read_at(cluster_offset(boot, boot.root_cluster), read_cap)?;

    for entry in root.chunks_exact(32) {
        match entry[0] {
            0x81 => {
                let first_cluster = u32::from_le_bytes([entry[20], entry[21], entry[22], entry[23]]);
                let data_length = u64::from_le_bytes([
                    entry[24], entry[25], entry[26], entry[27], entry[28], entry[29], entry[30],
                    entry[31],
                ]);
                return Ok(Some((first_cluster, data_length)));
            }
            0x00 => break,
            _ => {}
        }
    }
    Ok(None)
}

pub(crate) fn parse(source: &dyn BlockSource, boot_bytes: &[u8]) -> Result<FilesystemInfo, FsError> {
    let boot = parse_boot(boot_bytes)?;

    let Some((bitmap_cluster, data_length)) = find_bitmap_entry(source, &boot)? else {
        return Err(FsError::invalid(
            "exFAT",
            "allocation bitmap entry not found in root directory",
        ));
    };
    if bitmap_cluster < 2 {
        return Err(FsError::invalid("exFAT", "bitmap cluster out of heap"));
    }

    let needed = (boot.cluster_count as u64).div_ceil(8);
    let to_read = data_length.min(needed).min(BITMAP_READ_CAP);
    let bitmap = source.read_at(cluster_offset(&boot, bitmap_cluster), to_read as usize)?;

    let (runs, free_count) = bitmap_free_runs(&bitmap, boot.cluster_count as u64);
    let free_ranges = runs_to_byte_ranges(&runs, boot.bytes_per_cluster, boot.heap_offset);
    let free_bytes = free_ranges.iter().map(|&(s, e)| e - s).sum();

    tracing::debug!(
        clusters = boot.cluster_count,
        free = free_count,
        ranges = free_ranges.len(),
        "exFAT bitmap decoded"
    );

    Ok(FilesystemInfo {
        family: FsFamily::ExFat,
        cluster_size: boot.bytes_per_cluster,
        total_clusters: boot.cluster_count as u64,
        free_clusters: free_count,
        free_ranges,
        free_bytes,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use salvor_core::MemSource;

    #[test]
    fn test_exfat_three_free_runs() {
        // 16 clusters; root dir + bitmap clusters allocated, plus a
        // block in the middle: free runs at 2..6, 8..12, 14..16
        // (cluster numbers counted from 2).
        let mut bits = vec![false; 16];
        bits[0] = true; // cluster 2 (root dir)
        bits[1] = true; // cluster 3 (bitmap)
        bits[6] = true; // cluster 8
        bits[7] = true; // cluster 9
        bits[12] = true; // cluster 14
        bits[13] = true; // cluster 15
        let img = testimg::build(16, &bits);
        let source = MemSource::new(img);

        let info = crate::probe(&source).unwrap();
        assert_eq!(info.family, FsFamily::ExFat);
        assert_eq!(info.cluster_size, 512);
        assert_eq!(info.free_clusters, 10);
        assert_eq!(info.free_ranges.len(), 3);

        // Sorted, disjoint, and summing to free_clusters * cluster_size.
        assert!(info.free_ranges.windows(2).all(|w| w[0].1 <= w[1].0));
        assert_eq!(info.free_bytes, info.free_clusters * info.cluster_size);

        // Heap starts at sector 4; first free cluster is cluster 4
        // (bit index 2), i.e. byte 4*512 + 2*512.
        assert_eq!(info.free_ranges[0], (4 * 512 + 2 * 512, 4 * 512 + 6 * 512));
    }

    #[test]
    fn test_exfat_missing_bitmap_entry() {
        let mut img = testimg::build(8, &[false; 8]);
        // Wipe the 0x81 entry type.
        let heap = 4 * 512;
        img[heap] = 0x00;
        let source = MemSource::new(img);
        assert!(matches!(
            crate::probe(&source),
            Err(FsError::InvalidStructure { .. })
        ));
    }
}
