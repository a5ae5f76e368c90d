//! NTFS free-space prober.
//!
//! The cluster allocation state lives in `$Bitmap`, MFT record #6.
//! Reading it requires the multi-sector fixup and, for the usual
//! non-resident `$DATA` attribute, the signed run-list decoding.

use crate::bitmap::{bitmap_free_runs, runs_to_byte_ranges};
use crate::{FilesystemInfo, FsError, FsFamily};
use byteorder::{LittleEndian, ReadBytesExt};
use salvor_core::BlockSource;
use std::io::Cursor;

const ATTR_DATA: u32 = 0x80;
const ATTR_END: u32 = 0xFFFF_FFFF;
const BITMAP_READ_CAP: u64 = 256 * 1024 * 1024;

struct BootSector {
    bytes_per_cluster: u64,
    total_clusters: u64,
    mft_offset: u64,
    file_record_size: u64,
}

fn parse_boot(boot: &[u8]) -> Result<BootSector, FsError> {
    let mut cursor = Cursor::new(boot);
    cursor.set_position(11);
    let bytes_per_sector = cursor
        .read_u16::<LittleEndian>()
        .map_err(|e| FsError::invalid("NTFS", e.to_string()))? as u64;
    let sectors_per_cluster = boot[13] as u64;
    cursor.set_position(40);
    let total_sectors = cursor
        .read_u64::<LittleEndian>()
        .map_err(|e| FsError::invalid("NTFS", e.to_string()))?;
    let mft_cluster = cursor
        .read_u64::<LittleEndian>()
        .map_err(|e| FsError::invalid("NTFS", e.to_string()))?;

    if bytes_per_sector < 512 || sectors_per_cluster == 0 || total_sectors == 0 {
        return Err(FsError::invalid("NTFS", "implausible boot sector"));
    }
    let bytes_per_cluster = bytes_per_sector * sectors_per_cluster;

    // Clusters-per-record is a signed byte; negative means 2^|v| bytes.
    let raw = boot[64];
    let file_record_size = if raw < 0x80 {
        raw as u64 * bytes_per_cluster
    } else {
        1u64 << (256 - raw as u64)
    };
    if file_record_size == 0 || file_record_size > 1024 * 1024 {
        return Err(FsError::invalid("NTFS", "implausible file record size"));
    }

    Ok(BootSector {
        bytes_per_cluster,
        total_clusters: total_sectors / sectors_per_cluster,
        mft_offset: mft_cluster * bytes_per_cluster,
        file_record_size,
    })
}

/// Substitutes the trailing 2 bytes of each 512-byte sub-sector from
/// the update-sequence array when the stored placeholder matches.
fn apply_fixups(entry: &mut [u8]) {
    if entry.len() < 48 {
        return;
    }
    let usa_offset = u16::from_le_bytes([entry[4], entry[5]]) as usize;
    let usa_count = u16::from_le_bytes([entry[6], entry[7]]) as usize;
    if usa_count <= 1 || usa_offset + usa_count * 2 > entry.len() {
        return;
    }
    let signature = [entry[usa_offset], entry[usa_offset + 1]];
    for i in 1..usa_count {
        let sector_end = i * 512 - 2;
        if sector_end + 2 > entry.len() {
            break;
        }
        if entry[sector_end..sector_end + 2] == signature {
            let fix = [entry[usa_offset + i * 2], entry[usa_offset + i * 2 + 1]];
            entry[sector_end..sector_end + 2].copy_from_slice(&fix);
        }
    }
}

/// Decodes a run list into `(lcn, cluster_count)` pairs.
///
/// The header byte's low nibble is the length-field width, the high
/// nibble the offset-field width; offsets are signed and relative to
/// the previous run's LCN. A zero offset width marks a sparse run.
fn parse_data_runs(data: &[u8]) -> Vec<(u64, u64)> {
    let mut runs = Vec::new();
    let mut pos = 0usize;
    let mut current_lcn = 0i64;

    while pos < data.len() {
        let header = data[pos];
        if header == 0 {
            break;
        }
        let length_size = (header & 0x0F) as usize;
        let offset_size = (header >> 4) as usize;
        pos += 1;
        if length_size == 0 || length_size > 8 || offset_size > 8 {
            break;
        }
        if pos + length_size + offset_size > data.len() {
            break;
        }

        let mut count = 0u64;
        for i in (0..length_size).rev() {
            count = (count << 8) | data[pos + i] as u64;
        }
        pos += length_size;

        if offset_size == 0 {
            // Sparse run, no physical clusters.
            continue;
        }
        let mut offset = 0i64;
        for i in (0..offset_size).rev() {
            offset = (offset << 8) | data[pos + i] as i64;
        }
        // Sign-extend from the top bit of the encoded width.
        let shift = 64 - offset_size * 8;
        offset = (offset << shift) >> shift;
        pos += offset_size;

        current_lcn += offset;
        if count > 0 && current_lcn >= 0 {
            runs.push((current_lcn as u64, count));
        }
    }
    runs
}

/// Reads `$Bitmap`'s `$DATA` content, resident or via data runs.
fn read_bitmap(source: &dyn BlockSource, boot: &BootSector) -> Result<Vec<u8>, FsError> {
    let record_at = boot.mft_offset + 6 * boot.file_record_size;
    let mut entry = source.read_at(record_at, boot.file_record_size as usize)?;
    if entry.len() < 48 || &entry[..4] != b"FILE" {
        return Err(FsError::invalid("NTFS", "$Bitmap record missing FILE signature"));
    }
    apply_fixups(&mut entry);

    let mut pos = u16::from_le_bytes([entry[20], entry[21]]) as usize;
    while pos + 16 <= entry.len() {
        let attr_type =
            u32::from_le_bytes([entry[pos], entry[pos + 1], entry[pos + 2], entry[pos + 3]]);
        let attr_length = u32::from_le_bytes([
            entry[pos + 4],
            entry[pos + 5],
            entry[pos + 6],
            entry[pos + 7],
        ]) as usize;
        if attr_type == ATTR_END || attr_length == 0 {
            break;
        }
        if attr_type == ATTR_DATA {
            let non_resident = entry[pos + 8];
            if non_resident == 0 {
                let content_size = u32::from_le_bytes([
                    entry[pos + 16],
                    entry[pos + 17],
                    entry[pos + 18],
                    entry[pos + 19],
                ]) as usize;
                let content_offset = u16::from_le_bytes([entry[pos + 20], entry[pos + 21]]) as usize;
                let start = pos + content_offset;
                let end = (start + content_size).min(entry.len());
                return Ok(entry[start.min(entry.len())..end].to_vec());
            }

            if pos + 56 > entry.len() {
                break;
            }
            let data_size = u64::from_le_bytes([
                entry[pos + 48],
                entry[pos + 49],
                entry[pos + 50],
                entry[pos + 51],
                entry[pos + 52],
                entry[pos + 53],
                entry[pos + 54],
                entry[pos + 55],
            ]);
            let run_offset = u16::from_le_bytes([entry[pos + 32], entry[pos + 33]]) as usize;
            if pos + run_offset >= entry.len() {
                break;
            }
            let runs = parse_data_runs(&entry[pos + run_offset..]);
            let capped = data_size.min(BITMAP_READ_CAP);

            let mut bitmap = Vec::with_capacity(capped as usize);
            for (lcn, count) in runs {
                let bytes = count * boot.bytes_per_cluster;
                let chunk = source.read_at(lcn * boot.bytes_per_cluster, bytes as usize)?;
                bitmap.extend_from_slice(&chunk);
                if bitmap.len() as u64 >= capped {
                    break;
                }
            }
            bitmap.truncate(capped as usize);
            return Ok(bitmap);
        }
        pos += attr_length;
    }
    Err(FsError::invalid("NTFS", "$Bitmap has no $DATA attribute"))
}

pub(crate) fn parse(source: &dyn BlockSource, boot_bytes: &[u8]) -> Result<FilesystemInfo, FsError> {
    let boot = parse_boot(boot_bytes)?;
    let bitmap = read_bitmap(source, &boot)?;
    if bitmap.is_empty() {
        return Err(FsError::invalid("NTFS", "empty $Bitmap"));
    }

    // LCN 0 is the boot cluster; the bitmap covers clusters from 0.
    let (runs, free_count) = bitmap_free_runs(&bitmap, boot.total_clusters);
    let free_ranges = runs_to_byte_ranges(&runs, boot.bytes_per_cluster, 0);
    let free_bytes = free_ranges.iter().map(|&(s, e)| e - s).sum();

    tracing::debug!(
        clusters = boot.total_clusters,
        free = free_count,
        ranges = free_ranges.len(),
        "NTFS $Bitmap decoded"
    );

    Ok(FilesystemInfo {
        family: FsFamily::Ntfs,
        cluster_size: boot.bytes_per_cluster,
        total_clusters: boot.total_clusters,
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
    fn test_data_run_decoding_with_negative_offset() {
        // len 1 @ +40, then len 1 @ -5 => LCNs 40 and 35.
        let runs = parse_data_runs(&[0x11, 1, 40, 0x11, 1, 0xFB, 0x00]);
        assert_eq!(runs, vec![(40, 1), (35, 1)]);
    }

    #[test]
    fn test_data_run_sparse_skipped() {
        // Sparse run (offset size 0) contributes nothing physical.
        let runs = parse_data_runs(&[0x01, 4, 0x11, 2, 10, 0x00]);
        assert_eq!(runs, vec![(10, 2)]);
    }

    #[test]
    fn test_fixup_roundtrip() {
        let mut entry = vec![0u8; 1024];
        entry[..4].copy_from_slice(b"FILE");
        entry[4..6].copy_from_slice(&48u16.to_le_bytes());
        entry[6..8].copy_from_slice(&3u16.to_le_bytes());
        entry[48..50].copy_from_slice(&0xABCDu16.to_le_bytes());
        // True values 0x1111 / 0x2222 recorded in the USA.
        entry[50..52].copy_from_slice(&0x1111u16.to_le_bytes());
        entry[52..54].copy_from_slice(&0x2222u16.to_le_bytes());
        entry[510..512].copy_from_slice(&0xABCDu16.to_le_bytes());
        entry[1022..1024].copy_from_slice(&0xABCDu16.to_le_bytes());

        apply_fixups(&mut entry);
        assert_eq!(u16::from_le_bytes([entry[510], entry[511]]), 0x1111);
        assert_eq!(u16::from_le_bytes([entry[1022], entry[1023]]), 0x2222);
    }

    #[test]
    fn test_ntfs_probe_two_run_bitmap() {
        // 6 KiB of bitmap bits would be overkill; use 768 bytes so the
        // $DATA content spans both runs (512 + 256).
        let mut bitmap = vec![0xFFu8; 768];
        // Clusters 64..128 free (bytes 8..16 of the bitmap).
        for byte in &mut bitmap[8..16] {
            *byte = 0;
        }
        // Clusters 4160..4288 free: bytes 520..536 live in the second
        // (negative-offset) run.
        for byte in &mut bitmap[520..536] {
            *byte = 0;
        }
        let total_clusters = 768 * 8;
        let (img, _) = testimg::build(total_clusters as u64, &bitmap);
        let source = MemSource::new(img);

        let info = crate::probe(&source).unwrap();
        assert_eq!(info.family, FsFamily::Ntfs);
        assert_eq!(info.cluster_size, 512);
        assert_eq!(info.free_clusters, (8 + 16) * 8);
        assert_eq!(
            info.free_ranges,
            vec![
                (64 * 512, 128 * 512),
                (4160 * 512, 4288 * 512),
            ]
        );
        assert_eq!(info.free_bytes, info.free_clusters * 512);
    }
}
