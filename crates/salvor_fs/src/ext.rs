//! ext2/3/4 free-space prober.
//!
//! Free blocks come from the per-group block bitmaps, located through
//! the group descriptor table. 64-bit volumes widen the descriptors
//! and split the bitmap block number across lo/hi halves.

use crate::bitmap::bitmap_free_runs;
use crate::{FilesystemInfo, FsError, FsFamily};
use byteorder::{LittleEndian, ReadBytesExt};
use salvor_core::BlockSource;
use std::io::Cursor;

pub(crate) const COMPAT_HAS_JOURNAL: u32 = 0x0004;
pub(crate) const INCOMPAT_EXTENTS: u32 = 0x0040;
const INCOMPAT_64BIT: u32 = 0x0080;

const SUPERBLOCK_OFFSET: u64 = 1024;
const MAX_GROUPS: u64 = 1 << 20;

struct Superblock {
    block_size: u64,
    total_blocks: u64,
    blocks_per_group: u64,
    first_data_block: u64,
    desc_size: u64,
    is_64bit: bool,
}

fn read_u32_at(cursor: &mut Cursor<&[u8]>, at: u64) -> Result<u32, FsError> {
    cursor.set_position(at);
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| FsError::invalid("ext", e.to_string()))
}

fn parse_superblock(sb: &[u8]) -> Result<Superblock, FsError> {
    if sb.len() < 264 {
        return Err(FsError::invalid("ext", "superblock too small"));
    }
    let mut cursor = Cursor::new(sb);
    let blocks_count_lo = read_u32_at(&mut cursor, 4)? as u64;
    let first_data_block = read_u32_at(&mut cursor, 20)? as u64;
    let log_block_size = read_u32_at(&mut cursor, 24)?;
    let blocks_per_group = read_u32_at(&mut cursor, 32)? as u64;
    let incompat = read_u32_at(&mut cursor, 96)?;

    if log_block_size > 6 {
        return Err(FsError::invalid("ext", "implausible block size"));
    }
    let block_size = 1024u64 << log_block_size;
    if blocks_per_group == 0 || blocks_per_group > block_size * 8 {
        return Err(FsError::invalid("ext", "implausible blocks per group"));
    }

    let is_64bit = incompat & INCOMPAT_64BIT != 0;
    let (total_blocks, desc_size) = if is_64bit && sb.len() >= 352 {
        let blocks_count_hi = read_u32_at(&mut cursor, 336)? as u64;
        cursor.set_position(254);
        let desc_size = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| FsError::invalid("ext", e.to_string()))? as u64;
        (
            blocks_count_lo | (blocks_count_hi << 32),
            desc_size.max(32),
        )
    } else {
        (blocks_count_lo, 32)
    };
    if total_blocks == 0 {
        return Err(FsError::invalid("ext", "zero block count"));
    }

    Ok(Superblock {
        block_size,
        total_blocks,
        blocks_per_group,
        first_data_block,
        desc_size,
        is_64bit,
    })
}

pub(crate) fn parse(
    source: &dyn BlockSource,
    family: FsFamily,
) -> Result<FilesystemInfo, FsError> {
    let sb_bytes = source.read_at(SUPERBLOCK_OFFSET, 1024)?;
    let sb = parse_superblock(&sb_bytes)?;

    let num_groups = sb
        .total_blocks
        .div_ceil(sb.blocks_per_group)
        .min(MAX_GROUPS);

    // The GDT follows the block holding the superblock.
    let gdt_offset = if sb.block_size == 1024 {
        2 * sb.block_size
    } else {
        sb.block_size
    };
    let gdt = source.read_at(gdt_offset, (num_groups * sb.desc_size) as usize)?;
    let readable_groups = (gdt.len() as u64 / sb.desc_size).min(num_groups);

    let mut free_ranges: Vec<(u64, u64)> = Vec::new();
    let mut free_count = 0u64;

    for group in 0..readable_groups {
        let desc = &gdt[(group * sb.desc_size) as usize..];
        if desc.len() < 8 {
            break;
        }
        let bitmap_lo = u32::from_le_bytes([desc[0], desc[1], desc[2], desc[3]]) as u64;
        let bitmap_block = if sb.is_64bit && sb.desc_size >= 40 && desc.len() >= 36 {
            let hi = u32::from_le_bytes([desc[32], desc[33], desc[34], desc[35]]) as u64;
            bitmap_lo | (hi << 32)
        } else {
            bitmap_lo
        };
        if bitmap_block == 0 || bitmap_block >= sb.total_blocks + sb.first_data_block {
            // Descriptor is garbage; skip the group, keep the rest.
            tracing::debug!(group, bitmap_block, "skipping group with invalid descriptor");
            continue;
        }

        let group_start = sb.first_data_block + group * sb.blocks_per_group;
        let blocks_in_group = sb
            .blocks_per_group
            .min(sb.total_blocks.saturating_sub(group * sb.blocks_per_group));
        if blocks_in_group == 0 {
            break;
        }
        let bitmap_bytes = blocks_in_group.div_ceil(8).min(sb.block_size);
        let bitmap = source.read_at(bitmap_block * sb.block_size, bitmap_bytes as usize)?;

        let (runs, group_free) = bitmap_free_runs(&bitmap, blocks_in_group);
        free_count += group_free;
        for (start, end) in runs {
            free_ranges.push((
                (group_start + start) * sb.block_size,
                (group_start + end) * sb.block_size,
            ));
        }
    }

    let free_bytes = free_ranges.iter().map(|&(s, e)| e - s).sum();

    tracing::debug!(
        family = %family,
        blocks = sb.total_blocks,
        groups = readable_groups,
        free = free_count,
        "ext block bitmaps decoded"
    );

    Ok(FilesystemInfo {
        family,
        cluster_size: sb.block_size,
        total_clusters: sb.total_blocks,
        free_clusters: free_count,
        free_ranges,
        free_bytes,
    })
}

#[cfg(test)]
pub(crate) mod testimg {
    /// ext2 fixture: 1 KiB blocks, one block group. The block bitmap
    /// lives in block 3; `allocated` lists absolute block numbers
    /// (counted from `first_data_block` = 1).
    pub fn build_ext2(total_blocks: u32, allocated: &[u32]) -> Vec<u8> {
        let block_size = 1024usize;
        let mut img = vec![0u8; (total_blocks as usize + 1) * block_size];

        // Superblock at 1024.
        let sb = 1024;
        img[sb + 4..sb + 8].copy_from_slice(&total_blocks.to_le_bytes());
        img[sb + 20..sb + 24].copy_from_slice(&1u32.to_le_bytes()); // first_data_block
        img[sb + 24..sb + 28].copy_from_slice(&0u32.to_le_bytes()); // 1 KiB blocks
        img[sb + 32..sb + 36].copy_from_slice(&8192u32.to_le_bytes()); // blocks per group
        img[sb + 56..sb + 58].copy_from_slice(&0xEF53u16.to_le_bytes());

        // Group descriptor table in block 2 (block size 1024).
        let gdt = 2 * block_size;
        img[gdt..gdt + 4].copy_from_slice(&3u32.to_le_bytes()); // block bitmap at block 3

        // Block bitmap in block 3; bit i covers absolute block 1 + i.
        let bitmap = 3 * block_size;
        for &block in allocated {
            let bit = block - 1;
            img[bitmap + (bit / 8) as usize] |= 1 << (bit % 8);
        }
        img
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salvor_core::MemSource;

    #[test]
    fn test_ext2_free_runs() {
        // 32 blocks, metadata blocks 1..=3 and blocks 10..=13 allocated.
        let allocated: Vec<u32> = (1..=3).chain(10..=13).collect();
        let img = testimg::build_ext2(32, &allocated);
        let source = MemSource::new(img);

        let info = crate::probe(&source).unwrap();
        assert_eq!(info.family, FsFamily::Ext2);
        assert_eq!(info.cluster_size, 1024);
        assert_eq!(info.total_clusters, 32);
        assert_eq!(info.free_clusters, 32 - 7);
        assert!(info.free_ranges.windows(2).all(|w| w[0].1 <= w[1].0));
        // First free block is absolute block 4.
        assert_eq!(info.free_ranges[0].0, 4 * 1024);
        assert_eq!(info.free_bytes, info.free_clusters * 1024);
    }

    #[test]
    fn test_ext_invalid_descriptor_skipped() {
        let mut img = testimg::build_ext2(32, &[1, 2, 3]);
        // Point the bitmap far outside the volume.
        let gdt = 2048;
        img[gdt..gdt + 4].copy_from_slice(&0xFFFF_FFu32.to_le_bytes());
        let source = MemSource::new(img);
        let info = crate::probe(&source).unwrap();
        // Group skipped defensively: no ranges, not an error.
        assert!(info.free_ranges.is_empty());
        assert_eq!(info.free_clusters, 0);
    }

    #[test]
    fn test_superblock_guards() {
        let mut sb = vec![0u8; 1024];
        sb[24] = 60; // log_block_size way out of range
        assert!(parse_superblock(&sb).is_err());
    }

    #[test]
    fn test_superblock_64bit_block_count() {
        let mut sb = vec![0u8; 1024];
        sb[4..8].copy_from_slice(&0x100u32.to_le_bytes()); // blocks lo
        sb[24..28].copy_from_slice(&2u32.to_le_bytes()); // 4 KiB blocks
        sb[32..36].copy_from_slice(&32768u32.to_le_bytes());
        sb[96..100].copy_from_slice(&INCOMPAT_64BIT.to_le_bytes());
        sb[336..340].copy_from_slice(&1u32.to_le_bytes()); // blocks hi
        sb[254..256].copy_from_slice(&64u16.to_le_bytes()); // desc size

        let parsed = parse_superblock(&sb).unwrap();
        assert!(parsed.is_64bit);
        assert_eq!(parsed.block_size, 4096);
        assert_eq!(parsed.total_blocks, (1u64 << 32) | 0x100);
        assert_eq!(parsed.desc_size, 64);
    }
}
