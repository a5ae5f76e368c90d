//! Synthetic images shared by the engine integration tests.
//!
//! The filler cycles through 0x10..=0x7F so consecutive bytes differ by
//! one: no multi-byte magic can appear by accident, and samples carry
//! ~6.8 bits/byte of entropy.

#![allow(dead_code)]

pub fn filler(len: usize) -> Vec<u8> {
    (0..len).map(|i| (0x10 + (i % 112)) as u8).collect()
}

/// Structurally valid JPEG of exactly `total` bytes.
pub fn build_jpeg(total: usize) -> Vec<u8> {
    assert!(total >= 64);
    let mut data = Vec::with_capacity(total);
    data.extend_from_slice(&[0xFF, 0xD8]);
    data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
    data.extend_from_slice(b"JFIF\x00");
    data.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);
    data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08, 0x01, 0x00, 0x01, 0x00, 0x03]);
    data.extend_from_slice(&[0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
    data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x0C, 0x03]);
    data.extend_from_slice(&[0x01, 0x00, 0x02, 0x11, 0x03, 0x11]);
    data.extend_from_slice(&[0x00, 0x3F, 0x00]);
    let body = total - data.len() - 2;
    data.extend(filler(body));
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

fn png_chunk(out: &mut Vec<u8>, chunk_type: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(chunk_type);
    out.extend_from_slice(payload);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(payload);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
}

/// PNG of exactly `total` bytes with correct chunk CRCs.
pub fn build_png(total: usize) -> Vec<u8> {
    assert!(total >= 58);
    let mut data = Vec::with_capacity(total);
    data.extend_from_slice(b"\x89PNG\r\n\x1A\n");
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&256u32.to_be_bytes());
    ihdr.extend_from_slice(&256u32.to_be_bytes());
    ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
    png_chunk(&mut data, b"IHDR", &ihdr);
    let idat_payload = total - data.len() - 12 - 12;
    png_chunk(&mut data, b"IDAT", &filler(idat_payload));
    png_chunk(&mut data, b"IEND", &[]);
    data
}

/// ISO-BMFF file: ftyp + mdat + one trailing box. Box sizes include
/// their 8-byte headers.
pub fn build_isobmff_with(
    brand: &[u8; 4],
    mdat_total: usize,
    second_type: &[u8; 4],
    second_total: usize,
) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&24u32.to_be_bytes());
    data.extend_from_slice(b"ftyp");
    data.extend_from_slice(brand);
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(brand);
    data.extend_from_slice(&(mdat_total as u32).to_be_bytes());
    data.extend_from_slice(b"mdat");
    data.extend(filler(mdat_total - 8));
    data.extend_from_slice(&(second_total as u32).to_be_bytes());
    data.extend_from_slice(second_type);
    data.extend(filler(second_total - 8));
    data
}

pub fn build_isobmff(brand: &[u8; 4], mdat_total: usize, moov_total: usize) -> Vec<u8> {
    build_isobmff_with(brand, mdat_total, b"moov", moov_total)
}

/// exFAT volume image: 512-byte sectors, `1 << spc_shift` sectors per
/// cluster, cluster heap at sector 4, root directory in cluster 2 and
/// the allocation bitmap in cluster 3. Every cluster is allocated
/// except the given `(start_bit, end_bit)` bitmap index ranges
/// (bit `i` covers the cluster at `heap + i * cluster_size`).
pub fn build_exfat(cluster_count: u32, spc_shift: u8, free_bit_ranges: &[(u32, u32)]) -> Vec<u8> {
    let cluster_size = 512usize << spc_shift;
    let heap_offset_sectors = 4u32;
    let heap = heap_offset_sectors as usize * 512;
    let total = heap + cluster_count as usize * cluster_size;
    let mut img = vec![0u8; total];

    img[3..11].copy_from_slice(b"EXFAT   ");
    img[88..92].copy_from_slice(&heap_offset_sectors.to_le_bytes());
    img[92..96].copy_from_slice(&cluster_count.to_le_bytes());
    img[96..100].copy_from_slice(&2u32.to_le_bytes()); // root cluster
    img[108] = 9;
    img[109] = spc_shift;
    img[510] = 0x55;
    img[511] = 0xAA;

    // Root directory entry for the allocation bitmap (type 0x81).
    let bitmap_len = (cluster_count as u64).div_ceil(8);
    img[heap] = 0x81;
    img[heap + 20..heap + 24].copy_from_slice(&3u32.to_le_bytes());
    img[heap + 24..heap + 32].copy_from_slice(&bitmap_len.to_le_bytes());

    // Bitmap in cluster 3: everything allocated, then free ranges
    // punched out.
    let bitmap_at = heap + cluster_size;
    for i in 0..cluster_count as usize {
        img[bitmap_at + i / 8] |= 1 << (i % 8);
    }
    for &(start, end) in free_bit_ranges {
        for i in start..end {
            img[bitmap_at + (i / 8) as usize] &= !(1 << (i % 8));
        }
    }
    img
}
