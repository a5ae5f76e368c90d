//! Shared builders for synthetic test files.
//!
//! The filler cycles through 0x10..=0x7F so consecutive bytes differ by
//! exactly one: no multi-byte magic or marker sequence can appear by
//! accident, and any 4 KiB window has ~6.8 bits/byte of entropy.

/// Deterministic body bytes free of magic collisions.
pub fn filler(len: usize) -> Vec<u8> {
    (0..len).map(|i| (0x10 + (i % 112)) as u8).collect()
}

/// Minimal structurally-valid JPEG of exactly `total` bytes:
/// SOI + APP0 + SOF0 + SOS + scan filler + EOI.
pub fn build_jpeg(total: usize) -> Vec<u8> {
    assert!(total >= 64);
    let mut data = Vec::with_capacity(total);
    data.extend_from_slice(&[0xFF, 0xD8]);
    // APP0, 16 bytes of length-counted payload
    data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
    data.extend_from_slice(b"JFIF\x00");
    data.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00]);
    // SOF0: 8-bit precision, 256x256, 3 components
    data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08, 0x01, 0x00, 0x01, 0x00, 0x03]);
    data.extend_from_slice(&[0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
    // SOS: 3 components
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

/// Minimal PNG of exactly `total` bytes with IHDR, one IDAT and IEND.
/// The IDAT payload is filler, not real zlib, but every CRC is correct.
pub fn build_png(total: usize) -> Vec<u8> {
    assert!(total >= 8 + 25 + 12 + 13);
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

/// ISO-BMFF file: `ftyp` with the given major brand, an `mdat` of
/// `mdat_total` bytes and a second box of `second_total` bytes.
/// Box totals include their 8-byte headers.
pub fn build_isobmff_with(
    brand: &[u8; 4],
    mdat_total: usize,
    second_type: &[u8; 4],
    second_total: usize,
) -> Vec<u8> {
    assert!(mdat_total >= 8 && second_total >= 8);
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

/// ISO-BMFF file with `moov` as the trailing box.
pub fn build_isobmff(brand: &[u8; 4], mdat_total: usize, moov_total: usize) -> Vec<u8> {
    build_isobmff_with(brand, mdat_total, b"moov", moov_total)
}

/// MPEG program stream of exactly `total` bytes: MPEG-2 pack header,
/// 2048-byte PES-framed blocks, trailing end code.
pub fn build_mpeg_ps(total: usize) -> Vec<u8> {
    assert!(total >= 4096 && total % 2048 == 0);
    let mut data = Vec::with_capacity(total);
    // Pack header with MPEG-2 '01' marker bits in the SCR field.
    data.extend_from_slice(&[
        0x00, 0x00, 0x01, 0xBA, 0x44, 0x00, 0x04, 0x00, 0x04, 0x01, 0x00, 0x00, 0x03, 0xF8,
    ]);
    while data.len() + 2048 <= total {
        let mut block = Vec::with_capacity(2048);
        block.extend_from_slice(&[0x00, 0x00, 0x01, 0xE0]);
        block.extend(filler(2048 - 4));
        data.extend_from_slice(&block);
    }
    let pad = total - 4 - data.len();
    data.extend(filler(pad));
    data.extend_from_slice(&[0x00, 0x00, 0x01, 0xB9]);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_have_exact_sizes() {
        assert_eq!(build_jpeg(20_034).len(), 20_034);
        assert_eq!(build_png(15_100).len(), 15_100);
        assert_eq!(build_mpeg_ps(64 * 2048).len(), 64 * 2048);
        let iso = build_isobmff(b"isom", 25_008, 108);
        assert_eq!(iso.len(), 24 + 25_008 + 108);
    }

    #[test]
    fn test_jpeg_has_single_eoi() {
        let jpeg = build_jpeg(20_034);
        let count = jpeg.windows(2).filter(|w| w == &[0xFF, 0xD9]).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_png_has_no_stray_jpeg_footer() {
        let png = build_png(15_100);
        assert!(!png.windows(2).any(|w| w == [0xFF, 0xD9]));
    }
}
