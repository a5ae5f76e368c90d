//! Per-format structural validation.
//!
//! Runs before a candidate is accepted and again as the last gate
//! before saving. Every validator applies two common guards on top of
//! its structural check: a minimum size and a mid-file entropy band.
//!
//! Deep pixel decoding is deliberately absent; image formats pass on
//! structural evidence alone and are marked as such.

use crate::catalog::Signature;
use crate::entropy::mid_sample_entropy;
use crate::types::ValidationState;

const MIN_SIZE_DEFAULT: u64 = 4096;
const MIN_SIZE_SMALL: u64 = 256;
const ENTROPY_FLOOR: f64 = 1.0;
const ENTROPY_CEIL: f64 = 7.9999;

/// Validates `data` against the structural rules for `sig`.
pub fn validate(sig: &Signature, data: &[u8]) -> ValidationState {
    let min_size = if sig.min_size < MIN_SIZE_DEFAULT {
        MIN_SIZE_SMALL
    } else {
        MIN_SIZE_DEFAULT
    };
    if (data.len() as u64) < min_size {
        return ValidationState::Nonworkable(format!(
            "below minimum size ({} < {})",
            data.len(),
            min_size
        ));
    }

    if !structural_check(sig.extension, data) {
        return ValidationState::Nonworkable("structural check failed".to_string());
    }

    let entropy = mid_sample_entropy(data);
    if entropy < ENTROPY_FLOOR {
        return ValidationState::Nonworkable(format!("body entropy too low ({entropy:.2})"));
    }
    if entropy > ENTROPY_CEIL {
        return ValidationState::Nonworkable(format!("body entropy too high ({entropy:.4})"));
    }

    ValidationState::Workable("structural".to_string())
}

/// Dispatches the per-format structural check by canonical extension.
pub fn structural_check(extension: &str, data: &[u8]) -> bool {
    match extension {
        "jpg" => validate_jpeg(data),
        "png" => validate_png(data),
        "gif" => validate_gif(data),
        "bmp" => validate_bmp(data),
        "tiff" | "cr2" | "nef" | "arw" | "dng" | "orf" | "rw2" => validate_tiff(data),
        "webp" => validate_webp(data),
        "jp2" => validate_jp2(data),
        "psd" => validate_psd(data),
        "ico" => validate_ico(data),
        "raf" => validate_raf(data),
        "svg" => validate_svg(data),
        "heic" | "avif" | "mp4" | "mov" | "m4v" | "3gp" | "m4a" => validate_isobmff(data),
        "avi" => validate_avi(data),
        "mkv" | "webm" => validate_ebml(data),
        "flv" => validate_flv(data),
        "wmv" | "wma" => validate_asf(data),
        "mpg" | "vob" => validate_mpeg_ps(data),
        "ts" => validate_mpeg_ts(data),
        "ogv" | "ogg" => validate_ogg(data),
        "rm" => validate_rm(data),
        "swf" => validate_swf(data),
        "mp3" => validate_mp3(data),
        "wav" => validate_wav(data),
        "flac" => validate_flac(data),
        "aiff" => validate_aiff(data),
        "mid" => validate_midi(data),
        "pdf" => validate_pdf(data),
        "zip" | "docx" | "xlsx" | "pptx" | "epub" | "odt" | "ods" | "odp" => validate_zip(data),
        "sqlite" => validate_sqlite(data),
        "rtf" => validate_rtf(data),
        "xml" => validate_xml(data),
        "html" => validate_html(data),
        "eps" => validate_eps(data),
        "doc" => validate_ole2(data),
        "7z" => validate_7z(data),
        "rar" => validate_rar(data),
        "gz" => validate_gz(data),
        "bz2" => validate_bz2(data),
        "xz" => validate_xz(data),
        "tar" => validate_tar(data),
        "cab" => validate_cab(data),
        "iso" => validate_iso(data),
        "zst" => validate_zstd(data),
        "lz4" => validate_lz4(data),
        "exe" => validate_exe(data),
        "elf" => validate_elf(data),
        "macho" => validate_macho(data),
        "dex" => validate_dex(data),
        "class" => validate_class(data),
        "wasm" => validate_wasm(data),
        "pyc" => data.len() >= 16,
        "ttf" => validate_ttf(data),
        "otf" => validate_otf(data),
        "woff" => validate_woff(data),
        "woff2" => validate_woff2(data),
        "parquet" => validate_parquet(data),
        "avro" => data.starts_with(b"Obj\x01"),
        "orc" => data.starts_with(b"ORC"),
        "hdf5" => data.starts_with(b"\x89HDF\r\n\x1A\n"),
        "npy" => validate_npy(data),
        "pcap" => validate_pcap(data),
        "pcapng" => validate_pcapng(data),
        "lnk" => validate_lnk(data),
        "reg" => data.starts_with(b"regf"),
        "plist" => validate_plist(data),
        "der" => validate_der(data),
        "gpg" => !data.is_empty() && data[0] & 0x80 != 0,
        "tga" => data.len() > 18,
        _ => !data.is_empty(),
    }
}

fn read_u16_le(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32_le(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u16_be(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn read_u32_be(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn validate_jpeg(data: &[u8]) -> bool {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 || data[2] != 0xFF {
        return false;
    }
    // The byte after the second FF must be a real marker, not a
    // restart marker or fill byte.
    let marker = data[3];
    (0xC0..=0xFE).contains(&marker) && !(0xD0..=0xD7).contains(&marker)
}

pub fn validate_png(data: &[u8]) -> bool {
    data.len() >= 16 && data.starts_with(b"\x89PNG\r\n\x1A\n") && &data[12..16] == b"IHDR"
}

pub fn validate_gif(data: &[u8]) -> bool {
    if data.len() < 13 || !(data.starts_with(b"GIF89a") || data.starts_with(b"GIF87a")) {
        return false;
    }
    let width = read_u16_le(data, 6).unwrap_or(0);
    let height = read_u16_le(data, 8).unwrap_or(0);
    width > 0 && height > 0
}

const BMP_DIB_SIZES: [u32; 7] = [12, 40, 52, 56, 64, 108, 124];

pub fn validate_bmp(data: &[u8]) -> bool {
    if data.len() < 54 || !data.starts_with(b"BM") {
        return false;
    }
    let declared = match read_u32_le(data, 2) {
        Some(v) => v,
        None => return false,
    };
    if !(54..=500 * 1024 * 1024).contains(&declared) {
        return false;
    }
    if data[6..10].iter().any(|&b| b != 0) {
        return false;
    }
    let data_off = read_u32_le(data, 10).unwrap_or(0);
    let dib_size = read_u32_le(data, 14).unwrap_or(0);
    if !BMP_DIB_SIZES.contains(&dib_size) || data_off < 14 + dib_size {
        return false;
    }
    if dib_size >= 40 {
        let width = read_u32_le(data, 18).unwrap_or(0) as i32;
        let height = read_u32_le(data, 22).unwrap_or(0) as i32;
        let planes = read_u16_le(data, 26).unwrap_or(0);
        let bpp = read_u16_le(data, 28).unwrap_or(0);
        if planes != 1 || ![1, 2, 4, 8, 16, 24, 32].contains(&bpp) {
            return false;
        }
        if width <= 0 || width > 100_000 || height == 0 || height.abs() > 100_000 {
            return false;
        }
    }
    true
}

pub fn validate_tiff(data: &[u8]) -> bool {
    data.len() >= 8
        && (data.starts_with(b"II\x2A\x00") || data.starts_with(b"MM\x00\x2A")
            || data.starts_with(b"FUJIFILMCCD-RAW"))
}

pub fn validate_webp(data: &[u8]) -> bool {
    data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP"
}

pub fn validate_jp2(data: &[u8]) -> bool {
    data.starts_with(b"\x00\x00\x00\x0C\x6A\x50\x20\x20\x0D\x0A\x87\x0A")
}

pub fn validate_psd(data: &[u8]) -> bool {
    if data.len() < 26 || !data.starts_with(b"8BPS") {
        return false;
    }
    let version = read_u16_be(data, 4).unwrap_or(0);
    let channels = read_u16_be(data, 12).unwrap_or(0);
    (version == 1 || version == 2) && (1..=56).contains(&channels)
}

pub fn validate_ico(data: &[u8]) -> bool {
    if data.len() < 22 {
        return false;
    }
    let reserved = read_u16_le(data, 0).unwrap_or(1);
    let kind = read_u16_le(data, 2).unwrap_or(0);
    let count = read_u16_le(data, 4).unwrap_or(0);
    if reserved != 0 || !(kind == 1 || kind == 2) || !(1..=256).contains(&count) {
        return false;
    }
    // First directory entry must point past the directory itself.
    let img_size = read_u32_le(data, 6 + 8).unwrap_or(0);
    let img_offset = read_u32_le(data, 6 + 12).unwrap_or(0);
    img_size > 0 && img_size <= 10 * 1024 * 1024 && img_offset >= 6 + 16 * count as u32
}

pub fn validate_raf(data: &[u8]) -> bool {
    data.starts_with(b"FUJIFILMCCD-RAW")
}

pub fn validate_svg(data: &[u8]) -> bool {
    let window = &data[..data.len().min(1024)];
    memchr::memmem::find(window, b"<svg").is_some()
}

pub fn validate_isobmff(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let size = read_u32_be(data, 0).unwrap_or(0);
    &data[4..8] == b"ftyp" && (8..=4096).contains(&size)
}

pub fn validate_avi(data: &[u8]) -> bool {
    data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"AVI "
}

pub fn validate_ebml(data: &[u8]) -> bool {
    data.starts_with(b"\x1A\x45\xDF\xA3") && data.len() > 5 && data[4] != 0
}

pub fn validate_flv(data: &[u8]) -> bool {
    if data.len() < 9 || !data.starts_with(b"FLV\x01") {
        return false;
    }
    let flags = data[4];
    let data_offset = read_u32_be(data, 5).unwrap_or(0);
    (flags & 0xFA) == 0 && data_offset >= 9
}

pub fn validate_asf(data: &[u8]) -> bool {
    if data.len() < 30 || !data.starts_with(b"\x30\x26\xB2\x75\x8E\x66\xCF\x11") {
        return false;
    }
    let size = data
        .get(16..24)
        .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .unwrap_or(0);
    size >= 30
}

/// Searches the first 32 bytes for an MPEG start code and checks the
/// pack / sequence header fields behind it.
pub fn validate_mpeg_ps(data: &[u8]) -> bool {
    let limit = data.len().min(32);
    for i in 0..limit.saturating_sub(4) {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            match data[i + 3] {
                0xBA => {
                    let next = match data.get(i + 4) {
                        Some(&b) => b,
                        None => return false,
                    };
                    // MPEG-2 pack ('01' marker) or MPEG-1 pack ('0010').
                    return next >> 6 == 0b01 || next >> 4 == 0b0010;
                }
                0xB3 | 0xBB | 0xB8 => return true,
                _ => {}
            }
        }
    }
    false
}

pub fn validate_mpeg_ts(data: &[u8]) -> bool {
    crate::catalog::is_mpeg_ts(data, 0)
}

pub fn validate_ogg(data: &[u8]) -> bool {
    data.len() >= 27 && data.starts_with(b"OggS") && data[4] == 0
}

pub fn validate_rm(data: &[u8]) -> bool {
    if data.len() < 18 || !data.starts_with(b".RMF") {
        return false;
    }
    let header_size = read_u32_be(data, 4).unwrap_or(0);
    (10..=1024).contains(&header_size)
}

pub fn validate_swf(data: &[u8]) -> bool {
    if data.len() < 9 || !(data.starts_with(b"FWS") || data.starts_with(b"CWS")) {
        return false;
    }
    let version = data[3];
    let declared = read_u32_le(data, 4).unwrap_or(0);
    (1..=50).contains(&version) && declared as u64 >= 9 && declared <= 200 * 1024 * 1024
}

pub fn validate_mp3(data: &[u8]) -> bool {
    if data.starts_with(b"ID3") {
        // ID3v2: version byte and sync-safe size bytes.
        return data.len() >= 10 && data[3] < 0xFF && data[6..10].iter().all(|&b| b < 0x80);
    }
    if data.len() >= 4 && data[0] == 0xFF && (data[1] & 0xE0) == 0xE0 {
        let bitrate = data[2] >> 4;
        let samplerate = (data[2] >> 2) & 0x03;
        return bitrate != 0xF && bitrate != 0 && samplerate != 0x03;
    }
    false
}

pub fn validate_wav(data: &[u8]) -> bool {
    data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WAVE"
}

pub fn validate_flac(data: &[u8]) -> bool {
    // First metadata block must be STREAMINFO (type 0).
    data.len() >= 8 && data.starts_with(b"fLaC") && data[4] & 0x7F == 0
}

pub fn validate_aiff(data: &[u8]) -> bool {
    data.len() >= 12
        && data.starts_with(b"FORM")
        && (&data[8..12] == b"AIFF" || &data[8..12] == b"AIFC")
}

pub fn validate_midi(data: &[u8]) -> bool {
    data.len() >= 14 && data.starts_with(b"MThd") && read_u32_be(data, 4) == Some(6)
}

pub fn validate_pdf(data: &[u8]) -> bool {
    data.len() >= 8 && data.starts_with(b"%PDF-") && data[5].is_ascii_digit()
}

pub fn validate_zip(data: &[u8]) -> bool {
    if data.len() < 30 || !data.starts_with(b"PK\x03\x04") {
        return false;
    }
    let version = read_u16_le(data, 4).unwrap_or(u16::MAX);
    let method = read_u16_le(data, 8).unwrap_or(u16::MAX);
    let name_len = read_u16_le(data, 26).unwrap_or(u16::MAX);
    version < 100 && method < 100 && name_len < 512
}

pub fn validate_sqlite(data: &[u8]) -> bool {
    if data.len() < 100 || !data.starts_with(b"SQLite format 3\x00") {
        return false;
    }
    let page_size = read_u16_be(data, 16).unwrap_or(0);
    page_size == 1 || (page_size >= 512 && page_size.is_power_of_two())
}

fn printable_prolog(data: &[u8]) -> bool {
    let window = &data[..data.len().min(256)];
    let printable = window
        .iter()
        .filter(|&&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..0x7F).contains(&b))
        .count();
    printable * 10 >= window.len() * 9
}

pub fn validate_rtf(data: &[u8]) -> bool {
    data.starts_with(b"{\\rtf") && printable_prolog(data)
}

pub fn validate_xml(data: &[u8]) -> bool {
    (data.starts_with(b"<?xml") || data.starts_with(b"\xEF\xBB\xBF<?xml")) && printable_prolog(&data[..data.len().min(256)])
}

pub fn validate_html(data: &[u8]) -> bool {
    (data.starts_with(b"<!DOCTYPE") || data.starts_with(b"<html")) && printable_prolog(data)
}

pub fn validate_eps(data: &[u8]) -> bool {
    data.starts_with(b"%!PS-Adobe") && printable_prolog(data)
}

pub fn validate_ole2(data: &[u8]) -> bool {
    if data.len() < 512 || !data.starts_with(b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1") {
        return false;
    }
    let sector_shift = read_u16_le(data, 30).unwrap_or(0);
    (read_u16_le(data, 28) == Some(0xFFFE)) && (sector_shift == 9 || sector_shift == 12)
}

pub fn validate_7z(data: &[u8]) -> bool {
    data.len() >= 32 && data.starts_with(b"7z\xBC\xAF\x27\x1C") && data[6] == 0 && data[7] <= 4
}

pub fn validate_rar(data: &[u8]) -> bool {
    data.starts_with(b"Rar!\x1A\x07\x01\x00") || data.starts_with(b"Rar!\x1A\x07\x00")
}

pub fn validate_gz(data: &[u8]) -> bool {
    data.len() >= 10 && data.starts_with(b"\x1F\x8B") && data[2] == 8
}

pub fn validate_bz2(data: &[u8]) -> bool {
    data.len() >= 4 && data.starts_with(b"BZh") && (b'1'..=b'9').contains(&data[3])
}

pub fn validate_xz(data: &[u8]) -> bool {
    data.starts_with(b"\xFD\x37\x7A\x58\x5A\x00")
}

pub fn validate_tar(data: &[u8]) -> bool {
    data.len() >= 262 && &data[257..262] == b"ustar"
}

pub fn validate_cab(data: &[u8]) -> bool {
    if data.len() < 36 || !data.starts_with(b"MSCF") {
        return false;
    }
    let cb_cabinet = read_u32_le(data, 8).unwrap_or(0);
    cb_cabinet >= 36
}

pub fn validate_iso(data: &[u8]) -> bool {
    data.len() > 32769 + 5 && &data[32769..32774] == b"CD001"
}

pub fn validate_zstd(data: &[u8]) -> bool {
    data.starts_with(b"\x28\xB5\x2F\xFD")
}

pub fn validate_lz4(data: &[u8]) -> bool {
    data.starts_with(b"\x04\x22\x4D\x18")
}

pub fn validate_exe(data: &[u8]) -> bool {
    if data.len() < 64 || !data.starts_with(b"MZ") {
        return false;
    }
    let pe_offset = read_u32_le(data, 60).unwrap_or(u32::MAX);
    if pe_offset as u64 > 4 * 1024 * 1024 {
        return false;
    }
    // When the PE header is inside the buffer, insist on its magic.
    match data.get(pe_offset as usize..pe_offset as usize + 4) {
        Some(magic) => magic == b"PE\x00\x00",
        None => true,
    }
}

pub fn validate_elf(data: &[u8]) -> bool {
    data.len() >= 16
        && data.starts_with(b"\x7FELF")
        && (data[4] == 1 || data[4] == 2)
        && (data[5] == 1 || data[5] == 2)
}

pub fn validate_macho(data: &[u8]) -> bool {
    if data.len() < 8 {
        return false;
    }
    match &data[..4] {
        b"\xFE\xED\xFA\xCE" | b"\xFE\xED\xFA\xCF" | b"\xCE\xFA\xED\xFE" | b"\xCF\xFA\xED\xFE" => {
            true
        }
        b"\xCA\xFE\xBA\xBE" => {
            // Fat binary arch count; Java class files share this magic
            // but carry a version word here instead.
            let narch = read_u32_be(data, 4).unwrap_or(0);
            (1..=16).contains(&narch)
        }
        _ => false,
    }
}

pub fn validate_dex(data: &[u8]) -> bool {
    data.len() >= 8 && data.starts_with(b"dex\n") && data[7] == 0
}

pub fn validate_class(data: &[u8]) -> bool {
    if data.len() < 10 || !data.starts_with(b"\xCA\xFE\xBA\xBE") {
        return false;
    }
    let major = read_u16_be(data, 6).unwrap_or(0);
    (45..=80).contains(&major)
}

pub fn validate_wasm(data: &[u8]) -> bool {
    data.len() >= 8 && data.starts_with(b"\x00asm") && read_u32_le(data, 4) == Some(1)
}

fn sfnt_table_count_ok(data: &[u8]) -> bool {
    let num_tables = read_u16_be(data, 4).unwrap_or(0);
    (1..=512).contains(&num_tables)
}

pub fn validate_ttf(data: &[u8]) -> bool {
    data.len() >= 12
        && (data.starts_with(b"\x00\x01\x00\x00") || data.starts_with(b"true"))
        && sfnt_table_count_ok(data)
}

pub fn validate_otf(data: &[u8]) -> bool {
    data.len() >= 12 && data.starts_with(b"OTTO") && sfnt_table_count_ok(data)
}

pub fn validate_woff(data: &[u8]) -> bool {
    if data.len() < 44 || !data.starts_with(b"wOFF") {
        return false;
    }
    let num_tables = read_u16_be(data, 12).unwrap_or(0);
    (1..=512).contains(&num_tables)
}

pub fn validate_woff2(data: &[u8]) -> bool {
    if data.len() < 48 || !data.starts_with(b"wOF2") {
        return false;
    }
    let num_tables = read_u16_be(data, 12).unwrap_or(0);
    (1..=512).contains(&num_tables)
}

pub fn validate_parquet(data: &[u8]) -> bool {
    data.starts_with(b"PAR1")
}

pub fn validate_npy(data: &[u8]) -> bool {
    data.len() >= 10 && data.starts_with(b"\x93NUMPY") && (1..=3).contains(&data[6])
}

pub fn validate_pcap(data: &[u8]) -> bool {
    if data.len() < 24 {
        return false;
    }
    if data.starts_with(b"\xD4\xC3\xB2\xA1") {
        read_u16_le(data, 4) == Some(2)
    } else if data.starts_with(b"\xA1\xB2\xC3\xD4") {
        read_u16_be(data, 4) == Some(2)
    } else {
        false
    }
}

pub fn validate_pcapng(data: &[u8]) -> bool {
    if data.len() < 12 || !data.starts_with(b"\x0A\x0D\x0D\x0A") {
        return false;
    }
    let bom = read_u32_le(data, 8).unwrap_or(0);
    bom == 0x1A2B_3C4D || bom == 0x4D3C_2B1A
}

pub fn validate_lnk(data: &[u8]) -> bool {
    data.len() >= 76 && read_u32_le(data, 0) == Some(0x4C)
}

pub fn validate_plist(data: &[u8]) -> bool {
    data.len() >= 8 && data.starts_with(b"bplist") && data[6].is_ascii_digit()
}

pub fn validate_der(data: &[u8]) -> bool {
    data.len() >= 4 && data[0] == 0x30 && (data[1] & 0x80 == 0 || (data[1] & 0x7F) <= 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SIG_BMP, SIG_ICO, SIG_JPEG};

    /// Filler whose consecutive bytes differ by one, so no multi-byte
    /// magic can occur and entropy stays near 6.8 bits/byte.
    fn filler(len: usize) -> Vec<u8> {
        (0..len).map(|i| (0x10 + (i % 112)) as u8).collect()
    }

    fn minimal_jpeg(len: usize) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend(filler(len.saturating_sub(6)));
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    #[test]
    fn test_jpeg_marker_rules() {
        assert!(validate_jpeg(&minimal_jpeg(8192)));
        // Restart marker after SOI is not a valid first marker.
        assert!(!validate_jpeg(&[0xFF, 0xD8, 0xFF, 0xD3, 0, 0]));
        assert!(!validate_jpeg(&[0xFF, 0xD8, 0x00, 0xE0, 0, 0]));
    }

    #[test]
    fn test_validate_applies_min_size_guard() {
        let tiny = minimal_jpeg(512);
        assert!(matches!(
            validate(&SIG_JPEG, &tiny),
            ValidationState::Nonworkable(_)
        ));
        let small_format_min = SIG_ICO.min_size;
        assert!(small_format_min < 4096);
    }

    #[test]
    fn test_validate_entropy_guards() {
        // Constant body: entropy ~0, rejected despite a valid header.
        let mut flat = vec![0xFF, 0xD8, 0xFF, 0xE0];
        flat.extend(vec![0x41u8; 8192]);
        flat.extend_from_slice(&[0xFF, 0xD9]);
        assert!(matches!(
            validate(&SIG_JPEG, &flat),
            ValidationState::Nonworkable(_)
        ));

        let good = minimal_jpeg(8192);
        assert!(validate(&SIG_JPEG, &good).is_workable());
    }

    #[test]
    fn test_bmp_rejects_bogus_declared_size() {
        let mut bmp = vec![0u8; 64];
        bmp[0] = b'B';
        bmp[1] = b'M';
        bmp[2..6].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        bmp[14] = 40;
        assert!(!validate_bmp(&bmp));
        assert!(matches!(
            validate(&SIG_BMP, &bmp),
            ValidationState::Nonworkable(_)
        ));
    }

    #[test]
    fn test_bmp_accepts_plausible_header() {
        let mut bmp = vec![0u8; 54];
        bmp[0] = b'B';
        bmp[1] = b'M';
        bmp[2..6].copy_from_slice(&1054u32.to_le_bytes());
        bmp[10..14].copy_from_slice(&54u32.to_le_bytes());
        bmp[14..18].copy_from_slice(&40u32.to_le_bytes());
        bmp[18..22].copy_from_slice(&10u32.to_le_bytes());
        bmp[22..26].copy_from_slice(&10u32.to_le_bytes());
        bmp[26..28].copy_from_slice(&1u16.to_le_bytes());
        bmp[28..30].copy_from_slice(&24u16.to_le_bytes());
        assert!(validate_bmp(&bmp));
    }

    #[test]
    fn test_isobmff_requires_sane_ftyp() {
        let mut ok = vec![0, 0, 0, 24];
        ok.extend_from_slice(b"ftypisom");
        ok.extend_from_slice(&[0u8; 16]);
        assert!(validate_isobmff(&ok));

        let mut oversized = vec![0, 1, 0, 0];
        oversized.extend_from_slice(b"ftypisom");
        oversized.extend_from_slice(&[0u8; 16]);
        assert!(!validate_isobmff(&oversized));
    }

    #[test]
    fn test_mpeg_ps_pack_header() {
        // MPEG-2 pack start with '01' marker bits.
        let data = [0x00, 0x00, 0x01, 0xBA, 0x44, 0, 0, 0, 0, 0];
        assert!(validate_mpeg_ps(&data));
        // Garbage before the code, still within 32 bytes.
        let mut shifted = vec![0x11u8; 8];
        shifted.extend_from_slice(&data);
        assert!(validate_mpeg_ps(&shifted));
        assert!(!validate_mpeg_ps(&[0u8; 40]));
    }

    #[test]
    fn test_sqlite_page_size_power_of_two() {
        let mut db = vec![0u8; 128];
        db[..16].copy_from_slice(b"SQLite format 3\x00");
        db[16..18].copy_from_slice(&4096u16.to_be_bytes());
        assert!(validate_sqlite(&db));
        db[16..18].copy_from_slice(&4095u16.to_be_bytes());
        assert!(!validate_sqlite(&db));
    }

    #[test]
    fn test_container_checks() {
        let mut zip = b"PK\x03\x04\x14\x00\x00\x00\x08\x00".to_vec();
        zip.extend_from_slice(&[0u8; 24]);
        assert!(validate_zip(&zip));

        let mut woff2 = b"wOF2\x00\x01\x00\x00".to_vec();
        woff2.extend_from_slice(&[0, 0, 0, 0, 0, 10]);
        woff2.extend_from_slice(&[0u8; 40]);
        assert!(validate_woff2(&woff2));

        let mut pcap = b"\xD4\xC3\xB2\xA1\x02\x00\x04\x00".to_vec();
        pcap.extend_from_slice(&[0u8; 16]);
        assert!(validate_pcap(&pcap));
    }
}
