//! Damage analysis: structural walks, damage classification and repair
//! planning for carved candidates.

use crate::entropy::{compute_entropy, zero_fraction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity classification derived from the damage score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DamageLevel {
    Healthy,
    Minor,
    Moderate,
    Severe,
    Fatal,
}

impl DamageLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Fatal => "fatal",
        }
    }

    fn from_score(score: f64) -> Self {
        if score <= 0.0 {
            Self::Healthy
        } else if score <= 0.15 {
            Self::Minor
        } else if score <= 0.35 {
            Self::Moderate
        } else if score <= 0.65 {
            Self::Severe
        } else {
            Self::Fatal
        }
    }
}

impl fmt::Display for DamageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of a format-aware repair plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairAction {
    TrimLeadingGarbage,
    FixJpegMarker,
    AppendJpegEoi,
    TrimAfterJpegEoi,
    FixPngCrcs,
    AppendPngIend,
    FixBmpSize,
    FixBmpDataOffset,
    RealignIsoBmff,
    RepairMoovBox,
    TrimAfterLastBox,
    FixRiffSize,
    FixGifVersion,
    AppendGifTrailer,
    ReconstructMpegHeader,
    ExciseNullRegions,
    ResyncStartCodes,
    TrimTrailingGarbage,
    AppendMpegEndCode,
    AlignSwfSignature,
    FixSwfSize,
    TrimSwfTrailingNulls,
}

impl RepairAction {
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::TrimLeadingGarbage => "trim_leading_garbage",
            Self::FixJpegMarker => "fix_jpeg_marker",
            Self::AppendJpegEoi => "append_jpeg_eoi",
            Self::TrimAfterJpegEoi => "trim_after_jpeg_eoi",
            Self::FixPngCrcs => "fix_png_crcs",
            Self::AppendPngIend => "append_png_iend",
            Self::FixBmpSize => "fix_bmp_size",
            Self::FixBmpDataOffset => "fix_bmp_data_offset",
            Self::RealignIsoBmff => "realign_isobmff",
            Self::RepairMoovBox => "repair_moov_box",
            Self::TrimAfterLastBox => "trim_after_last_box",
            Self::FixRiffSize => "fix_riff_size",
            Self::FixGifVersion => "fix_gif_version",
            Self::AppendGifTrailer => "append_gif_trailer",
            Self::ReconstructMpegHeader => "reconstruct_mpeg_header",
            Self::ExciseNullRegions => "excise_null_regions",
            Self::ResyncStartCodes => "resync_start_codes",
            Self::TrimTrailingGarbage => "trim_trailing_garbage",
            Self::AppendMpegEndCode => "append_mpeg_end_code",
            Self::AlignSwfSignature => "align_swf_signature",
            Self::FixSwfSize => "fix_swf_size",
            Self::TrimSwfTrailingNulls => "trim_swf_trailing_nulls",
        }
    }
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Result of the six-check damage walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DamageReport {
    pub level: DamageLevel,
    pub score: f64,
    pub header_damaged: bool,
    pub footer_missing: bool,
    pub truncated: bool,
    pub null_regions: bool,
    pub structure_broken: bool,
    pub entropy_anomaly: bool,
    pub percent_null: f64,
    pub issues: Vec<String>,
    pub repairable: bool,
    pub repair_plan: Vec<RepairAction>,
}

impl DamageReport {
    fn healthy() -> Self {
        Self {
            level: DamageLevel::Healthy,
            score: 0.0,
            header_damaged: false,
            footer_missing: false,
            truncated: false,
            null_regions: false,
            structure_broken: false,
            entropy_anomaly: false,
            percent_null: 0.0,
            issues: Vec::new(),
            repairable: false,
            repair_plan: Vec::new(),
        }
    }

    #[must_use]
    pub fn flag_count(&self) -> usize {
        [
            self.header_damaged,
            self.footer_missing,
            self.truncated,
            self.null_regions,
            self.structure_broken,
            self.entropy_anomaly,
        ]
        .iter()
        .filter(|&&f| f)
        .count()
    }
}

/// Formats that end with a fixed terminator, and the terminator.
fn footer_for(extension: &str) -> Option<&'static [u8]> {
    match extension {
        "jpg" => Some(b"\xFF\xD9"),
        "png" => Some(b"IEND\xAE\x42\x60\x82"),
        "gif" => Some(b"\x00\x3B"),
        "pdf" => Some(b"%%EOF"),
        "mpg" | "vob" => Some(b"\x00\x00\x01\xB9"),
        "rtf" => Some(b"}"),
        _ => None,
    }
}

fn is_compressed_format(extension: &str) -> bool {
    matches!(
        extension,
        "jpg" | "png"
            | "heic"
            | "avif"
            | "webp"
            | "mp4"
            | "mov"
            | "m4v"
            | "3gp"
            | "m4a"
            | "mkv"
            | "webm"
            | "zip"
            | "docx"
            | "xlsx"
            | "pptx"
            | "epub"
            | "odt"
            | "ods"
            | "odp"
            | "7z"
            | "rar"
            | "gz"
            | "bz2"
            | "xz"
            | "zst"
            | "lz4"
            | "mp3"
            | "flac"
            | "ogg"
            | "ogv"
    )
}

/// Runs all six checks and computes the combined damage report.
///
/// `expected_size` of 0 means "unknown".
pub fn analyze(extension: &str, data: &[u8], expected_size: u64) -> DamageReport {
    let mut report = DamageReport::healthy();
    if data.is_empty() {
        report.header_damaged = true;
        report.structure_broken = true;
        report.issues.push("no data".to_string());
        finish(extension, &mut report);
        return report;
    }

    check_header(extension, data, &mut report);
    check_footer(extension, data, &mut report);
    check_null_regions(data, &mut report);
    check_structure(extension, data, &mut report);
    check_truncation(extension, data, expected_size, &mut report);
    check_entropy(extension, data, &mut report);

    finish(extension, &mut report);
    report
}

fn finish(extension: &str, report: &mut DamageReport) {
    let mut score = 0.0;
    if report.header_damaged {
        score += 0.35;
    }
    if report.footer_missing {
        score += 0.10;
    }
    if report.truncated {
        score += 0.15;
    }
    if report.structure_broken {
        score += 0.25;
    }
    score += (report.percent_null / 100.0).min(1.0) * 0.40;
    if report.entropy_anomaly {
        score += 0.10;
    }
    if report.flag_count() >= 3 {
        score += 0.10;
    }
    report.score = score.min(1.0);
    report.level = DamageLevel::from_score(report.score);

    report.repair_plan = build_repair_plan(extension, report);
    report.repairable = assess_repairability(extension, report);
}

fn check_header(extension: &str, data: &[u8], report: &mut DamageReport) {
    let ok = match extension {
        "jpg" => crate::validate::validate_jpeg(data),
        "png" => crate::validate::validate_png(data),
        "gif" => data.starts_with(b"GIF89a") || data.starts_with(b"GIF87a"),
        "bmp" => data.starts_with(b"BM"),
        "heic" | "avif" | "mp4" | "mov" | "m4v" | "3gp" | "m4a" => {
            crate::validate::validate_isobmff(data)
        }
        "webp" | "avi" | "wav" => data.starts_with(b"RIFF"),
        "mpg" | "vob" => crate::validate::validate_mpeg_ps(data),
        "swf" => data.starts_with(b"FWS") || data.starts_with(b"CWS"),
        "pdf" => data.starts_with(b"%PDF"),
        _ => crate::validate::structural_check(extension, data),
    };
    if !ok {
        report.header_damaged = true;
        report.issues.push(format!("{extension} header damaged"));
    }
}

fn check_footer(extension: &str, data: &[u8], report: &mut DamageReport) {
    let Some(footer) = footer_for(extension) else {
        return;
    };
    let tail_start = data.len().saturating_sub(4096);
    if memchr::memmem::rfind(&data[tail_start..], footer).is_none() {
        report.footer_missing = true;
        report
            .issues
            .push(format!("{extension} end marker not found in trailing 4 KiB"));
    }
}

const NULL_WINDOW: usize = 4096;
const NULL_STRIDE: usize = 16 * 1024;

fn check_null_regions(data: &[u8], report: &mut DamageReport) {
    if data.len() < 2 * 512 + NULL_WINDOW {
        return;
    }
    let body = &data[512..data.len() - 512];
    let mut windows = 0usize;
    let mut null_windows = 0usize;
    let mut offset = 0usize;
    while offset + NULL_WINDOW <= body.len() {
        windows += 1;
        if zero_fraction(&body[offset..offset + NULL_WINDOW]) > 0.95 {
            null_windows += 1;
        }
        offset += NULL_STRIDE;
    }
    if windows == 0 {
        return;
    }
    report.percent_null = null_windows as f64 * 100.0 / windows as f64;
    if report.percent_null >= 20.0 {
        report.null_regions = true;
        report.issues.push(format!(
            "{:.0}% of body windows are zeroed",
            report.percent_null
        ));
    }
}

fn check_structure(extension: &str, data: &[u8], report: &mut DamageReport) {
    let broken = match extension {
        "jpg" => !jpeg_structure_ok(data),
        "png" => !png_structure_ok(data),
        "heic" | "avif" | "mp4" | "mov" | "m4v" | "3gp" | "m4a" => !isobmff_structure_ok(data),
        "bmp" => !bmp_structure_ok(data),
        "webp" | "avi" | "wav" => !riff_structure_ok(data),
        "mpg" | "vob" => !mpeg_ps_structure_ok(data, report),
        "swf" => !swf_structure_ok(data),
        _ => false,
    };
    if broken {
        report.structure_broken = true;
        report
            .issues
            .push(format!("{extension} internal structure is inconsistent"));
    }
}

/// Marker walk: every length-bearing segment must stay in bounds and a
/// frame (SOFn) plus scan (SOS) must appear.
fn jpeg_structure_ok(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    let mut pos = 2usize;
    let mut seen_sof = false;
    let mut seen_sos = false;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return false;
        }
        let marker = data[pos + 1];
        match marker {
            0xFF => {
                pos += 1;
                continue;
            }
            0xD8 | 0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            0xD9 => break,
            0xDA => {
                seen_sos = true;
                break;
            }
            _ => {
                let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                if len < 2 || pos + 2 + len > data.len() {
                    return false;
                }
                if (0xC0..=0xCF).contains(&marker) && marker != 0xC4 && marker != 0xC8 && marker != 0xCC
                {
                    seen_sof = true;
                }
                pos += 2 + len;
            }
        }
    }
    seen_sof && seen_sos
}

/// Chunk walk with CRC32 verification over (type + data); IDAT must
/// appear before IEND.
fn png_structure_ok(data: &[u8]) -> bool {
    if data.len() < 8 {
        return false;
    }
    let mut pos = 8usize;
    let mut seen_idat = false;
    while pos + 12 <= data.len() {
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let chunk_end = pos + 8 + len + 4;
        if len > 0x7FFF_FFFF || chunk_end > data.len() {
            return false;
        }
        let chunk_type = &data[pos + 4..pos + 8];
        let crc_stored = u32::from_be_bytes([
            data[chunk_end - 4],
            data[chunk_end - 3],
            data[chunk_end - 2],
            data[chunk_end - 1],
        ]);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[pos + 4..pos + 8 + len]);
        if hasher.finalize() != crc_stored {
            return false;
        }
        if chunk_type == b"IDAT" {
            seen_idat = true;
        }
        if chunk_type == b"IEND" {
            return seen_idat;
        }
        pos = chunk_end;
    }
    false
}

const ISOBMFF_TOP_LEVEL: [&[u8; 4]; 14] = [
    b"ftyp", b"moov", b"mdat", b"free", b"skip", b"wide", b"meta", b"moof", b"mfra", b"styp",
    b"sidx", b"ssix", b"pdin", b"uuid",
];

fn isobmff_structure_ok(data: &[u8]) -> bool {
    let mut pos = 0usize;
    let mut seen_moov = false;
    let mut boxes = 0usize;
    while pos + 8 <= data.len() {
        let size = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as u64;
        let box_type: [u8; 4] = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];
        if !box_type.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
            || !ISOBMFF_TOP_LEVEL.contains(&&box_type)
        {
            return false;
        }
        let advance = match size {
            0 => (data.len() - pos) as u64,
            1 => {
                if pos + 16 > data.len() {
                    return false;
                }
                u64::from_be_bytes([
                    data[pos + 8],
                    data[pos + 9],
                    data[pos + 10],
                    data[pos + 11],
                    data[pos + 12],
                    data[pos + 13],
                    data[pos + 14],
                    data[pos + 15],
                ])
            }
            2..=7 => return false,
            s => s,
        };
        if &box_type == b"moov" {
            seen_moov = true;
        }
        boxes += 1;
        if advance == 0 || pos as u64 + advance > data.len() as u64 {
            // Trailing truncation of the final box is tolerated.
            break;
        }
        pos += advance as usize;
    }
    boxes >= 2 && seen_moov
}

fn bmp_structure_ok(data: &[u8]) -> bool {
    if data.len() < 54 {
        return false;
    }
    let declared = u32::from_le_bytes([data[2], data[3], data[4], data[5]]) as u64;
    let data_off = u32::from_le_bytes([data[10], data[11], data[12], data[13]]) as u64;
    let actual = data.len() as u64;
    data_off <= actual && declared.abs_diff(actual) <= 4096
}

fn riff_structure_ok(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let declared = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as u64 + 8;
    declared.abs_diff(data.len() as u64) <= 4096
}

/// Counts start codes within a 10 MiB sample; requires a pack or
/// sequence header and flags gaps above 1 MiB.
fn mpeg_ps_structure_ok(data: &[u8], report: &mut DamageReport) -> bool {
    let sample = &data[..data.len().min(10 * 1024 * 1024)];
    let mut start_codes = 0usize;
    let mut has_anchor = false;
    let mut last_code = 0usize;
    let mut max_gap = 0usize;
    let mut pos = 0usize;
    while let Some(rel) = memchr::memmem::find(&sample[pos..], b"\x00\x00\x01") {
        let at = pos + rel;
        if at + 3 >= sample.len() {
            break;
        }
        let code = sample[at + 3];
        if code >= 0xB3 || (0xC0..=0xEF).contains(&code) {
            start_codes += 1;
            if code == 0xBA || code == 0xB3 {
                has_anchor = true;
            }
            max_gap = max_gap.max(at - last_code);
            last_code = at;
        }
        pos = at + 3;
    }
    if max_gap > 1024 * 1024 {
        report
            .issues
            .push(format!("start-code gap of {} bytes", max_gap));
    }
    start_codes > 0 && has_anchor && max_gap <= 1024 * 1024
}

fn swf_structure_ok(data: &[u8]) -> bool {
    if data.len() < 9 {
        return false;
    }
    let declared = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as u64;
    if data.starts_with(b"FWS") {
        declared.abs_diff(data.len() as u64) <= 4096
    } else {
        // Compressed body; the declared size is the uncompressed length.
        declared >= data.len() as u64 / 4
    }
}

fn check_truncation(extension: &str, data: &[u8], expected_size: u64, report: &mut DamageReport) {
    if expected_size > 0 && (data.len() as u64) < expected_size {
        report.truncated = true;
        report.issues.push(format!(
            "carved {} of expected {} bytes",
            data.len(),
            expected_size
        ));
        return;
    }
    let Some(footer) = footer_for(extension) else {
        return;
    };
    let strict_tail = matches!(extension, "jpg" | "gif");
    let window = if strict_tail { footer.len() } else { 32 };
    let tail_start = data.len().saturating_sub(window);
    if memchr::memmem::rfind(&data[tail_start..], footer).is_none() {
        report.truncated = true;
        report
            .issues
            .push(format!("{extension} does not end with its terminator"));
    }
}

fn check_entropy(extension: &str, data: &[u8], report: &mut DamageReport) {
    if !is_compressed_format(extension) || data.len() < 32 * 1024 {
        return;
    }
    const WINDOW: usize = 8192;
    let mut prev = compute_entropy(&data[1024..1024 + WINDOW]);
    let mut offset = 1024 + WINDOW;
    while offset + WINDOW <= data.len() {
        let current = compute_entropy(&data[offset..offset + WINDOW]);
        if prev >= 6.0 && current < 2.0 {
            report.entropy_anomaly = true;
            report.issues.push(format!(
                "entropy collapse at byte {} ({:.1} -> {:.1})",
                offset, prev, current
            ));
            return;
        }
        prev = current;
        offset += WINDOW;
    }
}

fn build_repair_plan(extension: &str, report: &DamageReport) -> Vec<RepairAction> {
    let mut plan = Vec::new();
    match extension {
        "jpg" => {
            if report.header_damaged {
                plan.push(RepairAction::TrimLeadingGarbage);
                plan.push(RepairAction::FixJpegMarker);
            }
            if report.footer_missing || report.truncated {
                plan.push(RepairAction::AppendJpegEoi);
            } else {
                plan.push(RepairAction::TrimAfterJpegEoi);
            }
        }
        "png" => {
            if report.header_damaged {
                plan.push(RepairAction::TrimLeadingGarbage);
            }
            if report.structure_broken {
                plan.push(RepairAction::FixPngCrcs);
            }
            if report.footer_missing || report.truncated {
                plan.push(RepairAction::AppendPngIend);
            }
        }
        "bmp" => {
            plan.push(RepairAction::FixBmpSize);
            plan.push(RepairAction::FixBmpDataOffset);
        }
        "heic" | "avif" | "mp4" | "mov" | "m4v" | "3gp" | "m4a" => {
            if report.header_damaged {
                plan.push(RepairAction::RealignIsoBmff);
            }
            if report.structure_broken {
                plan.push(RepairAction::RepairMoovBox);
            }
            plan.push(RepairAction::TrimAfterLastBox);
        }
        "webp" | "avi" | "wav" => {
            plan.push(RepairAction::FixRiffSize);
        }
        "gif" => {
            plan.push(RepairAction::FixGifVersion);
            if report.footer_missing || report.truncated {
                plan.push(RepairAction::AppendGifTrailer);
            }
        }
        "mpg" | "vob" => {
            if report.header_damaged {
                plan.push(RepairAction::ReconstructMpegHeader);
            }
            if report.null_regions {
                plan.push(RepairAction::ExciseNullRegions);
                plan.push(RepairAction::ResyncStartCodes);
            }
            if report.structure_broken {
                plan.push(RepairAction::ResyncStartCodes);
            }
            plan.push(RepairAction::TrimTrailingGarbage);
            if report.footer_missing || report.truncated {
                plan.push(RepairAction::AppendMpegEndCode);
            }
        }
        "swf" => {
            if report.header_damaged {
                plan.push(RepairAction::AlignSwfSignature);
            }
            // Declared size is rewritten before and after the trim.
            plan.push(RepairAction::FixSwfSize);
            plan.push(RepairAction::TrimSwfTrailingNulls);
            plan.push(RepairAction::FixSwfSize);
        }
        _ => {}
    }
    plan.dedup();
    if report.level == DamageLevel::Healthy {
        return Vec::new();
    }
    plan
}

fn assess_repairability(extension: &str, report: &DamageReport) -> bool {
    if report.level == DamageLevel::Healthy || report.repair_plan.is_empty() {
        return false;
    }
    if report.level != DamageLevel::Fatal {
        return true;
    }
    if matches!(extension, "mpg" | "vob" | "swf") && report.percent_null < 98.0 {
        return true;
    }
    // Footer-only damage on a footer-bearing format is always fixable.
    footer_for(extension).is_some()
        && (report.footer_missing || report.truncated)
        && !report.header_damaged
        && !report.structure_broken
        && !report.null_regions
}
