//! Format-aware byte-level repair driven by a damage report.
//!
//! Repairs never mutate the caller's buffer: work happens on a clone so
//! the pre-repair bytes remain available as a fallback when a repair
//! fails to improve the damage level.

use crate::damage::{self, DamageLevel, DamageReport, RepairAction};
use crate::fingerprint::fingerprint;

/// Pre-write / post-save verification record.
#[derive(Debug, Clone)]
pub struct IntegrityCheck {
    pub is_valid: bool,
    pub damage_level: DamageLevel,
    pub fingerprint_match: Option<bool>,
    pub size_ok: bool,
    pub notes: Vec<String>,
}

/// Outcome of one repair attempt.
#[derive(Debug, Clone)]
pub struct RepairResult {
    pub success: bool,
    pub before: DamageReport,
    pub after: Option<DamageReport>,
    pub fingerprint_before: String,
    pub fingerprint_after: Option<String>,
    pub applied: Vec<RepairAction>,
    pub failed: Vec<RepairAction>,
    /// Repaired buffer, present only on success.
    pub data: Option<Vec<u8>>,
}

impl RepairResult {
    #[must_use]
    pub fn size_change(&self) -> i64 {
        match &self.data {
            Some(d) => d.len() as i64,
            None => 0,
        }
    }
}

enum ActionOutcome {
    Applied,
    Unneeded,
    Failed,
}

/// Applies the report's repair plan to a copy of `data` and re-runs the
/// damage analyzer on the result.
///
/// Success means the damage level strictly improved, or at least one
/// action landed with none failing.
pub fn repair(extension: &str, data: &[u8], report: &DamageReport) -> RepairResult {
    let mut buffer = data.to_vec();
    let mut applied = Vec::new();
    let mut failed = Vec::new();

    for &action in &report.repair_plan {
        match apply_action(extension, &mut buffer, action) {
            ActionOutcome::Applied => applied.push(action),
            ActionOutcome::Unneeded => {}
            ActionOutcome::Failed => failed.push(action),
        }
    }

    let after = damage::analyze(extension, &buffer, 0);
    let improved = after.level < report.level;
    let success = improved || (!applied.is_empty() && failed.is_empty());

    RepairResult {
        success,
        fingerprint_before: fingerprint(data),
        fingerprint_after: if success {
            Some(fingerprint(&buffer))
        } else {
            None
        },
        before: report.clone(),
        after: Some(after),
        applied,
        failed,
        data: if success { Some(buffer) } else { None },
    }
}

/// Structural verdict for an in-memory buffer; the saver fills in the
/// fingerprint comparison after readback.
pub fn verify_data_integrity(data: &[u8], extension: &str) -> IntegrityCheck {
    let structurally_valid = crate::validate::structural_check(extension, data);
    let report = damage::analyze(extension, data, 0);
    let mut notes = report.issues.clone();
    if !structurally_valid {
        notes.push(format!("{extension} failed structural validation"));
    }
    IntegrityCheck {
        is_valid: structurally_valid && report.level <= DamageLevel::Minor,
        damage_level: report.level,
        fingerprint_match: None,
        size_ok: !data.is_empty(),
        notes,
    }
}

fn apply_action(extension: &str, buffer: &mut Vec<u8>, action: RepairAction) -> ActionOutcome {
    match action {
        RepairAction::TrimLeadingGarbage => trim_leading_garbage(extension, buffer),
        RepairAction::FixJpegMarker => fix_jpeg_marker(buffer),
        RepairAction::AppendJpegEoi => append_terminator(buffer, &[0xFF, 0xD9]),
        RepairAction::TrimAfterJpegEoi => trim_after_last(buffer, &[0xFF, 0xD9]),
        RepairAction::FixPngCrcs => fix_png_crcs(buffer),
        RepairAction::AppendPngIend => append_png_iend(buffer),
        RepairAction::FixBmpSize => fix_bmp_size(buffer),
        RepairAction::FixBmpDataOffset => fix_bmp_data_offset(buffer),
        RepairAction::RealignIsoBmff => realign_isobmff(buffer),
        RepairAction::RepairMoovBox => repair_oversized_boxes(buffer),
        RepairAction::TrimAfterLastBox => trim_after_last_box(buffer),
        RepairAction::FixRiffSize => fix_riff_size(buffer),
        RepairAction::FixGifVersion => fix_gif_version(buffer),
        RepairAction::AppendGifTrailer => append_terminator(buffer, &[0x3B]),
        RepairAction::ReconstructMpegHeader => reconstruct_mpeg_header(buffer),
        RepairAction::ExciseNullRegions => excise_null_regions(buffer),
        RepairAction::ResyncStartCodes => resync_start_codes(buffer),
        RepairAction::TrimTrailingGarbage => mpeg_trim_trailing(buffer),
        RepairAction::AppendMpegEndCode => append_terminator(buffer, &[0x00, 0x00, 0x01, 0xB9]),
        RepairAction::AlignSwfSignature => align_swf_signature(buffer),
        RepairAction::FixSwfSize => fix_swf_size(buffer),
        RepairAction::TrimSwfTrailingNulls => trim_swf_trailing_nulls(buffer),
    }
}

fn magic_for(extension: &str) -> &'static [u8] {
    match extension {
        "jpg" => b"\xFF\xD8\xFF",
        "png" => b"\x89PNG\r\n\x1A\n",
        "gif" => b"GIF8",
        _ => b"",
    }
}

fn trim_leading_garbage(extension: &str, buffer: &mut Vec<u8>) -> ActionOutcome {
    let magic = magic_for(extension);
    if magic.is_empty() {
        return ActionOutcome::Unneeded;
    }
    if buffer.starts_with(magic) {
        return ActionOutcome::Unneeded;
    }
    let window = &buffer[..buffer.len().min(64 * 1024)];
    match memchr::memmem::find(window, magic) {
        Some(pos) if pos > 0 => {
            buffer.drain(..pos);
            ActionOutcome::Applied
        }
        _ => ActionOutcome::Failed,
    }
}

fn fix_jpeg_marker(buffer: &mut Vec<u8>) -> ActionOutcome {
    if buffer.len() < 4 || !buffer.starts_with(b"\xFF\xD8\xFF") {
        return ActionOutcome::Failed;
    }
    let marker = buffer[3];
    let valid = (0xC0..=0xFE).contains(&marker) && !(0xD0..=0xD7).contains(&marker);
    if valid {
        ActionOutcome::Unneeded
    } else {
        buffer[3] = 0xE0;
        ActionOutcome::Applied
    }
}

fn append_terminator(buffer: &mut Vec<u8>, terminator: &[u8]) -> ActionOutcome {
    if buffer.ends_with(terminator) {
        ActionOutcome::Unneeded
    } else {
        buffer.extend_from_slice(terminator);
        ActionOutcome::Applied
    }
}

fn trim_after_last(buffer: &mut Vec<u8>, terminator: &[u8]) -> ActionOutcome {
    match memchr::memmem::rfind(buffer, terminator) {
        Some(pos) => {
            let end = pos + terminator.len();
            if end < buffer.len() {
                buffer.truncate(end);
                ActionOutcome::Applied
            } else {
                ActionOutcome::Unneeded
            }
        }
        None => ActionOutcome::Failed,
    }
}

/// Recomputes the CRC32 of every chunk whose stored value mismatches.
fn fix_png_crcs(buffer: &mut Vec<u8>) -> ActionOutcome {
    if buffer.len() < 12 || !buffer.starts_with(b"\x89PNG\r\n\x1A\n") {
        return ActionOutcome::Failed;
    }
    let mut pos = 8usize;
    let mut fixed = 0usize;
    while pos + 12 <= buffer.len() {
        let len = u32::from_be_bytes([
            buffer[pos],
            buffer[pos + 1],
            buffer[pos + 2],
            buffer[pos + 3],
        ]) as usize;
        let chunk_end = pos + 8 + len + 4;
        if len > 0x7FFF_FFFF || chunk_end > buffer.len() {
            break;
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buffer[pos + 4..pos + 8 + len]);
        let crc = hasher.finalize();
        let stored = u32::from_be_bytes([
            buffer[chunk_end - 4],
            buffer[chunk_end - 3],
            buffer[chunk_end - 2],
            buffer[chunk_end - 1],
        ]);
        if stored != crc {
            buffer[chunk_end - 4..chunk_end].copy_from_slice(&crc.to_be_bytes());
            fixed += 1;
        }
        if &buffer[pos + 4..pos + 8] == b"IEND" {
            break;
        }
        pos = chunk_end;
    }
    if fixed > 0 {
        ActionOutcome::Applied
    } else {
        ActionOutcome::Unneeded
    }
}

fn append_png_iend(buffer: &mut Vec<u8>) -> ActionOutcome {
    const IEND: &[u8] = b"\x00\x00\x00\x00IEND\xAE\x42\x60\x82";
    if buffer.ends_with(&IEND[4..]) {
        ActionOutcome::Unneeded
    } else {
        buffer.extend_from_slice(IEND);
        ActionOutcome::Applied
    }
}

fn fix_bmp_size(buffer: &mut Vec<u8>) -> ActionOutcome {
    if buffer.len() < 6 || !buffer.starts_with(b"BM") {
        return ActionOutcome::Failed;
    }
    let actual = buffer.len() as u32;
    let declared = u32::from_le_bytes([buffer[2], buffer[3], buffer[4], buffer[5]]);
    if declared == actual {
        return ActionOutcome::Unneeded;
    }
    buffer[2..6].copy_from_slice(&actual.to_le_bytes());
    ActionOutcome::Applied
}

fn fix_bmp_data_offset(buffer: &mut Vec<u8>) -> ActionOutcome {
    if buffer.len() < 54 || !buffer.starts_with(b"BM") {
        return ActionOutcome::Failed;
    }
    let data_off = u32::from_le_bytes([buffer[10], buffer[11], buffer[12], buffer[13]]);
    if (data_off as usize) <= buffer.len() {
        return ActionOutcome::Unneeded;
    }
    let dib_size = u32::from_le_bytes([buffer[14], buffer[15], buffer[16], buffer[17]]);
    let corrected = 14 + dib_size;
    buffer[10..14].copy_from_slice(&corrected.to_le_bytes());
    ActionOutcome::Applied
}

/// Drops everything before the first plausible `ftyp` box.
fn realign_isobmff(buffer: &mut Vec<u8>) -> ActionOutcome {
    let window_len = buffer.len().min(64 * 1024);
    let mut pos = 4usize;
    while pos < window_len {
        let Some(rel) = memchr::memmem::find(&buffer[pos..window_len], b"ftyp") else {
            return ActionOutcome::Failed;
        };
        let at = pos + rel;
        let box_start = at - 4;
        let size = u32::from_be_bytes([
            buffer[box_start],
            buffer[box_start + 1],
            buffer[box_start + 2],
            buffer[box_start + 3],
        ]);
        if (8..=4096).contains(&size) {
            if box_start == 0 {
                return ActionOutcome::Unneeded;
            }
            buffer.drain(..box_start);
            return ActionOutcome::Applied;
        }
        pos = at + 4;
    }
    ActionOutcome::Failed
}

/// Truncates a box whose declared size runs past the buffer down to
/// the bytes that remain.
fn repair_oversized_boxes(buffer: &mut Vec<u8>) -> ActionOutcome {
    let mut pos = 0usize;
    let mut patched = false;
    while pos + 8 <= buffer.len() {
        let size = u32::from_be_bytes([
            buffer[pos],
            buffer[pos + 1],
            buffer[pos + 2],
            buffer[pos + 3],
        ]) as u64;
        let advance = match size {
            0 => break,
            1 => {
                if pos + 16 > buffer.len() {
                    break;
                }
                u64::from_be_bytes([
                    buffer[pos + 8],
                    buffer[pos + 9],
                    buffer[pos + 10],
                    buffer[pos + 11],
                    buffer[pos + 12],
                    buffer[pos + 13],
                    buffer[pos + 14],
                    buffer[pos + 15],
                ])
            }
            2..=7 => break,
            s => s,
        };
        let remaining = (buffer.len() - pos) as u64;
        if advance > remaining {
            if size != 1 && remaining <= u32::MAX as u64 {
                let fixed = remaining as u32;
                buffer[pos..pos + 4].copy_from_slice(&fixed.to_be_bytes());
                patched = true;
            }
            break;
        }
        pos += advance as usize;
    }
    if patched {
        ActionOutcome::Applied
    } else {
        ActionOutcome::Unneeded
    }
}

fn trim_after_last_box(buffer: &mut Vec<u8>) -> ActionOutcome {
    let mut pos = 0usize;
    while pos + 8 <= buffer.len() {
        let size = u32::from_be_bytes([
            buffer[pos],
            buffer[pos + 1],
            buffer[pos + 2],
            buffer[pos + 3],
        ]) as u64;
        let advance = match size {
            0 => return ActionOutcome::Unneeded,
            1 => {
                if pos + 16 > buffer.len() {
                    break;
                }
                u64::from_be_bytes([
                    buffer[pos + 8],
                    buffer[pos + 9],
                    buffer[pos + 10],
                    buffer[pos + 11],
                    buffer[pos + 12],
                    buffer[pos + 13],
                    buffer[pos + 14],
                    buffer[pos + 15],
                ])
            }
            2..=7 => break,
            s => s,
        };
        let box_type_ok = buffer[pos + 4..pos + 8]
            .iter()
            .all(|b| b.is_ascii_graphic() || *b == b' ');
        if !box_type_ok || pos as u64 + advance > buffer.len() as u64 {
            break;
        }
        pos += advance as usize;
    }
    if pos > 0 && pos < buffer.len() {
        buffer.truncate(pos);
        ActionOutcome::Applied
    } else {
        ActionOutcome::Unneeded
    }
}

fn fix_riff_size(buffer: &mut Vec<u8>) -> ActionOutcome {
    if buffer.len() < 12 || !buffer.starts_with(b"RIFF") {
        return ActionOutcome::Failed;
    }
    let actual = (buffer.len() as u64 - 8).min(u32::MAX as u64) as u32;
    let declared = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
    if declared == actual {
        return ActionOutcome::Unneeded;
    }
    buffer[4..8].copy_from_slice(&actual.to_le_bytes());
    ActionOutcome::Applied
}

fn fix_gif_version(buffer: &mut Vec<u8>) -> ActionOutcome {
    if buffer.len() < 6 || !buffer.starts_with(b"GIF") {
        return ActionOutcome::Failed;
    }
    if &buffer[3..6] == b"89a" || &buffer[3..6] == b"87a" {
        return ActionOutcome::Unneeded;
    }
    buffer[3..6].copy_from_slice(b"89a");
    ActionOutcome::Applied
}

/// Fixed MPEG-1 pack header used when no anchor start code survives.
/// Adequate for players, not bit-optimal.
const MPEG1_PACK_HEADER: [u8; 12] = [
    0x00, 0x00, 0x01, 0xBA, 0x21, 0x00, 0x01, 0x00, 0x01, 0x80, 0x1B, 0x91,
];

fn find_mpeg_anchor(data: &[u8], limit: usize) -> Option<usize> {
    let window = &data[..data.len().min(limit)];
    let mut pos = 0usize;
    while let Some(rel) = memchr::memmem::find(&window[pos..], b"\x00\x00\x01") {
        let at = pos + rel;
        match window.get(at + 3) {
            Some(0xBA) | Some(0xB3) => return Some(at),
            Some(_) => pos = at + 3,
            None => break,
        }
    }
    None
}

fn reconstruct_mpeg_header(buffer: &mut Vec<u8>) -> ActionOutcome {
    match find_mpeg_anchor(buffer, 1024 * 1024) {
        Some(0) => ActionOutcome::Unneeded,
        Some(pos) => {
            buffer.drain(..pos);
            ActionOutcome::Applied
        }
        None => {
            let mut rebuilt = MPEG1_PACK_HEADER.to_vec();
            rebuilt.extend_from_slice(buffer);
            *buffer = rebuilt;
            ActionOutcome::Applied
        }
    }
}

const MPEG_BLOCK: usize = 2048;

/// Drops 2048-byte blocks that are at least 92% zero.
fn excise_null_regions(buffer: &mut Vec<u8>) -> ActionOutcome {
    if buffer.len() < MPEG_BLOCK * 2 {
        return ActionOutcome::Unneeded;
    }
    let mut rebuilt = Vec::with_capacity(buffer.len());
    let mut dropped = 0usize;
    for block in buffer.chunks(MPEG_BLOCK) {
        let zeros = block.iter().filter(|&&b| b == 0).count();
        if block.len() == MPEG_BLOCK && zeros * 100 >= block.len() * 92 {
            dropped += 1;
        } else {
            rebuilt.extend_from_slice(block);
        }
    }
    if dropped == 0 {
        return ActionOutcome::Unneeded;
    }
    *buffer = rebuilt;
    ActionOutcome::Applied
}

/// Re-synchronizes at start codes after excision: leading bytes before
/// the first code go, and gaps above 1 MiB between consecutive codes
/// are collapsed to their leading 64 KiB.
fn resync_start_codes(buffer: &mut Vec<u8>) -> ActionOutcome {
    const MAX_GAP: usize = 1024 * 1024;
    const KEEP: usize = 64 * 1024;

    let Some(first) = find_mpeg_anchor(buffer, buffer.len()) else {
        return ActionOutcome::Failed;
    };

    let mut codes = Vec::new();
    let mut pos = first;
    while let Some(rel) = memchr::memmem::find(&buffer[pos..], b"\x00\x00\x01") {
        let at = pos + rel;
        if at + 3 >= buffer.len() {
            break;
        }
        let code = buffer[at + 3];
        if code >= 0xB3 || (0xC0..=0xEF).contains(&code) {
            codes.push(at);
        }
        pos = at + 3;
    }
    if codes.is_empty() {
        return ActionOutcome::Failed;
    }

    let mut rebuilt = Vec::with_capacity(buffer.len() - first);
    let mut changed = first > 0;
    for (i, &code_at) in codes.iter().enumerate() {
        let segment_end = codes.get(i + 1).copied().unwrap_or(buffer.len());
        let segment = &buffer[code_at..segment_end];
        if segment.len() > MAX_GAP {
            rebuilt.extend_from_slice(&segment[..KEEP]);
            changed = true;
        } else {
            rebuilt.extend_from_slice(segment);
        }
    }
    if !changed {
        return ActionOutcome::Unneeded;
    }
    *buffer = rebuilt;
    ActionOutcome::Applied
}

/// Truncates trailing all-zero sectors and non-MPEG garbage after the
/// last start code region.
fn mpeg_trim_trailing(buffer: &mut Vec<u8>) -> ActionOutcome {
    let mut end = buffer.len();
    while end >= 512 && buffer[end - 512..end].iter().all(|&b| b == 0) {
        end -= 512;
    }
    if end < buffer.len() {
        buffer.truncate(end);
        return ActionOutcome::Applied;
    }
    ActionOutcome::Unneeded
}

fn align_swf_signature(buffer: &mut Vec<u8>) -> ActionOutcome {
    if buffer.starts_with(b"FWS") || buffer.starts_with(b"CWS") {
        return ActionOutcome::Unneeded;
    }
    let window_len = buffer.len().min(4096);
    let fws = memchr::memmem::find(&buffer[..window_len], b"FWS");
    let cws = memchr::memmem::find(&buffer[..window_len], b"CWS");
    let pos = match (fws, cws) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return ActionOutcome::Failed,
    };
    buffer.drain(..pos);
    ActionOutcome::Applied
}

fn fix_swf_size(buffer: &mut Vec<u8>) -> ActionOutcome {
    if buffer.len() < 9 {
        return ActionOutcome::Failed;
    }
    if !buffer.starts_with(b"FWS") {
        // CWS declares the uncompressed length; leave it alone.
        return ActionOutcome::Unneeded;
    }
    let actual = buffer.len() as u32;
    let declared = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
    if declared == actual {
        return ActionOutcome::Unneeded;
    }
    buffer[4..8].copy_from_slice(&actual.to_le_bytes());
    ActionOutcome::Applied
}

fn trim_swf_trailing_nulls(buffer: &mut Vec<u8>) -> ActionOutcome {
    let mut end = buffer.len();
    while end > 9 && buffer[end - 1] == 0 {
        end -= 1;
    }
    if end < buffer.len() {
        buffer.truncate(end);
        ActionOutcome::Applied
    } else {
        ActionOutcome::Unneeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{build_jpeg, build_mpeg_ps, build_png};

    #[test]
    fn test_jpeg_append_eoi_restores_health() {
        let mut jpeg = build_jpeg(20_000);
        jpeg.truncate(jpeg.len() - 2);

        let report = damage::analyze("jpg", &jpeg, 0);
        assert!(report.repairable);

        let result = repair("jpg", &jpeg, &report);
        assert!(result.success);
        assert!(result.applied.contains(&RepairAction::AppendJpegEoi));
        assert!(result.failed.is_empty());
        let after = result.after.as_ref().unwrap();
        assert_eq!(after.level, DamageLevel::Healthy, "{:?}", after.issues);
        assert!(after.level <= result.before.level);
        // Pre-repair bytes must be untouched.
        assert!(!jpeg.ends_with(&[0xFF, 0xD9]));
    }

    #[test]
    fn test_png_crc_repair() {
        let mut png = build_png(16_000);
        let idat = memchr::memmem::find(&png, b"IDAT").unwrap();
        png[idat + 40] ^= 0xFF;

        let report = damage::analyze("png", &png, 0);
        assert!(report.structure_broken);

        let result = repair("png", &png, &report);
        assert!(result.success);
        assert!(result.applied.contains(&RepairAction::FixPngCrcs));
        assert_eq!(result.after.as_ref().unwrap().level, DamageLevel::Healthy);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let mut jpeg = build_jpeg(20_000);
        jpeg.truncate(jpeg.len() - 2);
        let report = damage::analyze("jpg", &jpeg, 0);
        let first = repair("jpg", &jpeg, &report);
        let repaired = first.data.unwrap();

        let report2 = damage::analyze("jpg", &repaired, 0);
        assert_eq!(report2.level, DamageLevel::Healthy);
        assert!(report2.repair_plan.is_empty());
        let second = repair("jpg", &repaired, &report2);
        assert!(second.applied.is_empty());
        assert_eq!(second.fingerprint_before, first.fingerprint_after.unwrap());
    }

    #[test]
    fn test_mpeg_excision_drops_null_blocks() {
        let mut mpeg = build_mpeg_ps(512 * 1024);
        // Zero the middle 40% on 2048-byte boundaries.
        let len = mpeg.len();
        let start = (len * 3 / 10) / MPEG_BLOCK * MPEG_BLOCK;
        let end = (len * 7 / 10) / MPEG_BLOCK * MPEG_BLOCK;
        mpeg[start..end].fill(0);

        let report = damage::analyze("mpg", &mpeg, 0);
        assert!(report.null_regions);
        assert!(report.repairable);
        assert!(report.repair_plan.contains(&RepairAction::ExciseNullRegions));

        let result = repair("mpg", &mpeg, &report);
        assert!(result.success, "failed: {:?}", result.failed);
        let repaired = result.data.unwrap();
        let after = damage::analyze("mpg", &repaired, 0);
        assert!(after.percent_null < 20.0);
        assert!(repaired.ends_with(&[0x00, 0x00, 0x01, 0xB9]));
    }

    #[test]
    fn test_swf_size_rewrite() {
        let mut swf = b"FWS\x0A".to_vec();
        swf.extend_from_slice(&999u32.to_le_bytes());
        swf.push(0x78);
        swf.extend(crate::testutil::filler(8192));
        let report = damage::analyze("swf", &swf, 0);
        let result = repair("swf", &swf, &report);
        if let Some(data) = &result.data {
            let declared = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
            assert_eq!(declared as usize, data.len());
        }
    }

    #[test]
    fn test_failed_repair_keeps_original() {
        // Garbage that claims to be a JPEG: nothing to realign to.
        let garbage = vec![0x55u8; 8192];
        let report = damage::analyze("jpg", &garbage, 0);
        let result = repair("jpg", &garbage, &report);
        if !result.success {
            assert!(result.data.is_none());
            assert!(result.fingerprint_after.is_none());
        }
    }
}
