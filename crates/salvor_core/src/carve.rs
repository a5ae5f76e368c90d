//! The four carve strategies. Given a magic hit and its signature,
//! each strategy materializes the candidate bytes, decides their
//! extent, and classifies the result.
//!
//! Nothing discovered is silently discarded: a candidate that fails
//! validation is still emitted as a damaged record unless the
//! initiating magic was ambiguous.

use crate::catalog::{CarveMode, Signature, SignatureCatalog, TS_PACKET_SIZE};
use crate::damage::{self, DamageReport};
use crate::entropy::compute_entropy;
use crate::error::Result;
use crate::source::BlockSource;
use crate::types::ValidationState;
use crate::validate;
use std::sync::Arc;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CarverConfig {
    /// First-read cap for footer carves.
    pub footer_probe_cap: u64,
    pub sector_size: u64,
    /// MaxRead fallback caps by category.
    pub image_cap: u64,
    pub audio_document_cap: u64,
    pub default_cap: u64,
    /// `size == 0` ISO boxes extend at most this far.
    pub open_box_cap: u64,
    pub entropy_window: usize,
    pub entropy_drop: f64,
}

impl Default for CarverConfig {
    fn default() -> Self {
        Self {
            footer_probe_cap: 8 * MIB,
            sector_size: 512,
            image_cap: 50 * MIB,
            audio_document_cap: 100 * MIB,
            default_cap: 200 * MIB,
            open_box_cap: 500 * MIB,
            entropy_window: 32 * 1024,
            entropy_drop: 3.5,
        }
    }
}

/// A materialized candidate.
#[derive(Debug, Clone)]
pub struct CarvedFile {
    pub signature: &'static Signature,
    pub offset: u64,
    pub data: Vec<u8>,
    pub validation: ValidationState,
    pub damage: Option<DamageReport>,
}

impl CarvedFile {
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation.is_workable()
    }
}

/// A footer-bearing header whose footer was not found in the first
/// read; input to the bifragment gap pass.
#[derive(Debug, Clone)]
pub struct OrphanHeader {
    pub signature: &'static Signature,
    pub offset: u64,
    pub head_len: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CarveOutcome {
    pub file: Option<CarvedFile>,
    pub orphan: Option<OrphanHeader>,
}

impl CarveOutcome {
    fn rejected() -> Self {
        Self::default()
    }
}

pub struct Carver {
    catalog: Arc<SignatureCatalog>,
    config: CarverConfig,
}

impl Carver {
    #[must_use]
    pub fn new(catalog: Arc<SignatureCatalog>) -> Self {
        Self::with_config(catalog, CarverConfig::default())
    }

    #[must_use]
    pub fn with_config(catalog: Arc<SignatureCatalog>, config: CarverConfig) -> Self {
        Self { catalog, config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &CarverConfig {
        &self.config
    }

    /// Carves one candidate at `offset`. `ambiguous` marks a hit from a
    /// short/common magic: those initiate a carve but on validation
    /// failure are dropped instead of emitted as damaged.
    pub fn carve<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        offset: u64,
        sig: &'static Signature,
        ambiguous: bool,
    ) -> Result<CarveOutcome> {
        if offset >= source.size() {
            return Ok(CarveOutcome::rejected());
        }
        match sig.carve_mode {
            CarveMode::Footer => self.carve_footer(source, offset, sig, ambiguous),
            CarveMode::Header => self.carve_header(source, offset, sig, ambiguous),
            CarveMode::IsoBmff => self.carve_isobmff(source, offset, sig, ambiguous),
            CarveMode::MaxRead => self.carve_maxread(source, offset, sig, ambiguous),
        }
    }

    /// Classifies carved bytes, attaching a damage report to anything
    /// that does not validate cleanly.
    fn finish(
        &self,
        sig: &'static Signature,
        offset: u64,
        data: Vec<u8>,
        ambiguous: bool,
        expected_size: u64,
    ) -> CarveOutcome {
        let validation = validate::validate(sig, &data);
        if validation.is_workable() {
            return CarveOutcome {
                file: Some(CarvedFile {
                    signature: sig,
                    offset,
                    data,
                    validation,
                    damage: None,
                }),
                orphan: None,
            };
        }
        if ambiguous {
            return CarveOutcome::rejected();
        }
        let report = damage::analyze(sig.extension, &data, expected_size);
        CarveOutcome {
            file: Some(CarvedFile {
                signature: sig,
                offset,
                data,
                validation,
                damage: Some(report),
            }),
            orphan: None,
        }
    }

    fn carve_footer<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        offset: u64,
        sig: &'static Signature,
        ambiguous: bool,
    ) -> Result<CarveOutcome> {
        let footer = sig.footer.unwrap_or(b"");
        let remaining = source.size() - offset;
        let probe = sig
            .max_size
            .min(remaining)
            .min(self.config.footer_probe_cap);
        let data = source.read_at(offset, probe as usize)?;
        if data.len() < 4 {
            return Ok(CarveOutcome::rejected());
        }

        let end = if sig.extension == "jpg" {
            memchr::memmem::rfind(&data[2..], footer).map(|p| p + 2 + footer.len())
        } else {
            self.first_footer_at_or_after_min(&data, footer, sig.min_size as usize)
        };

        match end {
            Some(end) => {
                let mut data = data;
                data.truncate(end);
                Ok(self.finish(sig, offset, data, ambiguous, 0))
            }
            None => {
                // No terminator in the probe window. Keep the header as
                // a bifragment candidate and emit the trimmed partial
                // bytes as a damaged record, never as a clean file.
                let trimmed = self.entropy_trim_len(&data);
                let mut partial = data;
                partial.truncate(trimmed.max(footer.len()));
                let head_len = partial.len() as u64;
                let orphan = Some(OrphanHeader {
                    signature: sig,
                    offset,
                    head_len,
                });
                if ambiguous {
                    return Ok(CarveOutcome { file: None, orphan });
                }
                let report = damage::analyze(sig.extension, &partial, 0);
                Ok(CarveOutcome {
                    file: Some(CarvedFile {
                        signature: sig,
                        offset,
                        data: partial,
                        validation: ValidationState::Nonworkable(
                            "terminator not found in probe window".to_string(),
                        ),
                        damage: Some(report),
                    }),
                    orphan,
                })
            }
        }
    }

    fn first_footer_at_or_after_min(
        &self,
        data: &[u8],
        footer: &[u8],
        min_size: usize,
    ) -> Option<usize> {
        let mut from = footer.len().min(data.len());
        while let Some(rel) = memchr::memmem::find(&data[from..], footer) {
            let end = from + rel + footer.len();
            if end >= min_size {
                return Some(end);
            }
            from += rel + 1;
        }
        None
    }

    fn carve_header<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        offset: u64,
        sig: &'static Signature,
        ambiguous: bool,
    ) -> Result<CarveOutcome> {
        let head = source.read_at(offset, 4096.max(256))?;
        if head.len() < 256 {
            return Ok(CarveOutcome::rejected());
        }
        if !validate::structural_check(sig.extension, &head)
            && !header_prefix_plausible(sig.extension, &head)
        {
            return Ok(CarveOutcome::rejected());
        }
        let Some(declared) = declared_size(sig.extension, &head) else {
            return Ok(CarveOutcome::rejected());
        };
        let remaining = source.size() - offset;
        let size = declared.clamp(sig.min_size, sig.max_size).min(remaining);
        let data = source.read_at(offset, size as usize)?;
        Ok(self.finish(sig, offset, data, ambiguous, declared))
    }

    fn carve_isobmff<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        offset: u64,
        sig: &'static Signature,
        ambiguous: bool,
    ) -> Result<CarveOutcome> {
        let remaining = source.size() - offset;
        let cap = sig.max_size.min(remaining);
        let Some(walk) = self.walk_isobmff(source, offset, cap)? else {
            return Ok(CarveOutcome::rejected());
        };
        let data = source.read_at(offset, walk.total as usize)?;
        Ok(self.finish(sig, offset, data, ambiguous, walk.total))
    }

    fn walk_isobmff<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        offset: u64,
        cap: u64,
    ) -> Result<Option<IsoWalk>> {
        let mut pos = 0u64;
        let mut boxes = 0usize;
        let mut saw_ftyp = false;
        let mut saw_movie_data = false;

        while pos + 8 <= cap {
            let header = source.read_at(offset + pos, 16)?;
            if header.len() < 8 {
                break;
            }
            let size32 =
                u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
            let box_type: [u8; 4] = [header[4], header[5], header[6], header[7]];

            let known = ISO_TOP_LEVEL.contains(&&box_type);
            if boxes == 0 {
                if &box_type != b"ftyp" || !(8..=4096).contains(&size32) {
                    return Ok(None);
                }
                saw_ftyp = true;
            } else if !known {
                // Unknown type terminates the walk once the file shape
                // is established.
                if boxes >= 2 {
                    break;
                }
                return Ok(None);
            }
            if &box_type == b"moov" || &box_type == b"mdat" {
                saw_movie_data = true;
            }

            let advance = match size32 {
                0 => {
                    // To-end-of-source box: honored only once the walk
                    // is credible, and capped.
                    if boxes < 2 {
                        return Ok(None);
                    }
                    pos = cap.min(pos + self.config.open_box_cap);
                    boxes += 1;
                    break;
                }
                1 => {
                    if header.len() < 16 {
                        break;
                    }
                    u64::from_be_bytes([
                        header[8], header[9], header[10], header[11], header[12], header[13],
                        header[14], header[15],
                    ])
                }
                2..=7 => return Ok(None),
                s => s,
            };
            if advance < 8 {
                break;
            }
            boxes += 1;
            if pos + advance > cap {
                // Final box truncated by the cap.
                pos = cap;
                break;
            }
            pos += advance;
        }

        if !saw_ftyp || !saw_movie_data || boxes < 2 {
            return Ok(None);
        }
        Ok(Some(IsoWalk { total: pos, boxes }))
    }

    fn carve_maxread<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        offset: u64,
        sig: &'static Signature,
        ambiguous: bool,
    ) -> Result<CarveOutcome> {
        let remaining = source.size() - offset;

        if let Some(exact) = self.probe_exact_size(source, offset, sig)? {
            let size = exact.clamp(sig.min_size, sig.max_size).min(remaining);
            let data = source.read_at(offset, size as usize)?;
            return Ok(self.finish(sig, offset, data, ambiguous, exact));
        }

        let cap = self
            .category_cap(sig)
            .min(sig.max_size)
            .min(remaining);
        let mut data = source.read_at(offset, cap as usize)?;
        if data.is_empty() {
            return Ok(CarveOutcome::rejected());
        }

        // Trim at the next confident file start, then by entropy.
        if data.len() > 512 {
            let search_from = (sig.min_size as usize).clamp(512, data.len());
            if let Some(boundary) = self.catalog.next_boundary(&data, search_from) {
                data.truncate(boundary);
            }
        }
        let trimmed = self.entropy_trim_len(&data);
        data.truncate(trimmed);

        Ok(self.finish(sig, offset, data, ambiguous, 0))
    }

    fn category_cap(&self, sig: &Signature) -> u64 {
        use crate::types::FileCategory;
        match sig.category {
            FileCategory::Image => self.config.image_cap,
            FileCategory::Audio | FileCategory::Document => self.config.audio_document_cap,
            _ => self.config.default_cap,
        }
    }

    /// Format-specific exact-size probes for MaxRead carves.
    fn probe_exact_size<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        offset: u64,
        sig: &'static Signature,
    ) -> Result<Option<u64>> {
        let head = source.read_at(offset, 64 * 1024)?;
        if head.len() < 32 {
            return Ok(None);
        }
        let size = match sig.extension {
            "flv" => walk_flv_tags(source, offset, &head)?,
            "wmv" | "wma" => asf_object_size(&head),
            "ogg" | "ogv" => walk_ogg_pages(source, offset, &head)?,
            "rm" => head
                .get(14..18)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64)
                .filter(|&s| s > 18),
            "swf" => head
                .get(4..8)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64)
                .filter(|&s| s > 8),
            "ts" => walk_ts_packets(source, offset)?,
            "mkv" | "webm" => ebml_total_size(&head),
            _ => None,
        };
        Ok(size)
    }

    /// Entropy trim for MaxRead fallbacks: cut at a collapse from the
    /// opening baseline, then drop trailing all-zero sectors.
    fn entropy_trim_len(&self, data: &[u8]) -> usize {
        let window = self.config.entropy_window;
        let mut end = data.len();

        if data.len() >= window * 2 {
            let entropies: Vec<f64> = data
                .chunks(window)
                .take_while(|c| c.len() == window)
                .map(compute_entropy)
                .collect();
            let baseline_windows: Vec<f64> = entropies
                .iter()
                .take(4)
                .copied()
                .filter(|&e| e >= 4.0)
                .collect();
            let baseline = if baseline_windows.is_empty() {
                0.0
            } else {
                baseline_windows.iter().sum::<f64>() / baseline_windows.len() as f64
            };
            for (i, &e) in entropies.iter().enumerate().skip(1) {
                let collapsed = e < 0.5;
                let dropped = baseline > 0.0 && baseline - e >= self.config.entropy_drop;
                if collapsed || dropped {
                    end = i * window;
                    break;
                }
            }
        }

        // Trailing zero sectors, rounded up to a sector boundary.
        let sector = self.config.sector_size as usize;
        let mut zeros = 0usize;
        while zeros < end && data[end - 1 - zeros] == 0 {
            zeros += 1;
        }
        if zeros >= sector {
            let kept = end - zeros;
            end = kept.div_ceil(sector) * sector;
        }
        end.max(1)
    }

    /// Re-applies the carve-mode trim to an in-memory buffer; the saver
    /// uses this so the written file matches the computed size.
    #[must_use]
    pub fn retrim(&self, sig: &'static Signature, data: &[u8]) -> usize {
        match sig.carve_mode {
            CarveMode::Footer => {
                let footer = sig.footer.unwrap_or(b"");
                if sig.extension == "jpg" {
                    memchr::memmem::rfind(data, footer)
                        .map(|p| p + footer.len())
                        .unwrap_or(data.len())
                } else {
                    self.first_footer_at_or_after_min(data, footer, sig.min_size as usize)
                        .unwrap_or(data.len())
                }
            }
            CarveMode::Header => declared_size(sig.extension, data)
                .map(|s| (s as usize).min(data.len()))
                .unwrap_or(data.len()),
            CarveMode::IsoBmff => walk_isobmff_buffer(data).unwrap_or(data.len()),
            CarveMode::MaxRead => {
                let mut end = data.len();
                if data.len() > 512 {
                    let search_from = (sig.min_size as usize).clamp(512, data.len());
                    if let Some(boundary) = self.catalog.next_boundary(data, search_from) {
                        end = boundary;
                    }
                }
                end.min(self.entropy_trim_len(&data[..end]))
            }
        }
    }
}

struct IsoWalk {
    total: u64,
    #[allow(dead_code)]
    boxes: usize,
}

const ISO_TOP_LEVEL: [&[u8; 4]; 14] = [
    b"ftyp", b"moov", b"mdat", b"free", b"skip", b"wide", b"meta", b"moof", b"mfra", b"styp",
    b"sidx", b"ssix", b"pdin", b"uuid",
];

fn header_prefix_plausible(extension: &str, head: &[u8]) -> bool {
    match extension {
        "bmp" => head.starts_with(b"BM"),
        "ico" => head.starts_with(b"\x00\x00\x01\x00") || head.starts_with(b"\x00\x00\x02\x00"),
        "webp" | "avi" | "wav" => head.starts_with(b"RIFF"),
        "aiff" => head.starts_with(b"FORM"),
        "cab" => head.starts_with(b"MSCF"),
        _ => false,
    }
}

/// Size declared in a fixed header field, per format.
fn declared_size(extension: &str, head: &[u8]) -> Option<u64> {
    match extension {
        "bmp" => head
            .get(2..6)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64),
        "webp" | "avi" | "wav" => head
            .get(4..8)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64 + 8),
        "aiff" => head
            .get(4..8)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64 + 8),
        "cab" => head
            .get(8..12)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64),
        "ico" => ico_directory_size(head),
        _ => None,
    }
}

/// ICO has no size field; the directory entries bound the payload.
fn ico_directory_size(head: &[u8]) -> Option<u64> {
    if head.len() < 6 {
        return None;
    }
    let count = u16::from_le_bytes([head[4], head[5]]) as usize;
    if count == 0 || count > 256 {
        return None;
    }
    let mut end = 0u64;
    for i in 0..count {
        let entry = 6 + i * 16;
        let bytes = head.get(entry..entry + 16)?;
        let img_size = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as u64;
        let img_offset = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as u64;
        end = end.max(img_offset + img_size);
    }
    (end > 0).then_some(end)
}

/// FLV: fixed header, then tag walk
/// (type + 3-byte size + 7 more header bytes + payload + 4-byte back-pointer).
fn walk_flv_tags<S: BlockSource + ?Sized>(
    source: &S,
    offset: u64,
    head: &[u8],
) -> Result<Option<u64>> {
    if head.len() < 13 || !head.starts_with(b"FLV") {
        return Ok(None);
    }
    let data_offset = u32::from_be_bytes([head[5], head[6], head[7], head[8]]) as u64;
    if data_offset < 9 {
        return Ok(None);
    }
    // First previous-tag-size field sits right after the header.
    let mut pos = data_offset + 4;
    let limit = source.size() - offset;
    loop {
        let tag = source.read_at(offset + pos, 11)?;
        if tag.len() < 11 {
            break;
        }
        let tag_type = tag[0];
        if !matches!(tag_type, 8 | 9 | 18) {
            break;
        }
        let payload = u32::from_be_bytes([0, tag[1], tag[2], tag[3]]) as u64;
        let next = pos + 11 + payload + 4;
        if next > limit {
            break;
        }
        pos = next;
    }
    Ok((pos > data_offset + 4).then_some(pos))
}

/// ASF: the 24-byte header object carries a 64-bit LE object size.
fn asf_object_size(head: &[u8]) -> Option<u64> {
    let size = head.get(16..24).map(|b| {
        u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    })?;
    (size >= 30 && size < 64 * 1024 * 1024 * 1024).then_some(size)
}

/// OGG: accumulate page sizes (27-byte header + segment table + sum of
/// segment lengths) while the page pattern holds.
fn walk_ogg_pages<S: BlockSource + ?Sized>(
    source: &S,
    offset: u64,
    head: &[u8],
) -> Result<Option<u64>> {
    if !head.starts_with(b"OggS") {
        return Ok(None);
    }
    let mut pos = 0u64;
    let limit = source.size() - offset;
    loop {
        let page = source.read_at(offset + pos, 27 + 255)?;
        if page.len() < 27 || !page.starts_with(b"OggS") || page[4] != 0 {
            break;
        }
        let n_segments = page[26] as usize;
        if page.len() < 27 + n_segments {
            break;
        }
        let body: u64 = page[27..27 + n_segments].iter().map(|&b| b as u64).sum();
        let next = pos + 27 + n_segments as u64 + body;
        if next > limit || next == pos {
            break;
        }
        pos = next;
    }
    Ok((pos > 0).then_some(pos))
}

/// MPEG-TS: count 188-byte sync packets.
fn walk_ts_packets<S: BlockSource + ?Sized>(source: &S, offset: u64) -> Result<Option<u64>> {
    const BATCH: usize = 512 * TS_PACKET_SIZE;
    let mut pos = 0u64;
    loop {
        let chunk = source.read_at(offset + pos, BATCH)?;
        let mut advanced = 0usize;
        while advanced + TS_PACKET_SIZE <= chunk.len() && chunk[advanced] == 0x47 {
            advanced += TS_PACKET_SIZE;
        }
        pos += advanced as u64;
        // Stop at the first broken sync or a short final batch.
        if advanced < chunk.len() || chunk.len() < BATCH {
            break;
        }
    }
    Ok((pos >= TS_PACKET_SIZE as u64 * 3).then_some(pos))
}

/// EBML variable-length integer: leading zero bits of the first byte
/// give the width; the marker bit is masked off the value.
fn read_ebml_vint(data: &[u8], pos: usize) -> Option<(u64, usize)> {
    let first = *data.get(pos)?;
    if first == 0 {
        return None;
    }
    let width = first.leading_zeros() as usize + 1;
    if pos + width > data.len() {
        return None;
    }
    let mut value = (first & (0xFF >> width)) as u64;
    for i in 1..width {
        value = (value << 8) | data[pos + i] as u64;
    }
    Some((value, width))
}

/// MKV/WebM: EBML header element, then the Segment element's declared
/// size bounds the file.
fn ebml_total_size(head: &[u8]) -> Option<u64> {
    if !head.starts_with(b"\x1A\x45\xDF\xA3") {
        return None;
    }
    let (header_size, width) = read_ebml_vint(head, 4)?;
    let mut pos = 4 + width + header_size as usize;
    // Expect the Segment element ID (0x18538067).
    let id = head.get(pos..pos + 4)?;
    if id != [0x18, 0x53, 0x80, 0x67] {
        return None;
    }
    pos += 4;
    let (segment_size, width) = read_ebml_vint(head, pos)?;
    // All-ones means "unknown size"; no exact probe then.
    let unknown_mask = (1u64 << (7 * width)) - 1;
    if segment_size == unknown_mask {
        return None;
    }
    Some((pos + width) as u64 + segment_size)
}

/// Box walk over an in-memory buffer; used by the saver's re-trim.
fn walk_isobmff_buffer(data: &[u8]) -> Option<usize> {
    let mut pos = 0usize;
    let mut boxes = 0usize;
    while pos + 8 <= data.len() {
        let size32 =
            u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as u64;
        let box_type: [u8; 4] = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];
        if !ISO_TOP_LEVEL.contains(&&box_type) {
            break;
        }
        let advance = match size32 {
            0 => (data.len() - pos) as u64,
            1 => {
                if pos + 16 > data.len() {
                    break;
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
            2..=7 => break,
            s => s,
        };
        if advance < 8 || pos as u64 + advance > data.len() as u64 {
            break;
        }
        pos += advance as usize;
        boxes += 1;
    }
    (boxes >= 2).then_some(pos)
}
