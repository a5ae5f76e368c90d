//! Scan orchestration: mode selection, the chunk loop, the bifragment
//! second pass, parallel worker coordination and checkpointing.
//!
//! The orchestrator owns all session state. Workers communicate only
//! through channels, and only plain serializable records cross the
//! thread boundary; signature references are reconstructed on merge.

use crate::adapter::{self, DeletedEntryAdapter};
use crate::checkpoint::Checkpoint;
use crate::health;
use crate::session::{ScanCallbacks, ScanMode, ScanSession};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use salvor_core::carve::{Carver, OrphanHeader};
use salvor_core::catalog::{self, SignatureCatalog};
use salvor_core::damage;
use salvor_core::entropy::{BlockClass, EntropyThresholds, classify_block};
use salvor_core::{
    BlockSource, CoreError, DedupTracker, FileCategory, FilesystemOrigin, Provenance,
    RecoveredFile, Signature, WireRecord, fingerprint, validate,
};
use salvor_io::{ChunkOptions, RangeChunkIter, Reader};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

const CHECKPOINT_INTERVAL: u64 = 100 * 1024 * 1024;
const MAX_WORKERS: usize = 8;
const BIFRAGMENT_LOOKAHEAD: usize = 10;
const BIFRAGMENT_TAIL_CAP: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Only a failure to open the source aborts a scan.
    #[error(transparent)]
    Source(#[from] CoreError),
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Empty means every category.
    pub categories: Vec<FileCategory>,
    /// Skip the filesystem probers entirely.
    pub brute_force: bool,
    /// Widened entropy band for wear-levelled flash.
    pub ssd_aggressive: bool,
    pub parallel: bool,
    /// Scan domains larger than this are split across workers.
    pub parallel_threshold: u64,
    /// Target bytes per worker unit for the greedy assignment.
    pub worker_range_bytes: u64,
    pub checkpoint_dir: Option<PathBuf>,
    pub resume: bool,
    pub adapter_timeout: Duration,
    pub progress_interval: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            brute_force: false,
            ssd_aggressive: false,
            parallel: true,
            parallel_threshold: 100 * 1024 * 1024,
            worker_range_bytes: 50 * 1024 * 1024,
            checkpoint_dir: None,
            resume: false,
            adapter_timeout: adapter::ADAPTER_TIMEOUT,
            progress_interval: Duration::from_millis(300),
        }
    }
}

/// One magic hit awaiting a carve.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    offset: u64,
    signature: &'static Signature,
    ambiguous: bool,
}

/// Messages workers send to the orchestrator. Only plain data crosses
/// the boundary.
enum WorkerMsg {
    Found(WireRecord),
    Orphan {
        offset: u64,
        head_len: u64,
        extension: String,
        category: String,
    },
    Progress {
        scanned: u64,
        empty_skipped: u64,
        entropy_skipped: u64,
    },
    Done,
}

pub struct Orchestrator {
    catalog: Arc<SignatureCatalog>,
    carver: Arc<Carver>,
    options: ScanOptions,
    callbacks: ScanCallbacks,
    adapter: Option<Arc<dyn DeletedEntryAdapter>>,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(options: ScanOptions) -> Self {
        let catalog = Arc::new(SignatureCatalog::for_categories(&options.categories));
        let carver = Arc::new(Carver::new(Arc::clone(&catalog)));
        Self {
            catalog,
            carver,
            options,
            callbacks: ScanCallbacks::default(),
            adapter: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn with_callbacks(mut self, callbacks: ScanCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn DeletedEntryAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Cooperative cancellation flag; consulted at every chunk and
    /// every candidate.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<SignatureCatalog> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn carver(&self) -> Arc<Carver> {
        Arc::clone(&self.carver)
    }

    /// Runs one complete scan of `device`.
    pub fn scan(&self, device: &str) -> Result<ScanSession, ScanError> {
        let reader = Reader::open(device)?;
        let mut session = ScanSession::new(device, self.options.categories.clone());
        session.counters.used_mmap = reader.is_mmap();

        let drive = health::probe_path(device);
        if !drive.warning.is_empty() {
            session.warnings.push(drive.warning.clone());
        }
        session.drive_health = Some(drive);

        // Mode selection: a parseable filesystem restricts the domain
        // to its free ranges; anything else scans the whole device.
        let mut ranges = vec![(0u64, reader.size())];
        if !self.options.brute_force {
            match salvor_fs::probe(&reader) {
                Ok(info) => {
                    if info.free_ranges.is_empty() {
                        session
                            .warnings
                            .push(format!("{}: no free space to scan", info.family));
                    } else {
                        ranges = info.free_ranges.clone();
                        session.mode = ScanMode::Forensic;
                    }
                    session.filesystem = Some(info);
                }
                Err(e) => {
                    tracing::info!(error = %e, "filesystem probe failed, brute-force mode");
                    session
                        .warnings
                        .push(format!("filesystem probe: {e}; scanning whole device"));
                }
            }
        }

        let dedup = Mutex::new(DedupTracker::new());

        if let Some(fs_adapter) = &self.adapter {
            self.run_adapter(fs_adapter, device, &mut session, &dedup);
        }

        let total: u64 = ranges.iter().map(|&(s, e)| e - s).sum();
        let orphans = if self.options.parallel && total > self.options.parallel_threshold {
            match self.parallel_scan(device, &ranges, &mut session, &dedup) {
                Ok(orphans) => orphans,
                Err(reason) => {
                    tracing::warn!(reason = %reason, "parallel startup failed, falling back in-process");
                    self.sequential_scan(&reader, &ranges, &mut session, &dedup)
                }
            }
        } else {
            self.sequential_scan(&reader, &ranges, &mut session, &dedup)
        };

        if session.mode == ScanMode::Forensic && !self.cancel.load(Ordering::Relaxed) {
            self.bifragment_pass(&reader, &orphans, &ranges, &mut session, &dedup);
        }

        session.cancelled = self.cancel.load(Ordering::Relaxed);
        session.finished_at = Some(Utc::now());
        if session.cancelled {
            session.status = Some("cancelled".to_string());
        } else if let Some(dir) = &self.options.checkpoint_dir {
            Checkpoint::clear(dir);
        }
        self.callbacks.emit_complete(&session);
        Ok(session)
    }

    fn run_adapter(
        &self,
        fs_adapter: &Arc<dyn DeletedEntryAdapter>,
        device: &str,
        session: &mut ScanSession,
        dedup: &Mutex<DedupTracker>,
    ) {
        let outcome = adapter::run_with_timeout(
            Arc::clone(fs_adapter),
            session.categories.clone(),
            Arc::clone(&self.cancel),
            self.options.adapter_timeout,
        );
        if outcome.timed_out {
            session
                .warnings
                .push("filesystem adapter timed out; partial results retained".to_string());
        }
        if let Some(error) = outcome.error {
            session.warnings.push(format!("filesystem adapter: {error}"));
        }
        for entry in outcome.entries {
            let Some(signature) = self.catalog.lookup(&entry.extension, entry.category) else {
                continue;
            };
            if !dedup.lock().register(entry.byte_offset, None) {
                continue;
            }
            let mut file = RecoveredFile::carved(signature, entry.byte_offset, entry.size, device);
            file.provenance = Provenance::Filesystem;
            file.origin = Some(FilesystemOrigin {
                name: entry.name,
                path: entry.path,
                inode: entry.inode,
                deleted_time: entry.deleted_time,
            });
            self.callbacks.emit_file_found(&file);
            session.add_file(file);
        }
    }

    fn thresholds(&self) -> EntropyThresholds {
        if self.options.ssd_aggressive {
            EntropyThresholds::ssd_aggressive()
        } else {
            EntropyThresholds::default()
        }
    }

    /// Single-threaded chunk loop over the scan domain.
    fn sequential_scan(
        &self,
        source: &dyn BlockSource,
        ranges: &[(u64, u64)],
        session: &mut ScanSession,
        dedup: &Mutex<DedupTracker>,
    ) -> Vec<OrphanHeader> {
        let thresholds = self.thresholds();
        let mut orphans = Vec::new();

        // Resume support: clip the domain below the checkpointed
        // offset and seed the dedup tracker with recent finds.
        let mut start_floor = 0u64;
        if self.options.resume {
            if let Some(dir) = &self.options.checkpoint_dir {
                if let Some(cp) = Checkpoint::load(dir, &session.device) {
                    tracing::info!(offset = cp.last_offset, "resuming from checkpoint");
                    start_floor = cp.last_offset;
                    session.counters.bytes_scanned = cp.bytes_scanned;
                    session.counters.entropy_skipped = cp.entropy_skipped;
                    dedup.lock().seed_offsets(cp.last_500_offsets.iter().copied());
                }
            }
        }
        let effective: Vec<(u64, u64)> = ranges
            .iter()
            .filter_map(|&(s, e)| {
                let s = s.max(start_floor);
                (s < e).then_some((s, e))
            })
            .collect();

        let empty_base = session.counters.empty_skipped;
        let mut iter = RangeChunkIter::new(source, effective, ChunkOptions::default());
        let mut last_progress = Instant::now();
        let mut last_checkpoint = session.counters.bytes_scanned;

        while let Some((offset, data)) = iter.next() {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            session.counters.bytes_scanned += data.len() as u64;

            match classify_block(&data, thresholds) {
                BlockClass::Structured => {
                    for candidate in self.collect_candidates(&data, offset) {
                        if self.cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        self.process_candidate(source, candidate, session, dedup, &mut orphans);
                    }
                }
                BlockClass::Empty | BlockClass::Random => {
                    session.counters.entropy_skipped += data.len() as u64;
                }
            }

            if session.counters.bytes_scanned - last_checkpoint >= CHECKPOINT_INTERVAL {
                self.write_checkpoint(session, offset + data.len() as u64);
                last_checkpoint = session.counters.bytes_scanned;
            }
            if last_progress.elapsed() >= self.options.progress_interval {
                session.counters.empty_skipped = empty_base + iter.skipped_empty();
                self.callbacks.emit_progress(session);
                last_progress = Instant::now();
            }
        }
        session.counters.empty_skipped = empty_base + iter.skipped_empty();
        orphans
    }

    fn write_checkpoint(&self, session: &ScanSession, last_offset: u64) {
        let Some(dir) = &self.options.checkpoint_dir else {
            return;
        };
        let mut cp = Checkpoint::new(&session.device, session.mode.as_str());
        cp.last_offset = last_offset;
        cp.file_counter = session.files_found() as u64;
        cp.files_found = session.files_found() as u64;
        cp.bytes_scanned = session.counters.bytes_scanned;
        cp.entropy_skipped = session.counters.entropy_skipped;
        let mut recent: Vec<u64> = session.files.iter().rev().take(500).map(|f| f.offset).collect();
        recent.reverse();
        cp.last_500_offsets = recent;
        if let Err(e) = cp.save(dir) {
            tracing::warn!(error = %e, "checkpoint write failed");
        }
    }

    fn collect_candidates(&self, data: &[u8], base: u64) -> Vec<Candidate> {
        chunk_search(&self.catalog, data, base)
    }

    /// Carves one candidate and routes the outcome into the session.
    fn process_candidate(
        &self,
        source: &dyn BlockSource,
        candidate: Candidate,
        session: &mut ScanSession,
        dedup: &Mutex<DedupTracker>,
        orphans: &mut Vec<OrphanHeader>,
    ) {
        if dedup.lock().is_duplicate_offset(candidate.offset) {
            return;
        }
        let outcome = match self.carver.carve(
            source,
            candidate.offset,
            candidate.signature,
            candidate.ambiguous,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(offset = candidate.offset, error = %e, "carve failed");
                return;
            }
        };

        if let Some(orphan) = outcome.orphan {
            orphans.push(orphan);
        }
        let Some(carved) = outcome.file else {
            return;
        };

        let fp = fingerprint(&carved.data);
        let accept = {
            let mut tracker = dedup.lock();
            if carved.is_valid() {
                tracker.register(candidate.offset, Some(&fp))
            } else {
                // Damaged records are emitted but never reserve the
                // offset window; a later healthy reconstruction at the
                // same spot must still be acceptable.
                !tracker.is_duplicate(candidate.offset, Some(&fp))
            }
        };
        if !accept {
            return;
        }

        let mut file = RecoveredFile::carved(
            carved.signature,
            carved.offset,
            carved.size(),
            source.path(),
        );
        file.fingerprint = Some(fp);
        file.validation = carved.validation;
        file.damage = carved.damage;
        self.callbacks.emit_file_found(&file);
        session.add_file(file);
    }

    /// Second pass, forensic mode only: for each orphan header, hunt
    /// the footer through the next free ranges and stitch the two
    /// fragments.
    fn bifragment_pass(
        &self,
        source: &dyn BlockSource,
        orphans: &[OrphanHeader],
        ranges: &[(u64, u64)],
        session: &mut ScanSession,
        dedup: &Mutex<DedupTracker>,
    ) {
        for orphan in orphans {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }
            let signature = orphan.signature;
            let Some(footer) = signature.footer else {
                continue;
            };
            let Some(idx) = ranges
                .iter()
                .position(|&(s, e)| orphan.offset >= s && orphan.offset < e)
            else {
                continue;
            };

            let head_len = (ranges[idx].1 - orphan.offset).min(signature.max_size);
            let Ok(head) = source.read_at(orphan.offset, head_len as usize) else {
                continue;
            };
            let budget = signature.max_size.saturating_sub(head.len() as u64);
            if budget == 0 {
                continue;
            }

            for &(start, end) in ranges.iter().skip(idx + 1).take(BIFRAGMENT_LOOKAHEAD) {
                let read_len = (end - start).min(budget).min(BIFRAGMENT_TAIL_CAP as u64);
                let Ok(tail_region) = source.read_at(start, read_len as usize) else {
                    continue;
                };
                let Some(pos) = memchr::memmem::find(&tail_region, footer) else {
                    continue;
                };

                let mut assembled = head.clone();
                assembled.extend_from_slice(&tail_region[..pos + footer.len()]);
                if assembled.len() as u64 > signature.max_size {
                    break;
                }

                let validation = validate::validate(signature, &assembled);
                let fp = fingerprint(&assembled);
                let accept = {
                    let mut tracker = dedup.lock();
                    if validation.is_workable() {
                        tracker.register(orphan.offset, Some(&fp))
                    } else {
                        !tracker.is_duplicate(orphan.offset, Some(&fp))
                    }
                };
                if accept {
                    let mut file = RecoveredFile::carved(
                        signature,
                        orphan.offset,
                        assembled.len() as u64,
                        source.path(),
                    );
                    file.fingerprint = Some(fp);
                    if !validation.is_workable() {
                        file.damage =
                            Some(damage::analyze(signature.extension, &assembled, 0));
                    }
                    file.validation = validation;
                    self.callbacks.emit_file_found(&file);
                    session.add_file(file);
                }
                break;
            }
        }
    }

    /// Splits ranges into worker units and distributes them by a
    /// greedy largest-first assignment balancing bytes per worker.
    fn parallel_scan(
        &self,
        device: &str,
        ranges: &[(u64, u64)],
        session: &mut ScanSession,
        dedup: &Mutex<DedupTracker>,
    ) -> Result<Vec<OrphanHeader>, String> {
        let unit_size = self.options.worker_range_bytes.max(1024 * 1024);
        let mut units: Vec<(u64, u64)> = Vec::new();
        for &(start, end) in ranges {
            let mut pos = start;
            while pos < end {
                let unit_end = (pos + unit_size).min(end);
                units.push((pos, unit_end));
                if unit_end == end {
                    break;
                }
                // Overlap between adjacent units so boundary-straddling
                // magics stay visible.
                pos = unit_end - salvor_io::DEFAULT_OVERLAP as u64;
            }
        }

        let total: u64 = ranges.iter().map(|&(s, e)| e - s).sum();
        let workers = num_cpus::get()
            .min(total.div_ceil(unit_size) as usize)
            .min(MAX_WORKERS);
        if workers <= 1 || units.len() <= 1 {
            return Err("domain too small for parallel workers".to_string());
        }

        units.sort_by_key(|&(s, e)| std::cmp::Reverse(e - s));
        let mut buckets: Vec<Vec<(u64, u64)>> = vec![Vec::new(); workers];
        let mut loads = vec![0u64; workers];
        for unit in units {
            let idx = loads
                .iter()
                .enumerate()
                .min_by_key(|&(_, &load)| load)
                .map(|(i, _)| i)
                .unwrap_or(0);
            loads[idx] += unit.1 - unit.0;
            buckets[idx].push(unit);
        }
        for bucket in &mut buckets {
            bucket.sort_by_key(|&(s, _)| s);
        }

        // Workers never share a descriptor: one reader per worker,
        // opened before any thread starts so failures fall back early.
        let mut readers = Vec::with_capacity(workers);
        for _ in 0..workers {
            readers.push(Reader::open(device).map_err(|e| e.to_string())?);
        }

        let (tx, rx): (Sender<WorkerMsg>, Receiver<WorkerMsg>) = bounded(1024);
        // Startup aborts use their own flag so a spawn failure never
        // clobbers a genuine user cancellation.
        let abort = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(workers);
        for (worker_id, (reader, bucket)) in readers.into_iter().zip(buckets).enumerate() {
            let tx = tx.clone();
            let cancel = Arc::clone(&self.cancel);
            let worker_abort = Arc::clone(&abort);
            let catalog = Arc::clone(&self.catalog);
            let carver = Arc::clone(&self.carver);
            let thresholds = self.thresholds();
            let orchestrator_view = WorkerContext {
                catalog,
                carver,
                thresholds,
            };
            let handle = std::thread::Builder::new()
                .name(format!("salvor-worker-{worker_id}"))
                .spawn(move || {
                    orchestrator_view.run(&reader, &bucket, &tx, &cancel, &worker_abort);
                });
            match handle {
                Ok(h) => handles.push(h),
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(format!("worker spawn failed: {e}"));
                }
            }
        }
        drop(tx);

        // Merge loop: cross-worker dedup and statistics aggregation
        // happen here, serially, under the dedup lock.
        let mut orphans = Vec::new();
        let mut done = 0usize;
        let mut last_progress = Instant::now();
        while done < handles.len() {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(WorkerMsg::Found(record)) => {
                    let offset = record.offset;
                    let fp = record.fingerprint.clone();
                    if let Some(file) = record.into_file(&self.catalog, device) {
                        // Same policy as the in-process path: only
                        // valid files reserve the offset window.
                        let accept = {
                            let mut tracker = dedup.lock();
                            if file.validation.is_workable() {
                                tracker.register(offset, fp.as_deref())
                            } else {
                                !tracker.is_duplicate(offset, fp.as_deref())
                            }
                        };
                        if accept {
                            self.callbacks.emit_file_found(&file);
                            session.add_file(file);
                        }
                    }
                }
                Ok(WorkerMsg::Orphan {
                    offset,
                    head_len,
                    extension,
                    category,
                }) => {
                    if let Some(cat) = FileCategory::parse(&category) {
                        if let Some(signature) = self.catalog.lookup(&extension, cat) {
                            orphans.push(OrphanHeader {
                                signature,
                                offset,
                                head_len,
                            });
                        }
                    }
                }
                Ok(WorkerMsg::Progress {
                    scanned,
                    empty_skipped,
                    entropy_skipped,
                }) => {
                    session.counters.bytes_scanned += scanned;
                    session.counters.empty_skipped += empty_skipped;
                    session.counters.entropy_skipped += entropy_skipped;
                }
                Ok(WorkerMsg::Done) => done += 1,
                Err(_) => {}
            }
            if last_progress.elapsed() >= self.options.progress_interval {
                self.callbacks.emit_progress(session);
                last_progress = Instant::now();
            }
        }
        // Drain anything that raced the final Done.
        while let Ok(msg) = rx.try_recv() {
            if let WorkerMsg::Progress {
                scanned,
                empty_skipped,
                entropy_skipped,
            } = msg
            {
                session.counters.bytes_scanned += scanned;
                session.counters.empty_skipped += empty_skipped;
                session.counters.entropy_skipped += entropy_skipped;
            }
        }
        for handle in handles {
            let _ = handle.join();
        }
        Ok(orphans)
    }
}

/// Chunk search: every catalog magic plus the discriminated container
/// scans (RIFF sub-types, ftyp brands, TS sync, TAR, ISO 9660, ZIP
/// refinement). Shared by the in-process loop and the workers.
fn chunk_search(catalog: &SignatureCatalog, data: &[u8], base: u64) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for hit in catalog.find_matches(data) {
        let window = &data[hit.offset..];
        let mut signature = hit.signature;
        if signature.extension == "mkv" {
            signature = catalog::refine_ebml(window);
        } else if signature.extension == "zip" {
            signature = catalog::classify_zip(window);
        }
        candidates.push(Candidate {
            offset: base + hit.offset as u64,
            signature,
            ambiguous: catalog::is_ambiguous(hit.pattern),
        });
    }

    // RIFF with a recognized sub-type.
    for at in memchr::memmem::find_iter(data, b"RIFF") {
        if let Some(signature) = catalog::riff_subtype(&data[at..]) {
            candidates.push(Candidate {
                offset: base + at as u64,
                signature,
                ambiguous: false,
            });
        }
    }

    // ISO-BMFF: an ftyp tag 4 bytes into a box with a known brand.
    for at in memchr::memmem::find_iter(data, b"ftyp") {
        if at >= 4 && at + 8 <= data.len() {
            if let Some(signature) = catalog::ftyp_brand(&data[at + 4..at + 8]) {
                candidates.push(Candidate {
                    offset: base + at as u64 - 4,
                    signature,
                    ambiguous: false,
                });
            }
        }
    }

    // MPEG-TS sync trains at packet-aligned offsets.
    let mut ts_hits = 0usize;
    for at in (0..data.len()).step_by(catalog::TS_PACKET_SIZE) {
        if catalog::is_mpeg_ts(data, at) {
            candidates.push(Candidate {
                offset: base + at as u64,
                signature: &catalog::SIG_TS,
                ambiguous: true,
            });
            ts_hits += 1;
            if ts_hits >= 4 {
                break;
            }
        }
    }

    // TAR: "ustar" sits 257 bytes into a 512-aligned header block.
    for at in memchr::memmem::find_iter(data, b"ustar") {
        if at >= 257 && (base + at as u64 - 257) % 512 == 0 {
            candidates.push(Candidate {
                offset: base + at as u64 - 257,
                signature: &catalog::SIG_TAR,
                ambiguous: false,
            });
        }
    }

    // ISO 9660: "CD001" at byte 32769 of a 2048-aligned image.
    for at in memchr::memmem::find_iter(data, b"CD001") {
        if at >= 32769 && (base + at as u64 - 32769) % 2048 == 0 {
            candidates.push(Candidate {
                offset: base + at as u64 - 32769,
                signature: &catalog::SIG_ISO,
                ambiguous: false,
            });
        }
    }

    // Prefer unambiguous hits when two share an offset.
    candidates.sort_by_key(|c| (c.offset, c.ambiguous));
    candidates.dedup_by_key(|c| c.offset);
    candidates
}

/// The slice of orchestrator state a worker thread needs.
struct WorkerContext {
    catalog: Arc<SignatureCatalog>,
    carver: Arc<Carver>,
    thresholds: EntropyThresholds,
}

impl WorkerContext {
    fn run(
        &self,
        reader: &Reader,
        ranges: &[(u64, u64)],
        tx: &Sender<WorkerMsg>,
        cancel: &AtomicBool,
        abort: &AtomicBool,
    ) {
        let mut local_dedup = DedupTracker::new();
        let mut iter = RangeChunkIter::new(reader, ranges.to_vec(), ChunkOptions::default());
        let mut reported_empty = 0u64;

        while let Some((offset, data)) = iter.next() {
            if cancel.load(Ordering::Relaxed) || abort.load(Ordering::Relaxed) {
                break;
            }
            let mut entropy_skipped = 0u64;
            match classify_block(&data, self.thresholds) {
                BlockClass::Structured => {
                    self.scan_chunk(reader, &data, offset, &mut local_dedup, tx, cancel);
                }
                BlockClass::Empty | BlockClass::Random => {
                    entropy_skipped = data.len() as u64;
                }
            }
            let empty_total = iter.skipped_empty();
            let _ = tx.send(WorkerMsg::Progress {
                scanned: data.len() as u64,
                empty_skipped: empty_total - reported_empty,
                entropy_skipped,
            });
            reported_empty = empty_total;
        }
        let _ = tx.send(WorkerMsg::Done);
    }

    fn scan_chunk(
        &self,
        reader: &Reader,
        data: &[u8],
        base: u64,
        local_dedup: &mut DedupTracker,
        tx: &Sender<WorkerMsg>,
        cancel: &AtomicBool,
    ) {
        for candidate in chunk_search(&self.catalog, data, base) {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            if local_dedup.is_duplicate_offset(candidate.offset) {
                continue;
            }
            let Ok(outcome) = self.carver.carve(
                reader,
                candidate.offset,
                candidate.signature,
                candidate.ambiguous,
            ) else {
                continue;
            };
            if let Some(orphan) = outcome.orphan {
                let _ = tx.send(WorkerMsg::Orphan {
                    offset: orphan.offset,
                    head_len: orphan.head_len,
                    extension: orphan.signature.extension.to_string(),
                    category: orphan.signature.category.name().to_string(),
                });
            }
            let Some(carved) = outcome.file else {
                continue;
            };
            let fp = fingerprint(&carved.data);
            if !carved.is_valid() {
                // Damaged records still surface, offset unreserved.
                if local_dedup.is_duplicate(candidate.offset, Some(&fp)) {
                    continue;
                }
            } else if !local_dedup.register(candidate.offset, Some(&fp)) {
                continue;
            }
            let mut file =
                RecoveredFile::carved(carved.signature, carved.offset, carved.size(), reader.path());
            file.fingerprint = Some(fp);
            file.validation = carved.validation;
            file.damage = carved.damage;
            let _ = tx.send(WorkerMsg::Found(WireRecord::from_file(&file)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = ScanOptions::default();
        assert!(options.parallel);
        assert_eq!(options.parallel_threshold, 100 * 1024 * 1024);
        assert_eq!(options.adapter_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_scan_missing_device_is_fatal() {
        let orchestrator = Orchestrator::new(ScanOptions::default());
        assert!(orchestrator.scan("/no/such/source").is_err());
    }

    #[test]
    fn test_candidate_ordering_prefers_unambiguous() {
        let orchestrator = Orchestrator::new(ScanOptions::default());
        // "BM" (ambiguous) and a PDF magic at the same offset region.
        let mut data = vec![0x20u8; 1024];
        data[100..104].copy_from_slice(b"%PDF");
        let candidates = orchestrator.collect_candidates(&data, 0);
        assert!(candidates.iter().any(|c| c.signature.extension == "pdf"));
    }
}
