//! End-to-end scan and save scenarios over synthetic disk images.

mod common;

use common::{build_isobmff, build_isobmff_with, build_jpeg, build_png, filler};
use salvor_core::{DamageLevel, RepairAction, ValidationState, fingerprint};
use salvor_engine::{
    Checkpoint, DeletedEntry, DeletedEntryAdapter, Orchestrator, SaveSummary, Saver,
    ScanCallbacks, ScanMode, ScanOptions, ScanSession,
};
use salvor_io::Reader;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::{NamedTempFile, TempDir};

fn write_image(data: &[u8]) -> NamedTempFile {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut temp = NamedTempFile::new().unwrap();
    temp.write_all(data).unwrap();
    temp.flush().unwrap();
    temp
}

fn save_session(session: &mut ScanSession, device: &Path, output: &Path) -> SaveSummary {
    let orchestrator = Orchestrator::new(ScanOptions::default());
    let carver = orchestrator.carver();
    let reader = Reader::open(device).unwrap();
    Saver::new(carver.as_ref()).save_all(session, &reader, output, None)
}

/// Five distinct files separated by zero gaps, with high-entropy slack
/// after the last one. Every file must come back byte-exact.
#[test]
fn test_five_file_image_recovers_all() {
    let jpeg = build_jpeg(20_034);
    let png = build_png(15_100);
    let mp4 = build_isobmff(b"isom", 25_008, 108);
    let heic = build_isobmff_with(b"heic", 18_008, b"meta", 88);
    let mov = build_isobmff(b"qt  ", 12_008, 108);

    let mut image = Vec::new();
    image.extend(vec![0u8; 4096]);
    let jpeg_offset = image.len() as u64;
    image.extend_from_slice(&jpeg);
    image.extend(vec![0u8; 25_600]);
    image.extend_from_slice(&png);
    image.extend(vec![0u8; 15_360]);
    image.extend_from_slice(&mp4);
    image.extend(vec![0u8; 10_240]);
    image.extend_from_slice(&heic);
    image.extend(vec![0u8; 2048]);
    image.extend_from_slice(&mov);
    let pad = 10 * 1024 * 1024 - image.len();
    image.extend(filler(pad));
    let temp = write_image(&image);

    let found = Arc::new(AtomicUsize::new(0));
    let found_cb = Arc::clone(&found);
    let orchestrator = Orchestrator::new(ScanOptions::default()).with_callbacks(
        ScanCallbacks::new().on_file_found(move |_| {
            found_cb.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let mut session = orchestrator.scan(temp.path().to_str().unwrap()).unwrap();

    assert_eq!(session.mode, ScanMode::BruteForce);
    assert!(session.counters.used_mmap);
    assert_eq!(session.files_found(), 5, "log: {:?}", session.recovery_log);
    assert_eq!(found.load(Ordering::SeqCst), 5);
    assert!(!session.cancelled);

    let extensions: HashSet<&str> = session.files.iter().map(|f| f.extension()).collect();
    assert_eq!(
        extensions,
        HashSet::from(["jpg", "png", "mp4", "heic", "mov"])
    );
    assert!(session.files.iter().all(|f| f.validation.is_workable()));
    assert_eq!(
        session.files.iter().find(|f| f.extension() == "jpg").unwrap().offset,
        jpeg_offset
    );

    // Every offset+size stays within the device.
    let device_size = image.len() as u64;
    for file in &session.files {
        assert!(file.offset + file.size <= device_size);
        assert!(file.size >= file.signature.min_size);
        assert!(file.size <= file.signature.max_size);
    }

    // Save and verify the bytes round-trip exactly.
    let out = TempDir::new().unwrap();
    let summary = save_session(&mut session, temp.path(), out.path());
    assert_eq!(summary.saved, 5, "errors: {:?}", summary.errors);
    assert_eq!(summary.failed, 0);

    for (ext, expected) in [
        ("jpg", &jpeg),
        ("png", &png),
        ("mp4", &mp4),
        ("heic", &heic),
        ("mov", &mov),
    ] {
        let file = session.files.iter().find(|f| f.extension() == ext).unwrap();
        let path = file.saved_path.as_ref().expect("saved path recorded");
        let on_disk = std::fs::read(path).unwrap();
        assert_eq!(&on_disk, expected, "{ext} bytes differ after save");
        assert_eq!(file.fingerprint.as_deref(), Some(fingerprint(expected).as_str()));
        let integrity = file.integrity.as_ref().unwrap();
        assert_eq!(integrity.fingerprint_match, Some(true));
        assert!(integrity.size_ok);
    }

    // Output landed under the category directories.
    assert!(out.path().join("Image").is_dir());
    assert!(out.path().join("Video").is_dir());
}

/// A BMP header declaring 0xFFFFFFFF bytes: the validator refuses it
/// and, because `BM` is an ambiguous magic, nothing is emitted.
#[test]
fn test_bogus_bmp_yields_nothing() {
    let mut image = vec![0u8; 512];
    image.push(b'B');
    image.push(b'M');
    image.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    image.extend(vec![0u8; 48]);
    image.extend(filler(1024 * 1024 - image.len()));
    let temp = write_image(&image);

    let orchestrator = Orchestrator::new(ScanOptions::default());
    let session = orchestrator.scan(temp.path().to_str().unwrap()).unwrap();
    assert_eq!(session.files_found(), 0);
}

/// A JPEG with its trailing EOI missing is emitted as a damaged,
/// repairable record; the save path repairs it back to health.
#[test]
fn test_truncated_jpeg_repaired_on_save() {
    let full = build_jpeg(20_000);
    let truncated = &full[..full.len() - 2];
    let temp = write_image(truncated);

    let orchestrator = Orchestrator::new(ScanOptions::default());
    let mut session = orchestrator.scan(temp.path().to_str().unwrap()).unwrap();

    assert_eq!(session.files_found(), 1);
    let file = &session.files[0];
    assert_eq!(file.extension(), "jpg");
    assert!(matches!(file.validation, ValidationState::Nonworkable(_)));
    let report = file.damage.as_ref().expect("damage report attached");
    assert!(report.footer_missing);
    assert!(report.repairable);
    assert!(report.repair_plan.contains(&RepairAction::AppendJpegEoi));
    assert!(report.level >= DamageLevel::Minor);

    let out = TempDir::new().unwrap();
    let summary = save_session(&mut session, temp.path(), out.path());
    assert_eq!(summary.saved, 1, "errors: {:?}", summary.errors);

    let file = &session.files[0];
    let repair = file.repair.as_ref().expect("repair attempted");
    assert!(repair.success);
    assert!(repair.applied.contains(&RepairAction::AppendJpegEoi));
    assert_eq!(
        repair.after.as_ref().unwrap().level,
        DamageLevel::Healthy
    );

    // Appending the EOI reconstructs the original builder output.
    let on_disk = std::fs::read(file.saved_path.as_ref().unwrap()).unwrap();
    assert_eq!(on_disk, full);
    let integrity = file.integrity.as_ref().unwrap();
    assert!(integrity.is_valid);
    assert_eq!(integrity.fingerprint_match, Some(true));
}

struct MockAdapter {
    jpeg: Vec<u8>,
    offset: u64,
}

impl DeletedEntryAdapter for MockAdapter {
    fn enumerate(
        &self,
        _categories: &[salvor_core::FileCategory],
        on_found: &mut dyn FnMut(DeletedEntry),
        _cancel: &AtomicBool,
    ) -> anyhow::Result<()> {
        on_found(DeletedEntry {
            name: "holiday.jpg".to_string(),
            path: "/DCIM/holiday.jpg".to_string(),
            extension: "jpg".to_string(),
            category: salvor_core::FileCategory::Image,
            size: self.jpeg.len() as u64,
            inode: 42,
            byte_offset: self.offset,
            deleted_time: Some(1_700_000_000),
        });
        Ok(())
    }

    fn read_random(&self, inode: u64, offset: u64, length: usize) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(inode == 42, "unknown inode");
        let start = offset as usize;
        let end = (start + length).min(self.jpeg.len());
        Ok(self.jpeg[start..end].to_vec())
    }
}

/// Adapter results win over a raw carve of the same offset: one record
/// with filesystem provenance, original metadata attached, saved
/// through the adapter's reader.
#[test]
fn test_adapter_entry_dedups_raw_carve() {
    let jpeg = build_jpeg(20_000);
    let offset = 102_400u64;
    let mut image = filler(1024 * 1024);
    image[offset as usize..offset as usize + jpeg.len()].copy_from_slice(&jpeg);
    let temp = write_image(&image);

    let adapter = Arc::new(MockAdapter {
        jpeg: jpeg.clone(),
        offset,
    });
    let orchestrator =
        Orchestrator::new(ScanOptions::default()).with_adapter(adapter.clone());
    let mut session = orchestrator.scan(temp.path().to_str().unwrap()).unwrap();

    assert_eq!(session.files_found(), 1);
    let file = &session.files[0];
    assert_eq!(file.provenance, salvor_core::Provenance::Filesystem);
    let origin = file.origin.as_ref().expect("origin metadata");
    assert_eq!(origin.name, "holiday.jpg");
    assert_eq!(origin.inode, 42);

    let out = TempDir::new().unwrap();
    let carver = orchestrator.carver();
    let reader = Reader::open(temp.path()).unwrap();
    let summary = Saver::new(carver.as_ref())
        .with_adapter(adapter.as_ref())
        .save_all(&mut session, &reader, out.path(), None);
    assert_eq!(summary.saved, 1, "errors: {:?}", summary.errors);
    let on_disk = std::fs::read(session.files[0].saved_path.as_ref().unwrap()).unwrap();
    assert_eq!(on_disk, jpeg);
}

/// Resume clips the scan domain below the checkpointed offset.
#[test]
fn test_resume_skips_scanned_region() {
    let jpeg1 = build_jpeg(20_034);
    let jpeg2 = build_jpeg(16_384);
    let mut image = filler(1024 * 1024);
    image[8192..8192 + jpeg1.len()].copy_from_slice(&jpeg1);
    image[200_704..200_704 + jpeg2.len()].copy_from_slice(&jpeg2);
    let temp = write_image(&image);
    let device = temp.path().to_str().unwrap().to_string();

    let checkpoint_dir = TempDir::new().unwrap();
    let mut cp = Checkpoint::new(&device, "brute-force");
    cp.last_offset = 65_536;
    cp.save(checkpoint_dir.path()).unwrap();

    let options = ScanOptions {
        checkpoint_dir: Some(checkpoint_dir.path().to_path_buf()),
        resume: true,
        ..Default::default()
    };
    let session = Orchestrator::new(options).scan(&device).unwrap();

    assert_eq!(session.files_found(), 1);
    assert_eq!(session.files[0].offset, 200_704);
    // Successful completion clears the checkpoint.
    assert!(Checkpoint::load(checkpoint_dir.path(), &device).is_none());
}

#[test]
fn test_cancellation_before_scan() {
    let image = filler(512 * 1024);
    let temp = write_image(&image);

    let orchestrator = Orchestrator::new(ScanOptions::default());
    orchestrator.cancel_flag().store(true, Ordering::SeqCst);
    let session = orchestrator.scan(temp.path().to_str().unwrap()).unwrap();
    assert!(session.cancelled);
    assert_eq!(session.files_found(), 0);
    assert!(session.finished_at.is_some());
}

/// Worker split over a domain bigger than the (lowered) threshold
/// still finds every file exactly once.
#[test]
fn test_parallel_scan_merges_workers() {
    let jpeg = build_jpeg(20_034);
    let offsets = [1_048_576u64, 5_242_880, 9_437_184];
    let mut image = filler(12 * 1024 * 1024);
    for &offset in &offsets {
        image[offset as usize..offset as usize + jpeg.len()].copy_from_slice(&jpeg);
    }
    let temp = write_image(&image);

    let options = ScanOptions {
        parallel_threshold: 1024 * 1024,
        worker_range_bytes: 2 * 1024 * 1024,
        ..Default::default()
    };
    let session = Orchestrator::new(options).scan(temp.path().to_str().unwrap()).unwrap();

    // Same content at three offsets: offset dedup admits all three,
    // fingerprint dedup admits only the first identical body.
    assert_eq!(session.files_found(), 1, "log: {:?}", session.recovery_log);
    assert!(offsets.contains(&session.files[0].offset));
    // The worker's verdict survives the merge.
    assert!(session.files[0].validation.is_workable());
    assert!(session.files[0].damage.is_none());
    assert!(session.counters.bytes_scanned > 0);
}

/// Distinct files at distant offsets all survive a parallel merge.
#[test]
fn test_parallel_scan_distinct_files() {
    let jpeg = build_jpeg(20_034);
    let png = build_png(15_100);
    let mp4 = build_isobmff(b"isom", 25_008, 108);
    let mut image = filler(12 * 1024 * 1024);
    image[1_048_576..1_048_576 + jpeg.len()].copy_from_slice(&jpeg);
    image[5_242_880..5_242_880 + png.len()].copy_from_slice(&png);
    image[9_437_184..9_437_184 + mp4.len()].copy_from_slice(&mp4);
    let temp = write_image(&image);

    let options = ScanOptions {
        parallel_threshold: 1024 * 1024,
        worker_range_bytes: 2 * 1024 * 1024,
        ..Default::default()
    };
    let session = Orchestrator::new(options).scan(temp.path().to_str().unwrap()).unwrap();

    let extensions: HashSet<&str> = session.files.iter().map(|f| f.extension()).collect();
    assert_eq!(extensions, HashSet::from(["jpg", "png", "mp4"]));
    assert_eq!(session.files_found(), 3);
    assert_eq!(session.valid_files(), 3);
    assert!(session.files.iter().all(|f| f.validation.is_workable()));
    assert!(session.files.iter().all(|f| f.damage.is_none()));
}

/// A damaged discovery made by a worker crosses the merge boundary
/// with its verdict and damage report intact.
#[test]
fn test_parallel_damaged_record_retains_report() {
    let full = build_jpeg(20_000);
    let truncated = &full[..full.len() - 2];
    let offset = 3 * 1024 * 1024;
    let mut image = filler(12 * 1024 * 1024);
    image[offset..offset + truncated.len()].copy_from_slice(truncated);
    // Zeroed tail after the broken JPEG, so the carve trims there.
    image[offset + truncated.len()..offset + truncated.len() + 128 * 1024].fill(0);
    let temp = write_image(&image);

    let options = ScanOptions {
        parallel_threshold: 1024 * 1024,
        worker_range_bytes: 2 * 1024 * 1024,
        ..Default::default()
    };
    let session = Orchestrator::new(options).scan(temp.path().to_str().unwrap()).unwrap();

    assert_eq!(session.files_found(), 1, "log: {:?}", session.recovery_log);
    let file = &session.files[0];
    assert_eq!(file.offset, offset as u64);
    assert!(matches!(file.validation, ValidationState::Nonworkable(_)));
    let report = file.damage.as_ref().expect("damage report crosses the merge");
    assert!(report.footer_missing);
    assert!(report.repairable);
    assert_eq!(session.valid_files(), 0);
}

/// A magic pattern straddling the 4 MiB chunk boundary is seen whole
/// in the overlap region and recovered exactly once.
#[test]
fn test_header_straddling_chunk_boundary_found_once() {
    let jpeg = build_jpeg(20_034);
    // The three magic bytes split across the first chunk's edge.
    let offset = 4 * 1024 * 1024 - 1;
    let mut image = filler(8 * 1024 * 1024);
    image[offset..offset + jpeg.len()].copy_from_slice(&jpeg);
    let temp = write_image(&image);

    let session = Orchestrator::new(ScanOptions::default())
        .scan(temp.path().to_str().unwrap())
        .unwrap();
    assert_eq!(session.files_found(), 1, "log: {:?}", session.recovery_log);
    assert_eq!(session.files[0].offset, offset as u64);
    assert_eq!(
        session.files[0].fingerprint.as_deref(),
        Some(fingerprint(&jpeg).as_str())
    );
}

/// A source smaller than any minimum file size scans cleanly to an
/// empty result.
#[test]
fn test_tiny_source_empty_result() {
    let temp = write_image(&filler(2048));
    let session = Orchestrator::new(ScanOptions::default())
        .scan(temp.path().to_str().unwrap())
        .unwrap();
    assert_eq!(session.files_found(), 0);
    assert!(!session.cancelled);
}
