//! Boundary to the external deleted-entry adapter (a Sleuth-Kit-like
//! filesystem walker). The core only consumes its results; the walk
//! runs on a background thread under a hard wall-clock timeout, and
//! partial results are retained when the deadline fires.

use parking_lot::Mutex;
use salvor_core::FileCategory;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

/// Default hard timeout for the adapter walk.
pub const ADAPTER_TIMEOUT: Duration = Duration::from_secs(60);

/// One deleted directory entry reported by the adapter.
#[derive(Debug, Clone)]
pub struct DeletedEntry {
    pub name: String,
    pub path: String,
    pub extension: String,
    pub category: FileCategory,
    pub size: u64,
    pub inode: u64,
    pub byte_offset: u64,
    pub deleted_time: Option<i64>,
}

/// External filesystem-walk service. Implementations must poll
/// `cancel` at every directory entry.
pub trait DeletedEntryAdapter: Send + Sync {
    fn enumerate(
        &self,
        categories: &[FileCategory],
        on_found: &mut dyn FnMut(DeletedEntry),
        cancel: &AtomicBool,
    ) -> anyhow::Result<()>;

    /// Fragmented-file-aware read of a deleted file's content.
    fn read_random(&self, inode: u64, offset: u64, length: usize) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Default)]
pub struct AdapterOutcome {
    pub entries: Vec<DeletedEntry>,
    pub timed_out: bool,
    pub error: Option<String>,
}

/// Runs the adapter walk with a hard timeout; entries found before the
/// deadline survive it.
pub fn run_with_timeout(
    adapter: Arc<dyn DeletedEntryAdapter>,
    categories: Vec<FileCategory>,
    cancel: Arc<AtomicBool>,
    timeout: Duration,
) -> AdapterOutcome {
    let collected = Arc::new(Mutex::new(Vec::new()));
    // Separate stop flag: a timeout must halt the walk without
    // cancelling the scan itself.
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = mpsc::channel::<anyhow::Result<()>>();

    let thread_collected = Arc::clone(&collected);
    let thread_stop = Arc::clone(&stop);
    let spawn = std::thread::Builder::new()
        .name("salvor-fs-adapter".into())
        .spawn(move || {
            let mut on_found = |entry: DeletedEntry| {
                thread_collected.lock().push(entry);
            };
            let result = adapter.enumerate(&categories, &mut on_found, &thread_stop);
            let _ = done_tx.send(result);
        });

    if spawn.is_err() {
        return AdapterOutcome {
            entries: Vec::new(),
            timed_out: false,
            error: Some("could not start adapter thread".to_string()),
        };
    }

    // Wait in slices so a user cancel propagates to the walk promptly;
    // the walk itself only ever sees the single `stop` flag.
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if cancel.load(Ordering::Relaxed) {
            stop.store(true, Ordering::Relaxed);
        }
        let slice = deadline
            .saturating_duration_since(std::time::Instant::now())
            .min(Duration::from_millis(50));
        match done_rx.recv_timeout(slice) {
            Ok(Ok(())) => {
                return AdapterOutcome {
                    entries: std::mem::take(&mut *collected.lock()),
                    timed_out: false,
                    error: None,
                };
            }
            Ok(Err(e)) => {
                return AdapterOutcome {
                    entries: std::mem::take(&mut *collected.lock()),
                    timed_out: false,
                    error: Some(e.to_string()),
                };
            }
            Err(_) if std::time::Instant::now() >= deadline => {
                // Deadline: tell the walk to stop, keep what arrived,
                // and let raw carving proceed. The thread is left to
                // wind down on its own.
                stop.store(true, Ordering::Relaxed);
                tracing::warn!("filesystem adapter timed out, keeping partial results");
                return AdapterOutcome {
                    entries: collected.lock().clone(),
                    timed_out: true,
                    error: None,
                };
            }
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FastAdapter;
    impl DeletedEntryAdapter for FastAdapter {
        fn enumerate(
            &self,
            _categories: &[FileCategory],
            on_found: &mut dyn FnMut(DeletedEntry),
            _cancel: &AtomicBool,
        ) -> anyhow::Result<()> {
            for i in 0u64..3 {
                on_found(DeletedEntry {
                    name: format!("photo_{i}.jpg"),
                    path: format!("/DCIM/photo_{i}.jpg"),
                    extension: "jpg".to_string(),
                    category: FileCategory::Image,
                    size: 10_000,
                    inode: 100 + i,
                    byte_offset: 1_000_000 * (i + 1),
                    deleted_time: None,
                });
            }
            Ok(())
        }

        fn read_random(&self, _inode: u64, _offset: u64, length: usize) -> anyhow::Result<Vec<u8>> {
            Ok(vec![0u8; length])
        }
    }

    struct SlowAdapter;
    impl DeletedEntryAdapter for SlowAdapter {
        fn enumerate(
            &self,
            _categories: &[FileCategory],
            on_found: &mut dyn FnMut(DeletedEntry),
            cancel: &AtomicBool,
        ) -> anyhow::Result<()> {
            on_found(DeletedEntry {
                name: "early.png".to_string(),
                path: "/early.png".to_string(),
                extension: "png".to_string(),
                category: FileCategory::Image,
                size: 500,
                inode: 7,
                byte_offset: 4096,
                deleted_time: Some(1_700_000_000),
            });
            while !cancel.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }

        fn read_random(&self, _inode: u64, _offset: u64, _length: usize) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("unreadable")
        }
    }

    #[test]
    fn test_fast_adapter_completes() {
        let outcome = run_with_timeout(
            Arc::new(FastAdapter),
            vec![],
            Arc::new(AtomicBool::new(false)),
            Duration::from_secs(5),
        );
        assert!(!outcome.timed_out);
        assert_eq!(outcome.entries.len(), 3);
    }

    #[test]
    fn test_timeout_retains_partial_results() {
        let outcome = run_with_timeout(
            Arc::new(SlowAdapter),
            vec![FileCategory::Image],
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(100),
        );
        assert!(outcome.timed_out);
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].name, "early.png");
    }
}
