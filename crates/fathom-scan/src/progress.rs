//! Scan progress counters and the periodic publisher task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the publisher snapshots the counters.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

/// A point-in-time snapshot of scan progress.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Files seen so far.
    pub files_scanned: u64,
    /// Directories opened so far.
    pub dirs_scanned: u64,
    /// Apparent bytes found so far (hardlink aliases excluded).
    pub bytes_found: u64,
    /// Per-entry errors recovered so far.
    pub errors: u64,
    /// Set on the final snapshot emitted after aggregation.
    pub done: bool,
    /// When the scan began.
    pub start_time: Instant,
    /// Elapsed time at snapshot.
    pub duration: Duration,
}

impl Progress {
    /// Scan rate over files and directories combined.
    pub fn items_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.files_scanned + self.dirs_scanned) as f64 / secs
    }
}

/// Lock-free counters shared by all walker tasks.
#[derive(Debug)]
pub struct ProgressCounters {
    files: AtomicU64,
    dirs: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
    start: Instant,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self {
            files: AtomicU64::new(0),
            dirs: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn add_file(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_dir(&self) {
        self.dirs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, done: bool) -> Progress {
        Progress {
            files_scanned: self.files.load(Ordering::Relaxed),
            dirs_scanned: self.dirs.load(Ordering::Relaxed),
            bytes_found: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            done,
            start_time: self.start,
            duration: self.start.elapsed(),
        }
    }
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the publisher task: every 50 ms it snapshots the counters and
/// attempts a non-blocking send, dropping the update on back-pressure.
/// The task exits when `stop` fires; the coordinator emits the final "done"
/// snapshot itself, after aggregation.
pub fn spawn_publisher(
    counters: Arc<ProgressCounters>,
    tx: mpsc::Sender<Progress>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = tx.try_send(counters.snapshot(false));
                }
                _ = stop.cancelled() => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = ProgressCounters::new();
        counters.add_file();
        counters.add_file();
        counters.add_dir();
        counters.add_bytes(100);
        counters.add_error();

        let snap = counters.snapshot(false);
        assert_eq!(snap.files_scanned, 2);
        assert_eq!(snap.dirs_scanned, 1);
        assert_eq!(snap.bytes_found, 100);
        assert_eq!(snap.errors, 1);
        assert!(!snap.done);
    }

    #[test]
    fn test_items_per_second_zero_duration() {
        let progress = Progress {
            files_scanned: 10,
            dirs_scanned: 5,
            bytes_found: 0,
            errors: 0,
            done: false,
            start_time: Instant::now(),
            duration: Duration::ZERO,
        };
        assert_eq!(progress.items_per_second(), 0.0);
    }

    #[tokio::test]
    async fn test_publisher_stops_on_cancel() {
        let counters = Arc::new(ProgressCounters::new());
        let (tx, mut rx) = mpsc::channel(4);
        let stop = CancellationToken::new();

        let handle = spawn_publisher(Arc::clone(&counters), tx, stop.clone());
        // First tick fires immediately.
        let first = rx.recv().await.expect("publisher sent a snapshot");
        assert!(!first.done);

        stop.cancel();
        handle.await.expect("publisher task completed");
    }
}
