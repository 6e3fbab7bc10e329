// src/listener.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::worker::{DownloadError, DownloadWorker};

/// What a finished transfer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The transfer wrote a file at this path.
    File(PathBuf),
    /// The transfer produced its payload as decoded text.
    Text(String),
}

impl DownloadOutcome {
    /// The destination path, when the outcome is a file on disk.
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Text(_) => None,
        }
    }
}

/// Observer of a download worker's lifecycle.
///
/// Every method has a no-op default, so implementors override only the
/// events they care about.
///
/// All callbacks run synchronously on the worker's own task, never on the
/// caller's. A consumer driving single-threaded state (a UI event loop,
/// say) must re-dispatch to its own execution context; the engine makes no
/// such guarantee itself.
pub trait DownloadListener: Send + Sync {
    /// Fired exactly once per worker, before any transfer work and before
    /// every other event for that worker.
    fn on_begin(&self, _worker: &Arc<DownloadWorker>, _url: &str) {}

    /// Fired during HTTP(S) transfers with the running byte count and the
    /// response's declared total, when one was present. Local `file:`
    /// copies never report progress.
    fn on_progress(
        &self,
        _worker: &Arc<DownloadWorker>,
        _url: &str,
        _bytes_downloaded: u64,
        _total_bytes: Option<u64>,
    ) {
    }

    /// Terminal: the transfer failed. The error's `Display` form is a
    /// non-empty human-readable diagnostic.
    fn on_failed(&self, _worker: &Arc<DownloadWorker>, _url: &str, _error: &DownloadError) {}

    /// Terminal: the transfer succeeded.
    fn on_complete(&self, _worker: &Arc<DownloadWorker>, _url: &str, _outcome: &DownloadOutcome) {}
}
