// src/manager.rs

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::{redirect, Client};

use crate::listener::{DownloadListener, DownloadOutcome};
use crate::worker::{DownloadError, DownloadWorker};

/// Seconds a worker may spend establishing a connection.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Seconds a single request may take end-to-end.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

type InFlightRegistry = Arc<Mutex<HashMap<u64, Arc<DownloadWorker>>>>;

/// The session-scoped coordinator for concurrent file downloads.
///
/// Owns the one connection-pooling HTTP client that all workers share;
/// building a client per transfer would pay pool and TLS warmup on every
/// download, which is the reason a manager exists at all. Also tracks the
/// live set of in-flight workers so callers can ask "is anything
/// downloading" and broadcast cancellation.
pub struct DownloadManager {
    client: Client,
    in_flight: InFlightRegistry,
    next_worker_id: AtomicU64,
}

impl DownloadManager {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(redirect::Policy::limited(10))
            .build()
            .unwrap();

        Self {
            client,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_worker_id: AtomicU64::new(1),
        }
    }

    /// Fire-and-forget: start a new worker for `url` on its own task and
    /// return immediately. Bad input never surfaces here; every failure
    /// arrives through the listener on the worker.
    ///
    /// `destination_dir` defaults to the system temp directory.
    pub fn download_file(
        &self,
        url: impl Into<String>,
        destination_dir: Option<PathBuf>,
        listener: Option<Arc<dyn DownloadListener>>,
    ) {
        let worker = self.create_worker(url, destination_dir, listener);
        tracing::debug!(id = worker.id(), url = %worker.url(), "spawning download worker");
        tokio::spawn(worker.run());
    }

    /// Build a worker wired with the manager's in-flight tracking listener
    /// first and the caller's listener after it. The worker is not yet
    /// started; pass it to `tokio::spawn(worker.run())` or await it.
    pub fn create_worker(
        &self,
        url: impl Into<String>,
        destination_dir: Option<PathBuf>,
        listener: Option<Arc<dyn DownloadListener>>,
    ) -> Arc<DownloadWorker> {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let destination_dir = destination_dir.unwrap_or_else(std::env::temp_dir);
        let worker = Arc::new(DownloadWorker::new(
            id,
            url.into(),
            destination_dir,
            self.client.clone(),
        ));

        worker.add_listener(Arc::new(InFlightTracker {
            registry: Arc::clone(&self.in_flight),
        }));
        if let Some(listener) = listener {
            worker.add_listener(listener);
        }
        worker
    }

    /// Whether any worker is currently between its begin and terminal
    /// events. Purely observational.
    pub fn is_download_in_progress(&self) -> bool {
        !self.registry().is_empty()
    }

    /// Number of workers currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.registry().len()
    }

    /// Broadcast cancellation to every in-flight worker.
    ///
    /// Cancellation is cooperative: each worker stops at its next chunk
    /// boundary and fires its own `failed` event, so termination is not
    /// immediate. Safe to call while downloads are starting or finishing
    /// concurrently; the broadcast iterates a snapshot, not the live set.
    pub fn stop_all_downloads(&self) {
        let snapshot: Vec<Arc<DownloadWorker>> = self.registry().values().cloned().collect();
        tracing::info!(count = snapshot.len(), "stopping all downloads");
        for worker in snapshot {
            worker.kill();
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<u64, Arc<DownloadWorker>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Installed ahead of the caller's listener on every worker: keeps the
/// manager's in-flight registry in step with worker lifecycle events.
struct InFlightTracker {
    registry: InFlightRegistry,
}

impl InFlightTracker {
    fn registry(&self) -> MutexGuard<'_, HashMap<u64, Arc<DownloadWorker>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DownloadListener for InFlightTracker {
    fn on_begin(&self, worker: &Arc<DownloadWorker>, _url: &str) {
        self.registry().insert(worker.id(), Arc::clone(worker));
    }

    fn on_failed(&self, worker: &Arc<DownloadWorker>, _url: &str, _error: &DownloadError) {
        self.registry().remove(&worker.id());
    }

    fn on_complete(&self, worker: &Arc<DownloadWorker>, _url: &str, _outcome: &DownloadOutcome) {
        self.registry().remove(&worker.id());
    }
}

/// Returns the extension of `path` from the last `.` onward, or `""` when
/// no dot is present. Pure string function, no filesystem access.
pub fn file_extension(path: &str) -> &str {
    match path.rfind('.') {
        Some(idx) => &path[idx..],
        None => "",
    }
}

/// Returns everything after the last `/` in `path`, or `""` when there is
/// no `/` or the path ends with one. Pure string function, no filesystem
/// access.
pub fn filename_component(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_last_dot_onward() {
        assert_eq!(file_extension("hello.txt"), ".txt");
        assert_eq!(file_extension("hello.txt.jpg"), ".jpg");
        assert_eq!(file_extension("hello"), "");
        assert_eq!(file_extension(""), "");
    }

    #[test]
    fn filename_is_after_last_slash() {
        assert_eq!(filename_component("/path/to/file.txt"), "file.txt");
        assert_eq!(filename_component("noslash"), "");
        assert_eq!(filename_component("/trailing/"), "");
        assert_eq!(filename_component(""), "");
    }

    #[test]
    fn fresh_manager_has_nothing_in_flight() {
        let manager = DownloadManager::new();
        assert!(!manager.is_download_in_progress());
        assert_eq!(manager.in_flight_count(), 0);
    }
}
