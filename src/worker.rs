use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::listener::{DownloadListener, DownloadOutcome};
use crate::manager::{filename_component, REQUEST_TIMEOUT_SECS};

/// Minimum spacing between two progress events for the same worker.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Failure kinds surfaced through [`DownloadListener::on_failed`].
///
/// No variant ever crosses the worker boundary as an error return; each
/// becomes exactly one `on_failed` callback.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid download request: {0}")]
    InvalidConfiguration(String),
    #[error("malformed url: {0}")]
    MalformedUrl(#[from] url::ParseError),
    #[error("not found: {0}")]
    NotFound(Url),
    #[error("client error: {0}")]
    ClientError(StatusCode),
    #[error("server error: {0}")]
    ServerError(StatusCode),
    #[error("unexpected status: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("request timed out: {0}")]
    Timeout(Url),
    #[error("connection failed: {0}")]
    ConnectionFailure(String),
    #[error("permission denied: {0}")]
    PermissionDenied(io::Error),
    #[error("interrupted: {0}")]
    Interrupted(io::Error),
    #[error("io error: {0}")]
    Io(io::Error),
    #[error("killed by requestor")]
    Killed,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// A single-use unit of work that executes one download end-to-end.
///
/// Workers are built by [`crate::manager::DownloadManager`], which hands
/// every one the same pooled HTTP client. A worker validates its input,
/// dispatches on the URL scheme, streams bytes into the destination
/// directory, and reports everything it does through its listener list.
/// It is discarded once a terminal event has fired.
pub struct DownloadWorker {
    id: u64,
    url: String,
    destination_dir: PathBuf,
    client: Client,
    listeners: Mutex<Vec<Arc<dyn DownloadListener>>>,
    running: AtomicBool,
    killed: AtomicBool,
}

impl DownloadWorker {
    pub(crate) fn new(id: u64, url: String, destination_dir: PathBuf, client: Client) -> Self {
        Self {
            id,
            url,
            destination_dir,
            client,
            listeners: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            killed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    /// Whether this worker is between dispatch and its terminal event.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Request cooperative cancellation. Idempotent; safe before, during,
    /// or after the transfer (after completion it is a no-op). The flag is
    /// polled once per written chunk, so a worker blocked on a slow read
    /// notices at the next chunk boundary, not instantly.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn add_listener(&self, listener: Arc<dyn DownloadListener>) {
        self.lock_listeners().push(listener);
    }

    /// Remove a previously added listener, matched by `Arc` identity.
    pub fn remove_listener(&self, listener: &Arc<dyn DownloadListener>) {
        self.lock_listeners()
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// Execute the transfer. Fires `begin`, then zero or more `progress`
    /// events, then exactly one of `failed` or `complete`; errors never
    /// escape this call.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        tracing::debug!(id = self.id, url = %self.url, "download worker starting");
        Self::emit_begin(&self);

        match Self::transfer(&self).await {
            Ok(outcome) => {
                tracing::debug!(id = self.id, url = %self.url, "download complete");
                Self::emit_complete(&self, &outcome);
            }
            Err(error) => {
                tracing::warn!(id = self.id, url = %self.url, %error, "download failed");
                Self::emit_failed(&self, &error);
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    async fn transfer(this: &Arc<Self>) -> Result<DownloadOutcome, DownloadError> {
        if this.url.trim().is_empty() {
            return Err(DownloadError::InvalidConfiguration(
                "no url supplied".to_string(),
            ));
        }
        let url = Url::parse(&this.url)?;

        // A kill issued before the transfer started still wins.
        if this.is_killed() {
            return Err(DownloadError::Killed);
        }

        match url.scheme() {
            "file" => this.copy_local(&url).await,
            "http" | "https" => Self::fetch_remote(this, &url).await,
            other => Err(DownloadError::InvalidConfiguration(format!(
                "unsupported url scheme: {other}"
            ))),
        }
    }

    /// Byte-for-byte copy of a local source into the destination
    /// directory, overwriting any existing file. Treated as atomic: no
    /// progress events.
    async fn copy_local(&self, url: &Url) -> Result<DownloadOutcome, DownloadError> {
        let source = url.to_file_path().map_err(|()| {
            DownloadError::InvalidConfiguration(format!("file url has no local path: {url}"))
        })?;
        let name = source.file_name().map(ToOwned::to_owned).ok_or_else(|| {
            DownloadError::InvalidConfiguration(format!("file url names no file: {url}"))
        })?;

        tokio::fs::create_dir_all(&self.destination_dir)
            .await
            .map_err(classify_io)?;
        let destination = self.destination_dir.join(name);
        tokio::fs::copy(&source, &destination)
            .await
            .map_err(classify_io)?;

        Ok(DownloadOutcome::File(destination))
    }

    async fn fetch_remote(this: &Arc<Self>, url: &Url) -> Result<DownloadOutcome, DownloadError> {
        let name = filename_component(url.path());
        if name.is_empty() {
            return Err(DownloadError::InvalidConfiguration(format!(
                "url path names no file: {url}"
            )));
        }
        let name = name.to_string();

        let response = this
            .client
            .get(url.clone())
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| classify_reqwest(e, url))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(DownloadError::NotFound(url.clone())),
            status if status.is_client_error() => return Err(DownloadError::ClientError(status)),
            status if status.is_server_error() => return Err(DownloadError::ServerError(status)),
            status => return Err(DownloadError::UnexpectedStatus(status)),
        }

        let total_bytes = response.content_length();

        tokio::fs::create_dir_all(&this.destination_dir)
            .await
            .map_err(classify_io)?;
        let destination = this.destination_dir.join(&name);
        let mut file = tokio::fs::File::create(&destination)
            .await
            .map_err(classify_io)?;

        let mut downloaded: u64 = 0;
        let mut last_progress = Instant::now();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| classify_reqwest(e, url))?;
            file.write_all(&bytes).await.map_err(classify_io)?;
            downloaded += bytes.len() as u64;

            // Partially written bytes stay on disk when killed.
            if this.is_killed() {
                return Err(DownloadError::Killed);
            }
            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                Self::emit_progress(this, downloaded, total_bytes);
                last_progress = Instant::now();
            }
        }
        file.flush().await.map_err(classify_io)?;

        Ok(DownloadOutcome::File(destination))
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn DownloadListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Callbacks run on a snapshot so a listener may add or remove
    // listeners without deadlocking the list.
    fn snapshot_listeners(&self) -> Vec<Arc<dyn DownloadListener>> {
        self.lock_listeners().clone()
    }

    fn emit_begin(this: &Arc<Self>) {
        for listener in this.snapshot_listeners() {
            listener.on_begin(this, &this.url);
        }
    }

    fn emit_progress(this: &Arc<Self>, bytes_downloaded: u64, total_bytes: Option<u64>) {
        for listener in this.snapshot_listeners() {
            listener.on_progress(this, &this.url, bytes_downloaded, total_bytes);
        }
    }

    fn emit_failed(this: &Arc<Self>, error: &DownloadError) {
        for listener in this.snapshot_listeners() {
            listener.on_failed(this, &this.url, error);
        }
    }

    fn emit_complete(this: &Arc<Self>, outcome: &DownloadOutcome) {
        for listener in this.snapshot_listeners() {
            listener.on_complete(this, &this.url, outcome);
        }
    }
}

impl fmt::Debug for DownloadWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadWorker")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("destination_dir", &self.destination_dir)
            .field("running", &self.is_running())
            .field("killed", &self.is_killed())
            .finish_non_exhaustive()
    }
}

fn classify_io(error: io::Error) -> DownloadError {
    match error.kind() {
        io::ErrorKind::PermissionDenied => DownloadError::PermissionDenied(error),
        io::ErrorKind::Interrupted => DownloadError::Interrupted(error),
        _ => DownloadError::Io(error),
    }
}

fn classify_reqwest(error: reqwest::Error, url: &Url) -> DownloadError {
    if error.is_timeout() {
        DownloadError::Timeout(url.clone())
    } else if error.is_connect() {
        DownloadError::ConnectionFailure(error.to_string())
    } else {
        // Catch-all keeps the source error's own rendering for diagnostics.
        DownloadError::Unexpected(error.to_string())
    }
}
