pub mod listener;
pub mod manager;
pub mod worker;

/// Common imports for consumers of the download engine.
pub mod prelude {
    pub use crate::listener::{DownloadListener, DownloadOutcome};
    pub use crate::manager::{file_extension, filename_component, DownloadManager};
    pub use crate::worker::{DownloadError, DownloadWorker};
}
