//! Error types shared by the download pipeline.

use std::path::PathBuf;
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of a single HTTP transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer of {url} did not finish within {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("Refusing to write outside the target directory: {path}")]
    InvalidDestination { path: String },
}

/// Failure of a version-control or object-storage publish step.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Remote rejected {reference}: {message}")]
    Rejected { reference: String, message: String },

    #[error("Object storage error: {message}")]
    Storage { message: String },

    #[error("Object storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} did not finish within {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("Background task failed: {0}")]
    Join(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to fetch manifest {url}: {source}")]
    ManifestFetch {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Version {id} does not exist in index")]
    UnknownVersion { id: String },

    #[error("Version id {id:?} cannot be used as a directory name: {reason}")]
    UnsafeVersionId { id: String, reason: &'static str },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("{what} did not finish within {after:?}")]
    TransferTimeout { what: String, after: Duration },

    #[error("Failed to extract {}: {source}", archive.display())]
    Extract {
        archive: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("{failed} asset downloads failed (allowed: {allowed})")]
    TooManyAssetFailures { failed: usize, allowed: usize },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn manifest(
        url: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::ManifestFetch {
            url: url.into(),
            source: source.into(),
        }
    }
}
