//! Destinations a finished version tree is published to.

pub mod b2;
pub mod git;
pub mod upload;

use crate::error::PublishError;
use crate::selector::SafeName;
use futures::future::BoxFuture;
use std::path::PathBuf;

pub use b2::B2Store;
pub use git::GitSink;
pub use upload::{ObjectStore, StorageSink, UploadOptions};

/// The version a sink is working on
#[derive(Debug, Clone)]
pub struct PublishContext {
    /// `<output_dir>/<safe name>`, the tree being produced
    pub work_dir: PathBuf,
    pub version_id: String,
    pub safe_name: SafeName,
}

/// A publish target driven by the pipeline.
/// `prepare` runs once the empty work dir exists, before any content is
/// written; `publish` runs after the tree is complete and indexed.
pub trait PublishSink: Send + Sync {
    fn name(&self) -> &str;

    fn prepare<'a>(&'a self, ctx: &'a PublishContext) -> BoxFuture<'a, Result<(), PublishError>>;

    fn publish<'a>(&'a self, ctx: &'a PublishContext) -> BoxFuture<'a, Result<(), PublishError>>;
}

/// Run blocking sink work off the async runtime
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, PublishError>
where
    F: FnOnce() -> Result<T, PublishError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PublishError::Join(e.to_string()))?
}
