use super::{PublishContext, PublishSink};
use crate::error::PublishError;
use crate::settings::{Settings, LARGE_FILE_THRESHOLD};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

/// Bucket-level object storage. Uploads overwrite whatever is stored under
/// the same key.
pub trait ObjectStore: Send + Sync {
    fn upload_small<'a>(
        &'a self,
        key: &'a str,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<(), PublishError>>;

    /// Multi-part upload for files above the large-file threshold
    fn upload_large<'a>(
        &'a self,
        key: &'a str,
        path: &'a Path,
        size: u64,
    ) -> BoxFuture<'a, Result<(), PublishError>>;
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub large_file_threshold: u64,
    pub concurrency: usize,
    pub unit_timeout: Duration,
    pub drain_timeout: Duration,
}

impl UploadOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            large_file_threshold: settings
                .storage
                .as_ref()
                .map(|s| s.large_file_threshold)
                .unwrap_or(LARGE_FILE_THRESHOLD),
            concurrency: settings.concurrency,
            unit_timeout: settings.unit_timeout,
            drain_timeout: settings.drain_timeout,
        }
    }
}

/// Mirrors a version tree into object storage under `<safe name>/...`
pub struct StorageSink {
    store: Arc<dyn ObjectStore>,
    options: UploadOptions,
}

struct PendingUpload {
    key: String,
    path: PathBuf,
    size: u64,
}

impl StorageSink {
    pub fn new(store: Arc<dyn ObjectStore>, options: UploadOptions) -> Self {
        Self { store, options }
    }

    async fn upload_tree(&self, ctx: &PublishContext) -> Result<(), PublishError> {
        let pending = collect_files(&ctx.work_dir, ctx.safe_name.as_str())?;
        let total = pending.len();
        log::info!("Uploading {} files to object storage...", total);

        let threshold = self.options.large_file_threshold;
        let unit_timeout = self.options.unit_timeout;
        let uploads = pending.into_iter().map(|upload| {
            let store = self.store.clone();
            async move {
                let large = upload.size > threshold;
                log::debug!("{}{}", if large { "L" } else { "S" }, upload.key);
                let transfer = async {
                    if large {
                        store.upload_large(&upload.key, &upload.path, upload.size).await
                    } else {
                        store.upload_small(&upload.key, &upload.path).await
                    }
                };
                let result = match tokio::time::timeout(unit_timeout, transfer).await {
                    Ok(result) => result,
                    Err(_) => Err(PublishError::Timeout {
                        what: format!("Upload of {}", upload.key),
                        after: unit_timeout,
                    }),
                };
                if let Err(e) = &result {
                    log::warn!("Failed to upload {}: {}", upload.key, e);
                }
                result.is_ok()
            }
        });

        let drain = stream::iter(uploads)
            .buffer_unordered(self.options.concurrency.max(1))
            .collect::<Vec<bool>>();
        let results = tokio::time::timeout(self.options.drain_timeout, drain)
            .await
            .map_err(|_| PublishError::Timeout {
                what: format!("Upload of {} files", total),
                after: self.options.drain_timeout,
            })?;

        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            log::warn!("{}/{} uploads failed", failed, total);
        } else {
            log::info!("Uploaded {} files", total);
        }
        Ok(())
    }
}

impl PublishSink for StorageSink {
    fn name(&self) -> &str {
        "object storage"
    }

    fn prepare<'a>(&'a self, _ctx: &'a PublishContext) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(async { Ok(()) })
    }

    fn publish<'a>(&'a self, ctx: &'a PublishContext) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(self.upload_tree(ctx))
    }
}

/// Every regular file below `root` outside `.git`, keyed as
/// `<prefix>/<path relative to root>` with `/` separators.
fn collect_files(root: &Path, prefix: &str) -> Result<Vec<PendingUpload>, PublishError> {
    let mut pending = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            PublishError::Io {
                path,
                source: e.into(),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry
            .metadata()
            .map_err(|e| PublishError::Io {
                path: entry.path().to_path_buf(),
                source: e.into(),
            })?
            .len();

        pending.push(PendingUpload {
            key: format!("{}/{}", prefix, key),
            path: entry.into_path(),
            size,
        });
    }
    Ok(pending)
}
