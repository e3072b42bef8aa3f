use crate::error::{Error, Result, TransferError};
use crate::manifest::AssetObjects;
use crate::progress::ProgressReporter;
use crate::transfer::downloader::download_to_path;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FanoutOptions {
    pub concurrency: usize,
    /// Longest a single asset may take before it is counted as failed
    pub unit_timeout: Duration,
    /// Longest the whole batch may take before it is treated as hung
    pub drain_timeout: Duration,
    /// Content-addressed host; objects live at `<base>/<hash[0:2]>/<hash>`
    pub resources_url: String,
}

#[derive(Debug)]
pub struct AssetOutcome {
    pub logical_path: String,
    pub destination: PathBuf,
    pub result: Result<u64, TransferError>,
}

/// Per-asset results of a fan-out run, in completion order
#[derive(Debug, Default)]
pub struct FanoutReport {
    pub outcomes: Vec<AssetOutcome>,
}

impl FanoutReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssetOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }
}

/// Downloads every object of an asset index into `<target>/assets/<logical path>`
pub struct AssetFanout {
    client: Client,
    options: FanoutOptions,
}

impl AssetFanout {
    pub fn new(client: Client, options: FanoutOptions) -> Self {
        Self { client, options }
    }

    /// Download all assets, best effort.
    ///
    /// Individual failures are logged and recorded in the report; they never
    /// cancel the other units. Only a batch that does not drain within
    /// `drain_timeout` is an error.
    pub async fn download_all(
        &self,
        assets: &AssetObjects,
        target_dir: &Path,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<FanoutReport> {
        let total = assets.objects.len();
        if total == 0 {
            return Ok(FanoutReport::default());
        }

        let started = Arc::new(AtomicUsize::new(0));
        let base = self.options.resources_url.trim_end_matches('/').to_string();
        let unit_timeout = self.options.unit_timeout;
        reporter.start_step("Downloading asset");
        reporter.set_step_count(0, Some(total as u32));

        let units = assets
            .objects
            .iter()
            .enumerate()
            .map(|(unit, (logical_path, object))| {
                let client = self.client.clone();
                let reporter = reporter.clone();
                let started = started.clone();
                let base = base.clone();
                let destination = target_dir.join("assets").join(logical_path);
                let logical_path = logical_path.clone();
                let source_path = object.source_path();

                async move {
                    let url = source_path.as_ref().map(|p| format!("{}/{}", base, p));
                    let current = started.fetch_add(1, Ordering::SeqCst) + 1;
                    reporter.set_step_count(current as u32, Some(total as u32));

                    let result = match (url, is_relative_inside(&logical_path)) {
                        (_, false) => Err(TransferError::InvalidDestination {
                            path: logical_path.clone(),
                        }),
                        (None, _) => Err(TransferError::InvalidDestination {
                            path: format!("{} (invalid hash)", logical_path),
                        }),
                        (Some(url), true) => {
                            let progress = UnitProgress {
                                unit,
                                inner: reporter.as_ref(),
                            };
                            let result = match tokio::time::timeout(
                                unit_timeout,
                                download_to_path(&client, &url, &destination, Some(&progress)),
                            )
                            .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(TransferError::Timeout {
                                    url,
                                    after: unit_timeout,
                                }),
                            };
                            if result.is_err() {
                                discard_partial(&destination).await;
                            }
                            result
                        }
                    };

                    if let Err(e) = &result {
                        log::warn!("Failed to download asset {}: {}", logical_path, e);
                    }

                    AssetOutcome {
                        logical_path,
                        destination,
                        result,
                    }
                }
            });

        let drain = stream::iter(units)
            .buffer_unordered(self.options.concurrency.max(1))
            .collect::<Vec<_>>();

        let outcomes = tokio::time::timeout(self.options.drain_timeout, drain)
            .await
            .map_err(|_| Error::TransferTimeout {
                what: format!("Asset download of {} objects", total),
                after: self.options.drain_timeout,
            })?;

        reporter.done();
        let report = FanoutReport { outcomes };
        log::info!(
            "Downloaded {}/{} assets ({} failed)",
            report.succeeded(),
            total,
            report.failed()
        );
        Ok(report)
    }
}

/// A failed asset must not reach the tree half-written
async fn discard_partial(destination: &Path) {
    match tokio::fs::remove_file(destination).await {
        Ok(()) => log::debug!("Removed partial download {:?}", destination),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove partial download {:?}: {}", destination, e),
    }
}

/// Tags byte updates with the unit they belong to
struct UnitProgress<'a> {
    unit: usize,
    inner: &'a dyn ProgressReporter,
}

impl ProgressReporter for UnitProgress<'_> {
    fn start_step(&self, name: &str) {
        self.inner.start_step(name);
    }
    fn update_bytes(&self, transferred: u64, total: Option<u64>) {
        self.inner.update_unit_bytes(self.unit, transferred, total);
    }
    fn set_message(&self, message: &str) {
        self.inner.set_message(message);
    }
    fn set_step_count(&self, current: u32, total: Option<u32>) {
        self.inner.set_step_count(current, total);
    }
    fn done(&self) {}
}

/// True when `path` stays below the directory it is joined onto
pub(crate) fn is_relative_inside(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
