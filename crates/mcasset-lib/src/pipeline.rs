//! Drives selected versions through download, extraction, indexing and
//! publishing.

use crate::error::{Error, Result};
use crate::indexer::{index_tree, IndexStats};
use crate::manifest::{ManifestClient, VersionIndex, VersionMeta, VersionSummary};
use crate::progress::{ProgressReporter, SilentProgressReporter};
use crate::publish::{PublishContext, PublishSink};
use crate::selector::{SafeName, VersionSelector};
use crate::settings::{BatchPolicy, Settings};
use crate::transfer::{
    download_to_path, extract_prefixes, AssetFanout, ExtractCounts, FanoutOptions,
    CLIENT_PREFIXES,
};
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;

/// Result of one fully processed version
#[derive(Debug)]
pub struct VersionReport {
    pub version_id: String,
    pub safe_name: SafeName,
    pub extracted: ExtractCounts,
    pub assets_ok: usize,
    pub assets_failed: usize,
    /// Whether client and server mappings were downloaded
    pub mappings: bool,
    pub index: IndexStats,
}

#[derive(Debug)]
pub struct VersionOutcome {
    pub version_id: String,
    pub result: Result<VersionReport>,
}

/// Per-version outcomes of a run, in processing order.
///
/// With [`BatchPolicy::FailFast`] the first failed outcome is also the last one.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<VersionOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

pub struct Pipeline {
    settings: Arc<Settings>,
    http: Client,
    manifest: ManifestClient,
    sinks: Vec<Box<dyn PublishSink>>,
    /// `None` prints the plain transfer line for sequential downloads
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl Pipeline {
    pub fn new(settings: Settings, sinks: Vec<Box<dyn PublishSink>>) -> Result<Self> {
        let http = settings.http_client().map_err(Error::HttpClient)?;
        Ok(Self::with_client(settings, http, sinks))
    }

    pub fn with_client(settings: Settings, http: Client, sinks: Vec<Box<dyn PublishSink>>) -> Self {
        let manifest = ManifestClient::new(http.clone(), settings.manifest_url.clone());
        Self {
            settings: Arc::new(settings),
            http,
            manifest,
            sinks,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub async fn load_index(&self) -> Result<VersionIndex> {
        self.manifest.fetch_index().await
    }

    /// Resolve `selector` and process every matching version in turn.
    ///
    /// Index and resolution failures are returned as errors before any version
    /// is touched. Per-version failures are recorded in the report according to
    /// the batch policy.
    pub async fn run(&self, selector: &VersionSelector) -> Result<BatchReport> {
        let index = self.load_index().await?;
        let versions = selector.resolve(&index)?;

        let mut report = BatchReport::default();
        for summary in versions {
            let result = self.run_version(summary).await;
            let failed = result.is_err();
            if let Err(e) = &result {
                log::error!("Version {} failed: {}", summary.id, e);
            }
            report.outcomes.push(VersionOutcome {
                version_id: summary.id.clone(),
                result,
            });

            if failed && self.settings.batch_policy == BatchPolicy::FailFast {
                log::error!("Aborting remaining versions");
                break;
            }
        }
        Ok(report)
    }

    /// Produce and publish the tree of a single version
    pub async fn run_version(&self, summary: &VersionSummary) -> Result<VersionReport> {
        log::info!("Downloading version {} ({})", summary.id, summary.version_type);
        let safe_name = SafeName::new(&summary.id)?;
        let output_dir = &self.settings.output_dir;
        let work_dir = output_dir.join(&safe_name);

        // Only one version tree lives in the scratch root at a time
        if tokio::fs::try_exists(output_dir).await.unwrap_or(false) {
            log::info!("Cleaning up old files in {:?}", output_dir);
            tokio::fs::remove_dir_all(output_dir)
                .await
                .map_err(|e| Error::io(output_dir, e))?;
        }
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| Error::io(&work_dir, e))?;

        let ctx = PublishContext {
            work_dir,
            version_id: summary.id.clone(),
            safe_name: safe_name.clone(),
        };
        for sink in &self.sinks {
            log::info!("Preparing {} for {}", sink.name(), safe_name);
            sink.prepare(&ctx).await?;
        }

        let meta = VersionMeta::stamp_now(summary);
        let meta_json = serde_json::to_vec_pretty(&meta).map_err(|e| {
            Error::io(
                ctx.work_dir.join("version.json"),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        write_file(&ctx.work_dir.join("version.json"), &meta_json).await?;

        log::info!("Downloading {}.json", summary.id);
        let (raw_detail, detail) = self.manifest.fetch_detail_raw(&summary.url).await?;
        if self.settings.write_detail_document {
            write_file(&ctx.work_dir.join(format!("{}.json", summary.id)), &raw_detail).await?;
        }
        let assets = self
            .manifest
            .fetch_asset_objects(&detail.asset_index.url)
            .await?;

        let archive = tempfile::Builder::new()
            .prefix("client")
            .suffix(".jar")
            .tempfile()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        log::info!("Downloading client jar to {:?}", archive.path());
        self.step("Downloading client");
        download_to_path(
            &self.http,
            &detail.downloads.client.url,
            archive.path(),
            self.reporter.as_deref(),
        )
        .await?;

        log::info!("Extracting assets & data from client jar...");
        self.step("Extracting");
        let archive_path = archive.path().to_path_buf();
        let target = ctx.work_dir.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            extract_prefixes(&archive_path, &target, &CLIENT_PREFIXES)
        })
        .await??;
        drop(archive);

        log::info!("Downloading {} assets...", assets.objects.len());
        let fanout = AssetFanout::new(
            self.http.clone(),
            FanoutOptions {
                concurrency: self.settings.concurrency,
                unit_timeout: self.settings.unit_timeout,
                drain_timeout: self.settings.drain_timeout,
                resources_url: self.settings.resources_url.clone(),
            },
        );
        let fanout_reporter = self
            .reporter
            .clone()
            .unwrap_or_else(|| Arc::new(SilentProgressReporter) as Arc<dyn ProgressReporter>);
        let assets_report = fanout
            .download_all(&assets, &ctx.work_dir, fanout_reporter)
            .await?;
        if let Some(allowed) = self.settings.max_asset_failures {
            if assets_report.failed() > allowed {
                return Err(Error::TooManyAssetFailures {
                    failed: assets_report.failed(),
                    allowed,
                });
            }
        }

        let mappings = match detail.downloads.mappings() {
            Some((client, server)) => {
                log::info!("Downloading mappings...");
                self.step("Downloading mappings");
                let dir = ctx.work_dir.join("mappings");
                for (name, download) in [("client.txt", client), ("server.txt", server)] {
                    download_to_path(
                        &self.http,
                        &download.url,
                        &dir.join(name),
                        self.reporter.as_deref(),
                    )
                    .await?;
                }
                true
            }
            None => {
                log::info!("No mappings published for {}", summary.id);
                false
            }
        };

        log::info!("Generating file lists...");
        self.step("Indexing");
        let root = ctx.work_dir.clone();
        let index = tokio::task::spawn_blocking(move || index_tree(&root)).await??;

        for sink in &self.sinks {
            log::info!("Publishing {} to {}", safe_name, sink.name());
            self.step(&format!("Publishing to {}", sink.name()));
            sink.publish(&ctx).await?;
        }

        log::info!("Finished version {}", summary.id);
        Ok(VersionReport {
            version_id: summary.id.clone(),
            safe_name,
            extracted,
            assets_ok: assets_report.succeeded(),
            assets_failed: assets_report.failed(),
            mappings,
            index,
        })
    }

    fn step(&self, name: &str) {
        if let Some(reporter) = &self.reporter {
            reporter.start_step(name);
        }
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| Error::io(path, e))
}
