//! Run settings for the downloader.
//! One immutable value is built at startup and handed to every component;
//! nothing reads configuration from shared mutable state.

use std::path::PathBuf;
use std::time::Duration;

// URL Constants
pub const VANILLA_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
pub const RESOURCES_URL: &str = "https://resources.download.minecraft.net";
pub const B2_API_URL: &str = "https://api.backblazeb2.com";

pub const DEFAULT_OUTPUT_DIR: &str = "extract";
pub const DEFAULT_CONCURRENCY: usize = 64;
pub const UNIT_TIMEOUT_SECS: u64 = 10 * 60;
pub const DRAIN_TIMEOUT_SECS: u64 = 60 * 60;
pub const CONNECT_TIMEOUT_SECS: u64 = 30;
pub const LARGE_FILE_THRESHOLD: u64 = 5_000_000;
pub const DEFAULT_COMMITTER: &str = "InventiveBot";
pub const DEFAULT_BASE_BRANCH: &str = "master";

/// What happens to the rest of an `all-*` batch when one version fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// Abort the whole batch on the first failing version.
    #[default]
    FailFast,
    /// Record the failure and continue with the next version.
    ContinueOnError,
}

#[derive(Debug, Clone)]
pub struct GitSettings {
    pub repo_url: String,
    pub email: String,
    pub password: String,
    pub committer_name: String,
    pub base_branch: String,
}

impl GitSettings {
    pub fn new(repo_url: String, email: String, password: String) -> Self {
        Self {
            repo_url,
            email,
            password,
            committer_name: DEFAULT_COMMITTER.to_string(),
            base_branch: DEFAULT_BASE_BRANCH.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub bucket: String,
    pub key_id: String,
    pub application_key: String,
    /// Files above this size are sent through the multi-part upload path
    pub large_file_threshold: u64,
    pub api_url: String,
}

impl StorageSettings {
    pub fn new(bucket: String, key_id: String, application_key: String) -> Self {
        Self {
            bucket,
            key_id,
            application_key,
            large_file_threshold: LARGE_FILE_THRESHOLD,
            api_url: B2_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Scratch root, emptied before each version. The version being
    /// processed lands in `<output_dir>/<safe name>`.
    pub output_dir: PathBuf,
    pub manifest_url: String,
    pub resources_url: String,
    /// Number of concurrent asset downloads / uploads
    pub concurrency: usize,
    pub unit_timeout: Duration,
    pub drain_timeout: Duration,
    pub connect_timeout: Duration,
    /// Write the raw version detail document as `<id>.json`
    pub write_detail_document: bool,
    /// Fail the version when more assets than this fail; `None` tolerates any number
    pub max_asset_failures: Option<usize>,
    pub batch_policy: BatchPolicy,
    pub git: Option<GitSettings>,
    pub storage: Option<StorageSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            manifest_url: VANILLA_MANIFEST_URL.to_string(),
            resources_url: RESOURCES_URL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            unit_timeout: Duration::from_secs(UNIT_TIMEOUT_SECS),
            drain_timeout: Duration::from_secs(DRAIN_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            write_detail_document: true,
            max_asset_failures: None,
            batch_policy: BatchPolicy::FailFast,
            git: None,
            storage: None,
        }
    }
}

impl Settings {
    /// Build the shared HTTP client for a run.
    ///
    /// Only the connect phase is bounded; manifest and archive transfers rely on
    /// the transport's default (unbounded) read behaviour.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .pool_max_idle_per_host(self.concurrency.max(1))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("mcasset-downloader/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_tool() {
        let settings = Settings::default();
        assert_eq!(settings.output_dir, PathBuf::from("extract"));
        assert_eq!(settings.concurrency, 64);
        assert_eq!(settings.unit_timeout, Duration::from_secs(600));
        assert_eq!(settings.drain_timeout, Duration::from_secs(3600));
        assert_eq!(settings.batch_policy, BatchPolicy::FailFast);
        assert!(settings.max_asset_failures.is_none());
        assert!(settings.git.is_none() && settings.storage.is_none());
    }

    #[test]
    fn storage_threshold_is_five_megabytes() {
        let storage = StorageSettings::new("bucket".into(), "id".into(), "key".into());
        assert_eq!(storage.large_file_threshold, 5_000_000);
        assert_eq!(storage.api_url, B2_API_URL);
    }
}
