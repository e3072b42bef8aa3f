use super::types::{AssetObjects, VersionDetail, VersionIndex};
use crate::error::{Error, Result};
use crate::transfer::downloader::fetch_bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;

/// Fetches the version index and the per-version documents it points at.
/// Nothing is cached; every run sees the remote state as it is.
#[derive(Clone)]
pub struct ManifestClient {
    http: Client,
    manifest_url: String,
}

impl ManifestClient {
    pub fn new(http: Client, manifest_url: impl Into<String>) -> Self {
        Self {
            http,
            manifest_url: manifest_url.into(),
        }
    }

    pub async fn fetch_index(&self) -> Result<VersionIndex> {
        log::info!("Fetching version manifest from {}", self.manifest_url);
        let index: VersionIndex = self.fetch_json(&self.manifest_url).await?;

        log::info!(
            "Latest: {} release / {} snapshot",
            index.latest.release,
            index.latest.snapshot
        );
        log::info!("Found {} individual versions", index.versions.len());
        Ok(index)
    }

    pub async fn fetch_detail(&self, url: &str) -> Result<VersionDetail> {
        self.fetch_json(url).await
    }

    /// Fetch a version detail document, returning the untouched bytes alongside
    /// the parsed form so the original document can be stored verbatim.
    pub async fn fetch_detail_raw(&self, url: &str) -> Result<(Vec<u8>, VersionDetail)> {
        let bytes = self.fetch_bytes(url).await?;
        let detail = serde_json::from_slice(&bytes).map_err(|e| Error::manifest(url, e))?;
        Ok((bytes, detail))
    }

    pub async fn fetch_asset_objects(&self, url: &str) -> Result<AssetObjects> {
        let assets: AssetObjects = self.fetch_json(url).await?;
        log::debug!("Asset index {} lists {} objects", url, assets.objects.len());
        Ok(assets)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self.fetch_bytes(url).await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::manifest(url, e))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        fetch_bytes(&self.http, url)
            .await
            .map_err(|e| Error::manifest(url, e))
    }
}
