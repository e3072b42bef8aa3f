// Supports v2 of mojang's version manifest
// Located at https://piston-meta.mojang.com/mc/game/version_manifest_v2.json

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionIndex {
    pub latest: Latest,

    pub versions: Vec<VersionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Latest {
    pub release: String,

    pub snapshot: String,
}

impl VersionIndex {
    pub fn find(&self, id: &str) -> Option<&VersionSummary> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// Every version of the given type, in index order
    pub fn of_type<'a>(
        &'a self,
        version_type: &'a VersionType,
    ) -> impl Iterator<Item = &'a VersionSummary> + 'a {
        self.versions
            .iter()
            .filter(move |v| &v.version_type == version_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Release,
    Snapshot,
    OldAlpha,
    OldBeta,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VersionType::Release => write!(f, "release"),
            VersionType::Snapshot => write!(f, "snapshot"),
            VersionType::OldAlpha => write!(f, "old_alpha"),
            VersionType::OldBeta => write!(f, "old_beta"),
            VersionType::Other(other) => write!(f, "{}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub id: String,

    #[serde(rename = "type")]
    pub version_type: VersionType,

    pub url: String,

    pub time: String,

    #[serde(rename = "releaseTime")]
    pub release_time: String,

    #[serde(default, skip_serializing)]
    pub sha1: Option<String>,

    #[serde(rename = "complianceLevel", default, skip_serializing)]
    pub compliance_level: Option<i64>,
}

/// Provenance record written as `version.json` next to the extracted files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMeta {
    #[serde(flatten)]
    pub version: VersionSummary,

    /// Milliseconds since the unix epoch
    #[serde(rename = "downloadTimestamp")]
    pub download_timestamp: i64,
}

impl VersionMeta {
    pub fn stamp_now(version: &VersionSummary) -> Self {
        Self {
            version: version.clone(),
            download_timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDetail {
    pub id: String,

    /// Asset index id, e.g. "17"
    #[serde(default)]
    pub assets: Option<String>,

    pub asset_index: AssetIndexRef,

    pub downloads: Downloads,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Downloads {
    pub client: Download,

    #[serde(default)]
    pub client_mappings: Option<Download>,

    #[serde(default)]
    pub server: Option<Download>,

    #[serde(default)]
    pub server_mappings: Option<Download>,
}

impl Downloads {
    /// Client and server mappings, only when both are published
    pub fn mappings(&self) -> Option<(&Download, &Download)> {
        match (&self.client_mappings, &self.server_mappings) {
            (Some(client), Some(server)) => Some((client, server)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Download {
    pub sha1: String,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndexRef {
    pub id: String,
    pub sha1: String,
    pub url: String,
    pub size: u64,
    #[serde(default)]
    pub total_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetObjects {
    pub objects: BTreeMap<String, AssetObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}

impl AssetObject {
    /// Location of the object below the resources host: `<hash[0:2]>/<hash>`.
    /// `None` when the hash is too short to carry a prefix.
    pub fn source_path(&self) -> Option<String> {
        let prefix = self.hash.get(0..2)?;
        Some(format!("{}/{}", prefix, self.hash))
    }
}
