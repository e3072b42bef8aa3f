//! `config.env` loading. Process environment variables override file values.

use anyhow::{Context, Result};
use mcasset_lib::{GitSettings, StorageSettings};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const TEMPLATE: &str = "\
# Git repository the assets are pushed to. Leave empty to disable git.
GIT_REPO=
GIT_EMAIL=
GIT_PASSWORD=

# Backblaze B2 bucket id and application key. Leave B2_APP empty to disable B2.
B2_BUCKET=
B2_APP=
B2_APPKEY=
";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileConfig {
    pub git_repo: String,
    pub git_email: String,
    pub git_password: String,
    pub b2_bucket: String,
    pub b2_app: String,
    pub b2_appkey: String,
}

#[derive(Debug)]
pub enum Loaded {
    /// No config existed; a template was written here
    Created(PathBuf),
    Config(FileConfig),
}

pub fn load_or_bootstrap(path: &Path) -> Result<Loaded> {
    if !path.exists() {
        std::fs::write(path, TEMPLATE)
            .with_context(|| format!("Failed to write default config to {:?}", path))?;
        return Ok(Loaded::Created(path.to_path_buf()));
    }

    let mut values = HashMap::new();
    for item in dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to open config {:?}", path))?
    {
        let (key, value) = item.with_context(|| format!("Failed to parse config {:?}", path))?;
        values.insert(key, value);
    }

    Ok(Loaded::Config(FileConfig::from_lookup(|key| {
        std::env::var(key).ok().or_else(|| values.get(key).cloned())
    })))
}

impl FileConfig {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();
        Self {
            git_repo: get("GIT_REPO"),
            git_email: get("GIT_EMAIL"),
            git_password: get("GIT_PASSWORD"),
            b2_bucket: get("B2_BUCKET"),
            b2_app: get("B2_APP"),
            b2_appkey: get("B2_APPKEY"),
        }
    }

    pub fn git(&self) -> Option<GitSettings> {
        if self.git_repo.is_empty() {
            return None;
        }
        Some(GitSettings::new(
            self.git_repo.clone(),
            self.git_email.clone(),
            self.git_password.clone(),
        ))
    }

    pub fn storage(&self) -> Option<StorageSettings> {
        if self.b2_app.is_empty() {
            return None;
        }
        Some(StorageSettings::new(
            self.b2_bucket.clone(),
            self.b2_app.clone(),
            self.b2_appkey.clone(),
        ))
    }
}
