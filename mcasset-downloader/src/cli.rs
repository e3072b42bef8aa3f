use clap::Parser;
use mcasset_lib::settings::{DEFAULT_CONCURRENCY, DEFAULT_OUTPUT_DIR};
use mcasset_lib::VersionSelector;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "mcasset-downloader",
    about = "Download Minecraft version assets and publish them to git and B2",
    disable_version_flag = true
)]
pub struct Cli {
    /// Version to download: an exact id, or one of latest, latest-release,
    /// latest-snapshot, all-releases, all-snapshots
    #[arg(short = 'v', long = "version")]
    pub version: String,

    /// Don't commit and push to the git repository
    #[arg(long = "no-git")]
    pub no_git: bool,

    /// KEY=value config file; created with defaults when missing
    #[arg(long = "config", default_value = "config.env")]
    pub config: PathBuf,

    /// Scratch directory versions are extracted into; emptied before each version
    #[arg(long = "output-dir", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Concurrent asset downloads and uploads
    #[arg(long = "concurrency", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Keep going with the next version when one fails (all-* selectors)
    #[arg(long = "continue-on-error")]
    pub continue_on_error: bool,

    /// Fail a version when more asset downloads than this fail
    #[arg(long = "max-asset-failures")]
    pub max_asset_failures: Option<usize>,
}

impl Cli {
    pub fn selector(&self) -> VersionSelector {
        match self.version.parse::<VersionSelector>() {
            Ok(selector) => selector,
            Err(never) => match never {},
        }
    }
}
