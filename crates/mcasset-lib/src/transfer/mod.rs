//! HTTP transfers and archive handling.

pub mod batch;
pub mod downloader;
pub mod extract;

pub use batch::{AssetFanout, AssetOutcome, FanoutOptions, FanoutReport};
pub use downloader::{download_to_path, fetch_bytes};
pub use extract::{extract_prefixes, ExtractCounts, CLIENT_PREFIXES};
