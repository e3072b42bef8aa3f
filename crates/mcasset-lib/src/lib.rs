//! Downloads Minecraft version assets, reorganizes them on disk and publishes
//! the result to a git remote and/or object storage.

pub mod error;
pub mod indexer;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod selector;
pub mod settings;
pub mod transfer;

pub use error::{Error, PublishError, Result, TransferError};
pub use pipeline::{BatchReport, Pipeline, VersionOutcome, VersionReport};
pub use progress::{ConsoleProgress, ProgressReporter, SilentProgressReporter};
pub use selector::{SafeName, VersionSelector};
pub use settings::{BatchPolicy, GitSettings, Settings, StorageSettings};
