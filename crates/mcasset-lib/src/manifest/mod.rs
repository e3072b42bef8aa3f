pub mod client;
pub mod types;

pub use client::ManifestClient;
pub use types::*;
