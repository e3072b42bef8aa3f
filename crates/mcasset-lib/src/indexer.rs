//! Per-directory listing and aggregate documents for a produced version tree.
//!
//! Every directory gets a `_list.json` naming its children and, when it holds
//! any JSON documents, an `_all.json` merging them under their base names.

use crate::error::{Error, Result};
use serde::Serialize;
use std::path::Path;

pub const LIST_FILE: &str = "_list.json";
pub const AGGREGATE_FILE: &str = "_all.json";
const VCS_DIR: &str = ".git";

#[derive(Debug, Serialize)]
struct Listing {
    directories: Vec<String>,
    files: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Directories that received a listing document
    pub directories: usize,
    /// JSON documents merged into aggregate documents
    pub aggregated: usize,
}

fn is_generated(name: &str) -> bool {
    name == LIST_FILE || name == AGGREGATE_FILE
}

/// Index `dir` and every directory below it except version-control metadata.
///
/// Blocking: call through `spawn_blocking` from async code. Only run this once
/// all files of the tree exist, since it inventories the final state.
pub fn index_tree(dir: &Path) -> Result<IndexStats> {
    let mut stats = IndexStats::default();
    index_dir(dir, &mut stats)?;
    log::info!(
        "Indexed {} directories ({} JSON documents aggregated)",
        stats.directories,
        stats.aggregated
    );
    Ok(stats)
}

fn index_dir(dir: &Path, stats: &mut IndexStats) -> Result<()> {
    let mut files = Vec::new();
    let mut directories = Vec::new();

    for entry in std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if file_type.is_dir() {
            if name != VCS_DIR {
                directories.push(name);
            }
        } else if !is_generated(&name) {
            files.push(name);
        }
    }
    files.sort();
    directories.sort();

    // Sorted keys: serde_json::Map is a BTreeMap without preserve_order
    let mut aggregate = serde_json::Map::new();
    for (name, key) in files
        .iter()
        .filter_map(|n| n.strip_suffix(".json").map(|key| (n, key)))
    {
        let path = dir.join(name);
        let raw = std::fs::read(&path).map_err(|e| Error::io(&path, e))?;
        match serde_json::from_slice::<serde_json::Value>(&raw) {
            Ok(value) => {
                aggregate.insert(key.to_string(), value);
            }
            Err(e) => log::warn!("Skipping malformed JSON {:?}: {}", path, e),
        }
    }

    let listing = Listing {
        directories: directories.clone(),
        files,
    };
    write_json(&dir.join(LIST_FILE), &listing)?;
    stats.directories += 1;

    if !aggregate.is_empty() {
        stats.aggregated += aggregate.len();
        write_json(&dir.join(AGGREGATE_FILE), &aggregate)?;
    }

    for name in directories {
        index_dir(&dir.join(name), stats)?;
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| Error::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
}
