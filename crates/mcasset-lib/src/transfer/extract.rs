use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Top-level archive directories copied out of the game client
pub const CLIENT_PREFIXES: [&str; 2] = ["assets/", "data/"];

/// Extracted entry count per prefix, for progress display
pub type ExtractCounts = BTreeMap<String, usize>;

/// Copy every archive entry whose name starts with one of `prefixes` into
/// `target_dir`, keeping its path. Existing files are overwritten.
///
/// Entries are read one at a time from disk; the archive is never loaded into
/// memory as a whole. Blocking: call through `spawn_blocking` from async code.
pub fn extract_prefixes(
    archive_path: &Path,
    target_dir: &Path,
    prefixes: &[&str],
) -> Result<ExtractCounts> {
    log::debug!("Extracting {:?} to {:?} ({:?})", archive_path, target_dir, prefixes);

    let zip_err = |source| Error::Extract {
        archive: archive_path.to_path_buf(),
        source,
    };

    let file = File::open(archive_path).map_err(|e| Error::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(zip_err)?;

    let mut counts: ExtractCounts = prefixes.iter().map(|p| (p.to_string(), 0)).collect();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_err)?;
        let name = entry.name().to_string();

        let Some(prefix) = prefixes.iter().find(|p| name.starts_with(**p)) else {
            continue;
        };

        // Skip entries that would land outside the target (e.g. "assets/../../x")
        let Some(relative) = entry.enclosed_name() else {
            log::warn!("Skipping archive entry with unsafe path: {}", name);
            continue;
        };
        let outpath = target_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(|e| Error::io(&outpath, e))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut outfile = File::create(&outpath).map_err(|e| Error::io(&outpath, e))?;
        std::io::copy(&mut entry, &mut outfile).map_err(|e| match e.kind() {
            // Decompression failures surface as io errors from the entry reader
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                zip_err(zip::result::ZipError::Io(e))
            }
            _ => Error::io(&outpath, e),
        })?;

        if let Some(count) = counts.get_mut(*prefix) {
            *count += 1;
        }
        log::trace!("Extracted {}", name);
    }

    for (prefix, count) in &counts {
        log::info!("Extracted {} {} files", count, prefix.trim_end_matches('/'));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let f = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(f);
        for (name, data) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(data).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extracts_only_configured_prefixes() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("client.jar");
        let binary: Vec<u8> = (0..=255u8).collect();
        write_zip(
            &archive,
            &[
                ("assets/a.txt", b"alpha"),
                ("data/b.txt", &binary),
                ("other/c.txt", b"gamma"),
                ("net/minecraft/Main.class", b"\xca\xfe"),
            ],
        );

        let out = tmp.path().join("out");
        let counts = extract_prefixes(&archive, &out, &CLIENT_PREFIXES).unwrap();

        assert_eq!(std::fs::read(out.join("assets/a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(out.join("data/b.txt")).unwrap(), binary);
        assert!(!out.join("other").exists());
        assert!(!out.join("net").exists());
        assert_eq!(counts["assets/"], 1);
        assert_eq!(counts["data/"], 1);
    }

    #[test]
    fn directory_entries_and_overwrites() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("client.jar");
        write_zip(
            &archive,
            &[
                ("assets/", b""),
                ("assets/minecraft/", b""),
                ("assets/minecraft/lang.json", b"{}"),
            ],
        );

        let out = tmp.path().join("out");
        std::fs::create_dir_all(out.join("assets/minecraft")).unwrap();
        std::fs::write(out.join("assets/minecraft/lang.json"), "stale data").unwrap();

        let counts = extract_prefixes(&archive, &out, &CLIENT_PREFIXES).unwrap();
        assert_eq!(
            std::fs::read_to_string(out.join("assets/minecraft/lang.json")).unwrap(),
            "{}"
        );
        assert_eq!(counts["assets/"], 1);
        assert_eq!(counts["data/"], 0);
    }

    #[test]
    fn truncated_archive_is_extract_error() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("client.jar");
        write_zip(&archive, &[("assets/a.txt", b"alpha")]);
        let bytes = std::fs::read(&archive).unwrap();
        std::fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

        let err = extract_prefixes(&archive, &tmp.path().join("out"), &CLIENT_PREFIXES)
            .unwrap_err();
        assert!(matches!(err, Error::Extract { .. }), "got {err:?}");
    }
}
