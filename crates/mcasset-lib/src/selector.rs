//! Version selectors and the directory/branch-safe form of a version id.

use crate::error::{Error, Result};
use crate::manifest::{VersionIndex, VersionSummary, VersionType};
use std::fmt;

/// A user-supplied version selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    /// Latest snapshot, then latest release
    Latest,
    LatestRelease,
    LatestSnapshot,
    AllReleases,
    AllSnapshots,
    Exact(String),
}

impl std::str::FromStr for VersionSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "latest" => VersionSelector::Latest,
            "latest-release" => VersionSelector::LatestRelease,
            "latest-snapshot" => VersionSelector::LatestSnapshot,
            "all-releases" => VersionSelector::AllReleases,
            "all-snapshots" => VersionSelector::AllSnapshots,
            other => VersionSelector::Exact(other.to_string()),
        })
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => write!(f, "latest"),
            VersionSelector::LatestRelease => write!(f, "latest-release"),
            VersionSelector::LatestSnapshot => write!(f, "latest-snapshot"),
            VersionSelector::AllReleases => write!(f, "all-releases"),
            VersionSelector::AllSnapshots => write!(f, "all-snapshots"),
            VersionSelector::Exact(id) => write!(f, "{}", id),
        }
    }
}

impl VersionSelector {
    /// Map the selector onto concrete index entries, in processing order.
    pub fn resolve<'a>(&self, index: &'a VersionIndex) -> Result<Vec<&'a VersionSummary>> {
        let lookup = move |id: &str| {
            index.find(id).ok_or_else(|| Error::UnknownVersion { id: id.to_string() })
        };

        let resolved = match self {
            VersionSelector::LatestRelease => {
                log::info!("Downloading latest release");
                vec![lookup(&index.latest.release)?]
            }
            VersionSelector::LatestSnapshot => {
                log::info!("Downloading latest snapshot");
                vec![lookup(&index.latest.snapshot)?]
            }
            VersionSelector::Latest => {
                log::info!("Downloading latest snapshot & release");
                let snapshot = lookup(&index.latest.snapshot)?;
                let release = lookup(&index.latest.release)?;
                if snapshot.id == release.id {
                    vec![snapshot]
                } else {
                    vec![snapshot, release]
                }
            }
            VersionSelector::AllReleases => {
                log::info!("Downloading all release versions...");
                index.of_type(&VersionType::Release).collect()
            }
            VersionSelector::AllSnapshots => {
                log::info!("Downloading all snapshot versions...");
                index.of_type(&VersionType::Snapshot).collect()
            }
            VersionSelector::Exact(id) => vec![lookup(id)?],
        };

        if resolved.is_empty() {
            log::warn!("Selector {} matched no versions", self);
        }
        Ok(resolved)
    }
}

/// A version id escaped for use as a path segment and git ref name.
///
/// `_` becomes `__` and ` ` becomes `_`. Ids where a space touches an
/// underscore or another space are rejected since their escaped form would be
/// ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeName(String);

impl SafeName {
    pub fn new(id: &str) -> Result<Self> {
        let reject = |reason| Error::UnsafeVersionId {
            id: id.to_string(),
            reason,
        };

        if id.is_empty() {
            return Err(reject("empty id"));
        }
        if id.contains(['/', '\\']) {
            return Err(reject("contains a path separator"));
        }
        if id.contains("..") || id == "." {
            return Err(reject("contains a relative path component"));
        }
        if id.chars().any(char::is_control) {
            return Err(reject("contains a control character"));
        }
        if id.contains("_ ") || id.contains(" _") || id.contains("  ") {
            return Err(reject("space next to an underscore or another space"));
        }

        Ok(SafeName(id.replace('_', "__").replace(' ', "_")))
    }

    /// Recover the version id this name was built from
    pub fn unescape(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut chars = self.0.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '_' {
                if chars.peek() == Some(&'_') {
                    chars.next();
                    out.push('_');
                } else {
                    out.push(' ');
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SafeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<std::path::Path> for SafeName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Latest;

    fn summary(id: &str, version_type: VersionType) -> VersionSummary {
        VersionSummary {
            id: id.to_string(),
            version_type,
            url: format!("https://example.com/{id}.json"),
            time: "t".to_string(),
            release_time: "t".to_string(),
            sha1: None,
            compliance_level: None,
        }
    }

    fn index() -> VersionIndex {
        VersionIndex {
            latest: Latest {
                release: "1.20.4".to_string(),
                snapshot: "24w03a".to_string(),
            },
            versions: vec![
                summary("24w03a", VersionType::Snapshot),
                summary("1.20.4", VersionType::Release),
                summary("23w51b", VersionType::Snapshot),
                summary("1.20.3", VersionType::Release),
                summary("b1.7.3", VersionType::OldBeta),
            ],
        }
    }

    fn ids(selector: &str) -> Vec<String> {
        let index = index();
        selector
            .parse::<VersionSelector>()
            .unwrap()
            .resolve(&index)
            .unwrap()
            .into_iter()
            .map(|v| v.id.clone())
            .collect()
    }

    #[test]
    fn parses_special_selectors() {
        assert_eq!("latest".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!(
            "all-snapshots".parse::<VersionSelector>().unwrap(),
            VersionSelector::AllSnapshots
        );
        assert_eq!(
            "1.8.9".parse::<VersionSelector>().unwrap(),
            VersionSelector::Exact("1.8.9".to_string())
        );
    }

    #[test]
    fn resolves_each_selector_class() {
        assert_eq!(ids("latest"), vec!["24w03a", "1.20.4"]);
        assert_eq!(ids("latest-release"), vec!["1.20.4"]);
        assert_eq!(ids("latest-snapshot"), vec!["24w03a"]);
        assert_eq!(ids("all-releases"), vec!["1.20.4", "1.20.3"]);
        assert_eq!(ids("all-snapshots"), vec!["24w03a", "23w51b"]);
        assert_eq!(ids("b1.7.3"), vec!["b1.7.3"]);
    }

    #[test]
    fn latest_is_deduplicated_when_pointers_agree() {
        let mut index = index();
        index.latest.snapshot = "1.20.4".to_string();
        let resolved = VersionSelector::Latest.resolve(&index).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "1.20.4");
    }

    #[test]
    fn unknown_id_is_rejected() {
        let err = VersionSelector::Exact("9.9.9".to_string())
            .resolve(&index())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownVersion { ref id } if id == "9.9.9"));
    }

    #[test]
    fn dangling_latest_pointer_is_unknown_version() {
        let mut index = index();
        index.latest.release = "missing".to_string();
        assert!(matches!(
            VersionSelector::LatestRelease.resolve(&index),
            Err(Error::UnknownVersion { .. })
        ));
    }

    #[test]
    fn safe_name_escapes_underscores_and_spaces() {
        assert_eq!(SafeName::new("1.20.4").unwrap().as_str(), "1.20.4");
        assert_eq!(
            SafeName::new("1.14 Pre-Release 1").unwrap().as_str(),
            "1.14_Pre-Release_1"
        );
        assert_eq!(
            SafeName::new("combat_test_8c").unwrap().as_str(),
            "combat__test__8c"
        );
    }

    #[test]
    fn safe_name_is_injective_and_reversible() {
        let ids = [
            "a b", "a_b", "a__b", "a b c", "a_b_c", "a b_c", "1.14 Pre-Release 1",
            "1.14_Pre-Release_1", "3D Shareware v1.34", "20w14∞", "x",
        ];
        let mut seen = std::collections::HashSet::new();
        for id in ids {
            let safe = SafeName::new(id).unwrap();
            assert_eq!(safe.unescape(), id);
            assert!(seen.insert(safe.as_str().to_string()), "collision for {id}");
        }
    }

    #[test]
    fn safe_name_rejects_ambiguous_and_unsafe_ids() {
        for id in ["a_ b", "a _b", "a  b", "", "../x", "a/b", "a\\b", "bad\nid"] {
            assert!(
                matches!(SafeName::new(id), Err(Error::UnsafeVersionId { .. })),
                "{id:?} should be rejected"
            );
        }
    }
}
