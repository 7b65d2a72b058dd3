//! Location definitions and structural fingerprints.
//!
//! A fingerprint is CRC-32 over `(kind, prefix, file_root, upstream)` with a
//! unit separator between fields. It is only a cheap change detector: a
//! collision would make a changed location look unchanged, which is tolerated
//! at this system's scale.

use std::path::{Path, PathBuf};

use crate::config::schema::{LocationConfig, LocationKindConfig};

const FIELD_SEPARATOR: u8 = 0x1f;

/// What a location does, with the data each kind needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationKind {
    /// Forward to a backend of the named upstream.
    LoadBalance { upstream: String },
    /// Serve files below `root`.
    FileServe { root: PathBuf },
}

impl LocationKind {
    fn code(&self) -> u8 {
        match self {
            LocationKind::LoadBalance { .. } => LocationKindConfig::LoadBalance.code(),
            LocationKind::FileServe { .. } => LocationKindConfig::FileServe.code(),
        }
    }
}

/// A path-scoped routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    kind: LocationKind,
    path_prefix: String,
    fingerprint: u32,
}

impl Location {
    pub fn new(kind: LocationKind, path_prefix: impl Into<String>) -> Self {
        let mut path_prefix = path_prefix.into();
        if path_prefix.is_empty() {
            path_prefix.push('/');
        }
        let fingerprint = match &kind {
            LocationKind::LoadBalance { upstream } => {
                location_fingerprint(kind.code(), &path_prefix, "", upstream)
            }
            LocationKind::FileServe { root } => {
                location_fingerprint(kind.code(), &path_prefix, &root.to_string_lossy(), "")
            }
        };
        Self {
            kind,
            path_prefix,
            fingerprint,
        }
    }

    /// Build from validated configuration.
    pub fn from_config(config: &LocationConfig) -> Self {
        let kind = match config.kind {
            LocationKindConfig::LoadBalance => LocationKind::LoadBalance {
                upstream: config.upstream.clone().unwrap_or_default(),
            },
            LocationKindConfig::FileServe => LocationKind::FileServe {
                root: PathBuf::from(config.file_root.clone().unwrap_or_default()),
            },
        };
        Self::new(kind, config.path_prefix())
    }

    pub fn kind(&self) -> &LocationKind {
        &self.kind
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    /// Whether `path` falls under this location.
    ///
    /// A prefix ending in `/` matches its whole subtree; any other prefix
    /// matches itself and the paths below it.
    pub fn matches(&self, path: &str) -> bool {
        let prefix = self.path_prefix.as_str();
        if prefix.ends_with('/') {
            return path.starts_with(prefix);
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// The part of `path` below this location's prefix, always starting with `/`.
    pub fn relative_path(&self, path: &str) -> String {
        let prefix = self.path_prefix.trim_end_matches('/');
        let rest = path.strip_prefix(prefix).unwrap_or(path);
        if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{}", rest)
        }
    }

    pub fn file_root(&self) -> Option<&Path> {
        match &self.kind {
            LocationKind::FileServe { root } => Some(root),
            LocationKind::LoadBalance { .. } => None,
        }
    }
}

/// CRC-32 over the fingerprint-relevant fields of a location.
pub fn location_fingerprint(kind: u8, path_prefix: &str, file_root: &str, upstream: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind.to_string().as_bytes());
    for field in [path_prefix, file_root, upstream] {
        hasher.update(&[FIELD_SEPARATOR]);
        hasher.update(field.as_bytes());
    }
    hasher.finalize()
}

/// Service fingerprint: the sum of its location fingerprints.
pub fn service_fingerprint(locations: &[Location]) -> u64 {
    locations.iter().map(|l| u64::from(l.fingerprint)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lb(prefix: &str, upstream: &str) -> Location {
        Location::new(
            LocationKind::LoadBalance {
                upstream: upstream.into(),
            },
            prefix,
        )
    }

    fn files(prefix: &str, root: &str) -> Location {
        Location::new(LocationKind::FileServe { root: root.into() }, prefix)
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(lb("/api", "web").fingerprint(), lb("/api", "web").fingerprint());
        assert_eq!(
            location_fingerprint(1, "/", "", "web"),
            location_fingerprint(1, "/", "", "web")
        );
    }

    #[test]
    fn fingerprint_changes_with_every_field() {
        let base = location_fingerprint(1, "/api", "", "web");
        assert_ne!(base, location_fingerprint(2, "/api", "", "web"));
        assert_ne!(base, location_fingerprint(1, "/app", "", "web"));
        assert_ne!(base, location_fingerprint(1, "/api", "./public", "web"));
        assert_ne!(base, location_fingerprint(1, "/api", "", "web2"));
        // Field boundaries are part of the hash.
        assert_ne!(
            location_fingerprint(1, "/ab", "", "c"),
            location_fingerprint(1, "/a", "", "bc")
        );
    }

    #[test]
    fn kinds_fingerprint_differently() {
        assert_ne!(lb("/", "x").fingerprint(), files("/", "x").fingerprint());
    }

    #[test]
    fn empty_prefix_defaults_to_root() {
        assert_eq!(lb("", "web").path_prefix(), "/");
    }

    #[test]
    fn service_fingerprint_sums_locations() {
        let locations = vec![lb("/", "web"), files("/static/", "./public")];
        let expected = u64::from(locations[0].fingerprint()) + u64::from(locations[1].fingerprint());
        assert_eq!(service_fingerprint(&locations), expected);
        assert_eq!(service_fingerprint(&[]), 0);
    }

    #[test]
    fn subtree_and_segment_matching() {
        let subtree = lb("/static/", "web");
        assert!(subtree.matches("/static/"));
        assert!(subtree.matches("/static/css/site.css"));
        assert!(!subtree.matches("/static"));

        let segment = lb("/api", "web");
        assert!(segment.matches("/api"));
        assert!(segment.matches("/api/v1"));
        assert!(!segment.matches("/apix"));

        assert!(lb("/", "web").matches("/anything"));
    }

    #[test]
    fn relative_path_strips_prefix() {
        assert_eq!(files("/static/", ".").relative_path("/static/css/a.css"), "/css/a.css");
        assert_eq!(files("/static", ".").relative_path("/static/a.css"), "/a.css");
        assert_eq!(files("/static", ".").relative_path("/static"), "/");
        assert_eq!(files("/", ".").relative_path("/index.html"), "/index.html");
    }
}
