//! Location lookup for one service.
//!
//! # Responsibilities
//! - Store a service's locations
//! - Look up the location for a request path
//! - Return the matched location or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - Longest matching prefix wins; ties keep configuration order
//! - O(n) scan, acceptable for typical location counts

use crate::config::schema::ServiceConfig;
use crate::routing::location::{service_fingerprint, Location};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationTable {
    /// Sorted by descending prefix length.
    locations: Vec<Location>,
    fingerprint: u64,
}

impl LocationTable {
    pub fn new(locations: Vec<Location>) -> Self {
        let fingerprint = service_fingerprint(&locations);
        let mut locations = locations;
        locations.sort_by(|a, b| b.path_prefix().len().cmp(&a.path_prefix().len()));
        Self {
            locations,
            fingerprint,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.locations.iter().map(Location::from_config).collect())
    }

    /// Location serving `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<&Location> {
        self.locations.iter().find(|location| location.matches(path))
    }

    /// Sum of the location fingerprints.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::location::LocationKind;

    fn lb(prefix: &str, upstream: &str) -> Location {
        Location::new(
            LocationKind::LoadBalance {
                upstream: upstream.into(),
            },
            prefix,
        )
    }

    #[test]
    fn longest_prefix_wins() {
        let table = LocationTable::new(vec![lb("/", "root"), lb("/api/", "api"), lb("/api/admin", "admin")]);

        let upstream = |path: &str| match table.resolve(path).map(Location::kind) {
            Some(LocationKind::LoadBalance { upstream }) => Some(upstream.clone()),
            _ => None,
        };
        assert_eq!(upstream("/index.html").as_deref(), Some("root"));
        assert_eq!(upstream("/api/users").as_deref(), Some("api"));
        assert_eq!(upstream("/api/admin/keys").as_deref(), Some("admin"));
        assert_eq!(upstream("/api/administrator").as_deref(), Some("api"));
    }

    #[test]
    fn no_match_without_root_location() {
        let table = LocationTable::new(vec![lb("/api/", "api")]);
        assert!(table.resolve("/other").is_none());
    }

    #[test]
    fn fingerprint_ignores_declaration_order() {
        let a = LocationTable::new(vec![lb("/", "web"), lb("/api/", "api")]);
        let b = LocationTable::new(vec![lb("/api/", "api"), lb("/", "web")]);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = LocationTable::new(vec![lb("/", "web"), lb("/api/", "other")]);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
