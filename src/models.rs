//! Core data models used throughout page-relay.
//!
//! These types represent the site bundles, namespaces, and remote file
//! records that flow from the materializer to the publisher.

use std::collections::HashSet;
use std::fmt;

use crate::materialize::MaterializeError;

/// Relative path of the document every published site must contain.
pub const ENTRY_POINT: &str = "index.html";

/// One file of a site: a `/`-separated relative path and its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl BundleEntry {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }
}

/// The materialized file set of one user's site at upload time.
///
/// Always contains [`ENTRY_POINT`] and never two entries with the same path.
#[derive(Debug, Clone)]
pub struct SiteBundle {
    entries: Vec<BundleEntry>,
    document: bool,
}

impl SiteBundle {
    pub fn new(entries: Vec<BundleEntry>) -> Result<Self, MaterializeError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.path.as_str()) {
                return Err(MaterializeError::DuplicatePath(entry.path.clone()));
            }
        }
        if !seen.contains(ENTRY_POINT) {
            return Err(MaterializeError::MissingEntryPoint);
        }
        Ok(Self {
            entries,
            document: false,
        })
    }

    /// Bundle holding a single document at the entry-point path.
    pub fn single(bytes: Vec<u8>) -> Self {
        Self {
            entries: vec![BundleEntry::new(ENTRY_POINT, bytes)],
            document: true,
        }
    }

    /// Built from a single uploaded document rather than an archive.
    pub fn is_document(&self) -> bool {
        self.document
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<BundleEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.path.as_str())
    }
}

/// Per-user folder in the remote store (`user_{identity}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub const PREFIX: &'static str = "user_";

    pub fn for_user(identity: i64) -> Self {
        Self(format!("{}{}", Self::PREFIX, identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store path of `relative_path` inside this namespace.
    pub fn join(&self, relative_path: &str) -> String {
        format!("{}/{}", self.0, relative_path.trim_start_matches('/'))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The remote store's view of one published path.
///
/// Fetched fresh for every operation; the `sha` goes stale as soon as
/// anything else writes the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRecord {
    pub namespace: Namespace,
    pub path: String,
    pub sha: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_is_derived_from_identity() {
        let ns = Namespace::for_user(42);
        assert_eq!(ns.as_str(), "user_42");
        assert_eq!(ns.join("css/site.css"), "user_42/css/site.css");
        assert_eq!(ns.join("/index.html"), "user_42/index.html");
    }

    #[test]
    fn bundle_requires_entry_point() {
        let err = SiteBundle::new(vec![BundleEntry::new("about.html", b"x".to_vec())]).unwrap_err();
        assert!(matches!(err, MaterializeError::MissingEntryPoint));
    }

    #[test]
    fn bundle_rejects_duplicate_paths() {
        let err = SiteBundle::new(vec![
            BundleEntry::new("index.html", b"a".to_vec()),
            BundleEntry::new("index.html", b"b".to_vec()),
        ])
        .unwrap_err();
        assert!(matches!(err, MaterializeError::DuplicatePath(p) if p == "index.html"));
    }

    #[test]
    fn single_bundle_maps_to_entry_point() {
        let bundle = SiteBundle::single(b"<h1>hi</h1>".to_vec());
        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.paths().collect::<Vec<_>>(), vec![ENTRY_POINT]);
        assert!(bundle.is_document());

        let archived =
            SiteBundle::new(vec![BundleEntry::new(ENTRY_POINT, b"x".to_vec())]).unwrap();
        assert!(!archived.is_document());
    }
}
