//! Remote content store abstraction.
//!
//! The [`ContentStore`] trait is the contract the publisher needs from a
//! path-addressed file store that hands out a per-path `sha` on read and
//! demands it back on update and delete (optimistic concurrency).
//!
//! | Implementation | Backend |
//! |----------------|---------|
//! | [`github::GithubStore`] | GitHub REST `contents` API |
//! | [`memory::MemoryStore`] | In-process map, used for dry runs and tests |
//!
//! Implementations must be `Send + Sync`; the publisher shares one store
//! across concurrently running entry tasks.

pub mod github;
pub mod memory;

use async_trait::async_trait;
use serde::Deserialize;

/// A stored file as returned by a `GET` on its path.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub sha: String,
}

/// Kind of a directory listing entry.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Submodule,
    #[serde(other)]
    Other,
}

/// One child of a listed directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// What a successful `put` did to the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Updated,
}

/// Failure talking to the content store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid GitHub API URL: {0}")]
    InvalidApiUrl(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Http(e) if e.is_timeout())
    }

    /// The store refused a write because the supplied sha was stale or missing.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Status { status: 409 | 422, .. })
    }

    /// Rate limiting and server-side errors; worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Status { status, .. } => *status == 429 || *status >= 500,
            StoreError::Http(e) => e.is_connect(),
            _ => false,
        }
    }
}

/// Path-addressed file store with per-path sha tokens.
///
/// Paths are `/`-separated and relative to the repository root.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch the record for `path`. A missing path is `Ok(None)`.
    async fn get(&self, path: &str) -> Result<Option<RemoteFile>, StoreError>;

    /// Create `path`, or update it when `sha` names the current version.
    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        sha: Option<&str>,
    ) -> Result<PutOutcome, StoreError>;

    /// Delete `path`; `sha` must name the current version.
    async fn delete(&self, path: &str, message: &str, sha: &str) -> Result<(), StoreError>;

    /// List the direct children of `dir` (`""` is the repository root).
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_entry_decodes_github_listing() {
        let json = serde_json::json!([
            { "name": "user_42", "path": "user_42", "sha": "abc", "type": "dir" },
            { "name": "README.md", "path": "README.md", "sha": "def", "type": "file" },
            { "name": "weird", "path": "weird", "sha": "0", "type": "something-new" }
        ]);
        let entries: Vec<DirEntry> = serde_json::from_value(json).unwrap();
        assert_eq!(entries[0].kind, EntryKind::Dir);
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[2].kind, EntryKind::Other);
    }

    #[test]
    fn transient_and_conflict_classification() {
        let rate_limited = StoreError::Status {
            status: 429,
            body: String::new(),
        };
        let server = StoreError::Status {
            status: 502,
            body: String::new(),
        };
        let stale = StoreError::Status {
            status: 409,
            body: String::new(),
        };
        assert!(rate_limited.is_transient());
        assert!(server.is_transient());
        assert!(!stale.is_transient());
        assert!(stale.is_conflict());
        assert!(!server.is_timeout());
    }
}
