//! Mirrors a [`SiteBundle`] onto a namespace of the remote content store.
//!
//! Each bundle entry is reconciled on its own:
//!
//! 1. Fetch the remote record at `{namespace}/{path}`. Not-found means "create".
//! 2. `put` the bytes, passing the record's sha when one existed.
//! 3. Record `Created`, `Updated`, or `Failed` for the path.
//!
//! A failed entry never stops the others, and nothing is rolled back:
//! **a bundle publish is not atomic**. The store has no multi-file
//! transaction, so a caller may observe a partially updated site when
//! [`PublishResult::PartiallySucceeded`] comes back.
//!
//! Entries run concurrently up to `publish.concurrency`. Bundle paths are
//! unique, so two in-flight requests never target the same store path and
//! never race on its sha. Every entry is bounded by `publish.timeout_secs`;
//! a timeout fails that entry and is not retried.
//!
//! # Cancellation
//!
//! When the [`CancellationToken`] fires, entries already dispatched run to
//! completion and every entry not yet dispatched is reported as
//! [`PublishError::Cancelled`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::models::{BundleEntry, Namespace, RemoteFileRecord, SiteBundle, ENTRY_POINT};
use crate::store::{ContentStore, EntryKind, PutOutcome, StoreError};

/// Commit message used when removing a site.
pub const DELETE_MESSAGE: &str = "Delete website";

/// Commit message for a single-document upload.
pub const DOCUMENT_MESSAGE: &str = "Upload HTML";

fn commit_message(document: bool, path: &str) -> String {
    if document {
        DOCUMENT_MESSAGE.to_string()
    } else {
        format!("Upload {}", path)
    }
}

/// Why a single path did not make it to the store.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("{path}: {source}")]
    PerPathFailure {
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("{path}: timed out after {}s", .after.as_secs())]
    TimedOut { path: String, after: Duration },
    #[error("{path}: not sent, publish was cancelled")]
    Cancelled { path: String },
    #[error("{path}: publish task aborted")]
    Aborted { path: String },
}

impl PublishError {
    pub fn path(&self) -> &str {
        match self {
            PublishError::PerPathFailure { path, .. }
            | PublishError::TimedOut { path, .. }
            | PublishError::Cancelled { path }
            | PublishError::Aborted { path } => path,
        }
    }
}

/// Failure of [`Publisher::delete_path`].
#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("no published file at {0}")]
    NotFound(String),
    #[error("remote store rejected the delete: {0}")]
    RemoteRejected(#[from] StoreError),
}

/// Terminal state of one bundle entry.
#[derive(Debug)]
pub enum EntryOutcome {
    Created,
    Updated,
    Failed(PublishError),
}

impl EntryOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, EntryOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct EntryReport {
    pub path: String,
    pub outcome: EntryOutcome,
}

/// Terminal state of a whole bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    AllSucceeded,
    PartiallySucceeded,
}

/// Outcome of [`Publisher::publish`], with one report per entry in bundle order.
#[derive(Debug)]
pub enum PublishResult {
    AllSucceeded {
        site_url: String,
        entries: Vec<EntryReport>,
    },
    PartiallySucceeded {
        entries: Vec<EntryReport>,
    },
}

impl PublishResult {
    pub fn state(&self) -> BundleState {
        match self {
            PublishResult::AllSucceeded { .. } => BundleState::AllSucceeded,
            PublishResult::PartiallySucceeded { .. } => BundleState::PartiallySucceeded,
        }
    }

    pub fn site_url(&self) -> Option<&str> {
        match self {
            PublishResult::AllSucceeded { site_url, .. } => Some(site_url),
            PublishResult::PartiallySucceeded { .. } => None,
        }
    }

    pub fn entries(&self) -> &[EntryReport] {
        match self {
            PublishResult::AllSucceeded { entries, .. }
            | PublishResult::PartiallySucceeded { entries } => entries,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &PublishError> {
        self.entries().iter().filter_map(|r| match &r.outcome {
            EntryOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }

    pub fn succeeded(&self) -> usize {
        self.entries()
            .iter()
            .filter(|r| r.outcome.is_success())
            .count()
    }
}

/// Publishes bundles and retires sites on one content store.
pub struct Publisher {
    store: Arc<dyn ContentStore>,
    pages_base: String,
    concurrency: usize,
    timeout: Duration,
}

impl Publisher {
    pub fn new(store: Arc<dyn ContentStore>, config: &Config) -> Self {
        Self {
            store,
            pages_base: config.github.pages_base(),
            concurrency: config.publish.concurrency.max(1),
            timeout: config.publish.timeout(),
        }
    }

    /// Public URL of the site served from `namespace`.
    pub fn site_url(&self, namespace: &Namespace) -> String {
        format!("{}/{}/", self.pages_base, namespace)
    }

    pub async fn publish(&self, namespace: &Namespace, bundle: SiteBundle) -> PublishResult {
        self.publish_with_cancel(namespace, bundle, CancellationToken::new())
            .await
    }

    pub async fn publish_with_cancel(
        &self,
        namespace: &Namespace,
        bundle: SiteBundle,
        cancel: CancellationToken,
    ) -> PublishResult {
        let document = bundle.is_document();
        let entries = bundle.into_entries();
        let total = entries.len();
        tracing::info!(%namespace, files = total, "publishing bundle");

        let paths: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();
        let mut outcomes: Vec<Option<EntryOutcome>> = (0..total).map(|_| None).collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (idx, entry) in entries.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                outcomes[idx] = Some(EntryOutcome::Failed(PublishError::Cancelled {
                    path: entry.path,
                }));
                continue;
            };

            let store = Arc::clone(&self.store);
            let namespace = namespace.clone();
            let timeout = self.timeout;
            let message = commit_message(document, &entry.path);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome =
                    publish_entry(store.as_ref(), &namespace, &entry, &message, timeout).await;
                (idx, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => tracing::error!(%namespace, "publish task failed: {}", e),
            }
        }

        let reports: Vec<EntryReport> = paths
            .into_iter()
            .zip(outcomes)
            .map(|(path, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    EntryOutcome::Failed(PublishError::Aborted { path: path.clone() })
                });
                EntryReport { path, outcome }
            })
            .collect();

        let failed = reports.iter().filter(|r| !r.outcome.is_success()).count();
        if failed == 0 {
            let site_url = self.site_url(namespace);
            tracing::info!(%namespace, files = total, %site_url, "bundle published");
            PublishResult::AllSucceeded {
                site_url,
                entries: reports,
            }
        } else {
            tracing::warn!(%namespace, files = total, failed, "bundle partially published");
            PublishResult::PartiallySucceeded { entries: reports }
        }
    }

    /// Current remote record for `relative_path`, fetched fresh.
    pub async fn fetch_record(
        &self,
        namespace: &Namespace,
        relative_path: &str,
    ) -> Result<Option<RemoteFileRecord>, StoreError> {
        lookup(self.store.as_ref(), namespace, relative_path).await
    }

    /// Delete one published file, using its current sha.
    pub async fn delete_path(
        &self,
        namespace: &Namespace,
        relative_path: &str,
    ) -> Result<(), DeleteError> {
        let record = self
            .fetch_record(namespace, relative_path)
            .await?
            .ok_or_else(|| DeleteError::NotFound(namespace.join(relative_path)))?;

        self.store
            .delete(&record.path, DELETE_MESSAGE, &record.sha)
            .await?;
        tracing::info!(%namespace, path = %relative_path, "deleted published file");
        Ok(())
    }

    /// Retire a site by deleting its entry point.
    ///
    /// Other files of an archive upload stay in the store; they are no
    /// longer reachable through the site root but are not removed.
    pub async fn remove_site(&self, namespace: &Namespace) -> Result<(), DeleteError> {
        self.delete_path(namespace, ENTRY_POINT).await
    }

    /// Names of all namespace folders present at the repository root.
    pub async fn list_sites(&self) -> Result<Vec<String>, StoreError> {
        let root = self.store.list("").await?;
        Ok(root
            .into_iter()
            .filter(|e| e.kind == EntryKind::Dir && e.name.starts_with(Namespace::PREFIX))
            .map(|e| e.name)
            .collect())
    }
}

async fn lookup(
    store: &dyn ContentStore,
    namespace: &Namespace,
    relative_path: &str,
) -> Result<Option<RemoteFileRecord>, StoreError> {
    let path = namespace.join(relative_path);
    Ok(store.get(&path).await?.map(|file| RemoteFileRecord {
        namespace: namespace.clone(),
        path,
        sha: file.sha,
    }))
}

async fn publish_entry(
    store: &dyn ContentStore,
    namespace: &Namespace,
    entry: &BundleEntry,
    message: &str,
    timeout: Duration,
) -> EntryOutcome {
    let work = async {
        let existing = lookup(store, namespace, &entry.path).await?;
        let sha = existing.as_ref().map(|r| r.sha.as_str());
        store
            .put(&namespace.join(&entry.path), &entry.bytes, message, sha)
            .await
    };

    let outcome = match tokio::time::timeout(timeout, work).await {
        Ok(Ok(PutOutcome::Created)) => EntryOutcome::Created,
        Ok(Ok(PutOutcome::Updated)) => EntryOutcome::Updated,
        Ok(Err(e)) if e.is_timeout() => EntryOutcome::Failed(PublishError::TimedOut {
            path: entry.path.clone(),
            after: timeout,
        }),
        Ok(Err(e)) => EntryOutcome::Failed(PublishError::PerPathFailure {
            path: entry.path.clone(),
            source: e,
        }),
        Err(_) => EntryOutcome::Failed(PublishError::TimedOut {
            path: entry.path.clone(),
            after: timeout,
        }),
    };

    match &outcome {
        EntryOutcome::Failed(e) => tracing::warn!(%namespace, "entry failed: {}", e),
        ok => tracing::debug!(%namespace, path = %entry.path, outcome = ?ok, "entry published"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn publisher(store: Arc<MemoryStore>) -> Publisher {
        Publisher::new(store, &Config::new("octocat", "hosting"))
    }

    #[test]
    fn site_url_matches_pages_layout() {
        let p = publisher(Arc::new(MemoryStore::new()));
        assert_eq!(
            p.site_url(&Namespace::for_user(42)),
            "https://octocat.github.io/hosting/user_42/"
        );
    }

    #[tokio::test]
    async fn single_entry_created_then_updated() {
        let store = Arc::new(MemoryStore::new());
        let p = publisher(store.clone());
        let ns = Namespace::for_user(7);

        let first = p.publish(&ns, SiteBundle::single(b"v1".to_vec())).await;
        assert!(matches!(first.entries()[0].outcome, EntryOutcome::Created));

        let second = p.publish(&ns, SiteBundle::single(b"v2".to_vec())).await;
        assert!(matches!(second.entries()[0].outcome, EntryOutcome::Updated));
        assert_eq!(store.contents("user_7/index.html").unwrap(), b"v2");
    }

    #[tokio::test]
    async fn delete_missing_issues_no_delete_call() {
        let store = Arc::new(MemoryStore::new());
        let p = publisher(store.clone());

        let err = p.remove_site(&Namespace::for_user(9)).await.unwrap_err();
        assert!(matches!(err, DeleteError::NotFound(ref path) if path == "user_9/index.html"));
        assert_eq!(store.calls().delete, 0);
        assert_eq!(store.calls().get, 1);
    }

    #[tokio::test]
    async fn list_sites_counts_user_folders_only() {
        let store = Arc::new(MemoryStore::new());
        store.insert("README.md", b"x");
        store.insert("assets/logo.png", b"x");
        store.insert("user_1/index.html", b"x");
        store.insert("user_2/index.html", b"x");
        let p = publisher(store);

        assert_eq!(p.list_sites().await.unwrap(), vec!["user_1", "user_2"]);
    }

    #[test]
    fn commit_messages_follow_upload_kind() {
        assert_eq!(commit_message(true, "index.html"), "Upload HTML");
        assert_eq!(commit_message(false, "css/site.css"), "Upload css/site.css");
    }

    #[test]
    fn publish_error_exposes_path() {
        let err = PublishError::TimedOut {
            path: "index.html".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.path(), "index.html");
        assert_eq!(err.to_string(), "index.html: timed out after 30s");
    }
}
