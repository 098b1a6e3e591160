//! In-memory [`ContentStore`] for dry runs and tests.
//!
//! Enforces the same optimistic concurrency rules as GitHub: updating or
//! deleting an existing path requires its current sha, and a stale or
//! missing sha is refused. Shas are git blob hashes computed with SHA-256,
//! so identical content always yields the same sha.
//!
//! Tests can inject per-path failures and latency, and read back call
//! counts and the peak number of overlapping requests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{ContentStore, DirEntry, EntryKind, PutOutcome, RemoteFile, StoreError};

struct StoredFile {
    bytes: Vec<u8>,
    sha: String,
}

/// Number of calls made against a [`MemoryStore`], per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub put: usize,
    pub delete: usize,
    pub list: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.get + self.put + self.delete + self.list
    }
}

#[derive(Default)]
struct Counters {
    get: AtomicUsize,
    put: AtomicUsize,
    delete: AtomicUsize,
    list: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// In-memory content store.
#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, StoredFile>>,
    put_failures: RwLock<HashMap<String, u16>>,
    latency: RwLock<Option<Duration>>,
    counters: Counters,
}

fn blob_sha(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("blob {}\0", bytes.len()).as_bytes());
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn rejected(status: u16, body: &str) -> StoreError {
    StoreError::Status {
        status,
        body: body.to_string(),
    }
}

/// Tracks one request from start to finish for the in-flight counters.
struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `path` with `bytes` without counting a call.
    pub fn insert(&self, path: &str, bytes: &[u8]) {
        self.files.write().unwrap().insert(
            path.to_string(),
            StoredFile {
                bytes: bytes.to_vec(),
                sha: blob_sha(bytes),
            },
        );
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().unwrap().get(path).map(|f| f.bytes.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.read().unwrap().keys().cloned().collect()
    }

    /// Make every `put` to `path` fail with HTTP `status`.
    pub fn fail_puts_to(&self, path: &str, status: u16) {
        self.put_failures
            .write()
            .unwrap()
            .insert(path.to_string(), status);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write().unwrap() = Some(latency);
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            get: self.counters.get.load(Ordering::SeqCst),
            put: self.counters.put.load(Ordering::SeqCst),
            delete: self.counters.delete.load(Ordering::SeqCst),
            list: self.counters.list.load(Ordering::SeqCst),
        }
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.read().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<RemoteFile>, StoreError> {
        self.counters.get.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.counters);
        self.simulate_latency().await;

        let files = self.files.read().unwrap();
        Ok(files.get(path).map(|f| RemoteFile {
            path: path.to_string(),
            sha: f.sha.clone(),
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        _message: &str,
        sha: Option<&str>,
    ) -> Result<PutOutcome, StoreError> {
        self.counters.put.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.counters);
        self.simulate_latency().await;

        let injected = self.put_failures.read().unwrap().get(path).copied();
        if let Some(status) = injected {
            return Err(rejected(status, "injected failure"));
        }

        let mut files = self.files.write().unwrap();
        let outcome = match (files.get(path), sha) {
            (None, None) => PutOutcome::Created,
            (None, Some(_)) => return Err(rejected(404, "Not Found")),
            (Some(_), None) => return Err(rejected(422, "\"sha\" wasn't supplied.")),
            (Some(current), Some(sha)) if current.sha != sha => {
                return Err(rejected(409, "sha does not match"))
            }
            (Some(_), Some(_)) => PutOutcome::Updated,
        };

        files.insert(
            path.to_string(),
            StoredFile {
                bytes: content.to_vec(),
                sha: blob_sha(content),
            },
        );
        Ok(outcome)
    }

    async fn delete(&self, path: &str, _message: &str, sha: &str) -> Result<(), StoreError> {
        self.counters.delete.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.counters);
        self.simulate_latency().await;

        let mut files = self.files.write().unwrap();
        match files.get(path) {
            None => Err(rejected(404, "Not Found")),
            Some(current) if current.sha != sha => Err(rejected(409, "sha does not match")),
            Some(_) => {
                files.remove(path);
                Ok(())
            }
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>, StoreError> {
        self.counters.list.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.counters);
        self.simulate_latency().await;

        let prefix = match dir.trim_matches('/') {
            "" => String::new(),
            d => format!("{}/", d),
        };

        let files = self.files.read().unwrap();
        let mut children: BTreeMap<String, EntryKind> = BTreeMap::new();
        for key in files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    children.insert(child.to_string(), EntryKind::Dir);
                }
                None => {
                    children.entry(rest.to_string()).or_insert(EntryKind::File);
                }
            }
        }

        Ok(children
            .into_iter()
            .map(|(name, kind)| DirEntry {
                path: format!("{}{}", prefix, name),
                name,
                kind,
            })
            .collect())
    }
}
