//! Turns an uploaded document or ZIP archive into a [`SiteBundle`].
//!
//! A `.html` upload becomes a one-entry bundle at
//! [`ENTRY_POINT`](crate::models::ENTRY_POINT). A `.zip`
//! upload is unpacked into a private temporary directory, walked, and every
//! regular file becomes a bundle entry keyed by its `/`-separated path
//! inside the archive. The temporary directory is removed when
//! [`Materializer::materialize`] returns, whatever the outcome.
//!
//! Archive entry names are normalized before anything touches the disk.
//! A name that climbs out of the extraction root (`../x`, `/etc/passwd`,
//! `C:\x`) rejects the whole upload.

use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::config::ArchiveConfig;
use crate::models::{BundleEntry, SiteBundle};

/// Why an upload could not be turned into a bundle.
///
/// Every variant is raised before any remote call is made.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("unsupported file type '{0}': send a .html file or a .zip archive")]
    UnsupportedFormat(String),
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),
    #[error("index.html missing at the top level of the upload")]
    MissingEntryPoint,
    #[error("archive entry '{0}' points outside the site folder")]
    PathTraversalRejected(String),
    #[error("duplicate path in bundle: {0}")]
    DuplicatePath(String),
    #[error("archive too large: {0}")]
    ArchiveTooLarge(String),
    #[error("extraction failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    Document,
    Archive,
}

fn upload_kind(file_name: &str) -> Option<UploadKind> {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".html") {
        Some(UploadKind::Document)
    } else if lower.ends_with(".zip") {
        Some(UploadKind::Archive)
    } else {
        None
    }
}

/// Materializes uploads under the configured archive limits.
#[derive(Debug, Clone)]
pub struct Materializer {
    limits: ArchiveConfig,
    scratch_dir: Option<PathBuf>,
}

impl Materializer {
    pub fn new(limits: ArchiveConfig) -> Self {
        Self {
            limits,
            scratch_dir: None,
        }
    }

    /// Create extraction directories under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn materialize(&self, bytes: &[u8], file_name: &str) -> Result<SiteBundle, MaterializeError> {
        match upload_kind(file_name) {
            Some(UploadKind::Document) => {
                tracing::debug!(file_name, bytes = bytes.len(), "materializing single document");
                Ok(SiteBundle::single(bytes.to_vec()))
            }
            Some(UploadKind::Archive) => self.materialize_archive(bytes, file_name),
            None => Err(MaterializeError::UnsupportedFormat(file_name.to_string())),
        }
    }

    fn materialize_archive(
        &self,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<SiteBundle, MaterializeError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| MaterializeError::CorruptArchive(e.to_string()))?;

        if archive.len() > self.limits.max_entries {
            return Err(MaterializeError::ArchiveTooLarge(format!(
                "{} entries (limit {})",
                archive.len(),
                self.limits.max_entries
            )));
        }

        let scratch = match &self.scratch_dir {
            Some(dir) => tempfile::Builder::new()
                .prefix("page-relay-")
                .tempdir_in(dir)?,
            None => tempfile::Builder::new().prefix("page-relay-").tempdir()?,
        };
        let root = scratch.path();

        let mut budget = self.limits.max_total_bytes;
        let mut seen = HashSet::new();
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| MaterializeError::CorruptArchive(e.to_string()))?;
            let name = entry.name().to_string();

            // Validate every name, directories included, before writing anything.
            let Some(relative) = normalize_entry_path(&name)? else {
                continue;
            };
            if entry.is_dir() {
                continue;
            }
            if !seen.insert(relative.clone()) {
                return Err(MaterializeError::DuplicatePath(relative));
            }

            let mut data = Vec::new();
            entry
                .by_ref()
                .take(budget.saturating_add(1))
                .read_to_end(&mut data)
                .map_err(|e| MaterializeError::CorruptArchive(format!("{}: {}", name, e)))?;
            let written = data.len() as u64;
            if written > budget {
                return Err(MaterializeError::ArchiveTooLarge(format!(
                    "more than {} bytes once decompressed",
                    self.limits.max_total_bytes
                )));
            }
            budget -= written;

            let dest = root.join(&relative);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&dest, &data)?;
        }

        let entries = collect_tree(root)?;
        tracing::debug!(file_name, entries = entries.len(), "archive unpacked");

        SiteBundle::new(entries)
    }
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new(ArchiveConfig::default())
    }
}

/// Materialize with the default archive limits.
pub fn materialize(bytes: &[u8], file_name: &str) -> Result<SiteBundle, MaterializeError> {
    Materializer::default().materialize(bytes, file_name)
}

/// Normalize an archive entry name to a `/`-separated relative path.
///
/// Returns `Ok(None)` for names that resolve to the root itself (`./`).
/// `..` is allowed only while it stays inside the root.
pub fn normalize_entry_path(name: &str) -> Result<Option<String>, MaterializeError> {
    let unified = name.replace('\\', "/");
    let rejected = || MaterializeError::PathTraversalRejected(name.to_string());

    if unified.starts_with('/') {
        return Err(rejected());
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(rejected());
                }
            }
            // Drive prefixes (`C:`) and alternate data streams, wherever they appear.
            s if s.contains(':') => return Err(rejected()),
            s => parts.push(s),
        }
    }

    if parts.is_empty() {
        return Ok(None);
    }

    let relative = parts.join("/");
    if !Path::new(&relative)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(rejected());
    }
    Ok(Some(relative))
}

fn collect_tree(root: &Path) -> Result<Vec<BundleEntry>, MaterializeError> {
    let mut entries = Vec::new();

    for item in WalkDir::new(root).follow_links(false) {
        let item = item.map_err(|e| MaterializeError::Io(e.into()))?;
        if !item.file_type().is_file() {
            continue;
        }

        let path = item.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        entries.push(BundleEntry::new(rel_str, std::fs::read(path)?));
    }

    // Sort for deterministic ordering
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ENTRY_POINT;
    use std::io::Write;

    fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, data) in files {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(data).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn html_upload_maps_to_entry_point() {
        for name in ["index.html", "landing.html", "PAGE.HTML"] {
            let bundle = materialize(b"<h1>hi</h1>", name).unwrap();
            assert_eq!(bundle.len(), 1);
            assert_eq!(bundle.entries()[0].path, ENTRY_POINT);
            assert_eq!(bundle.entries()[0].bytes, b"<h1>hi</h1>");
        }
    }

    #[test]
    fn unsupported_extension_rejected() {
        let err = materialize(b"hello", "notes.txt").unwrap_err();
        assert!(matches!(err, MaterializeError::UnsupportedFormat(n) if n == "notes.txt"));
    }

    #[test]
    fn corrupt_zip_rejected() {
        let err = materialize(b"not a zip", "site.zip").unwrap_err();
        assert!(matches!(err, MaterializeError::CorruptArchive(_)));
    }

    #[test]
    fn archive_tree_becomes_bundle() {
        let data = zip_of(&[
            ("index.html", b"<html></html>"),
            ("css/site.css", b"body{}"),
            ("js/app.js", b"console.log(1)"),
        ]);
        let bundle = materialize(&data, "site.zip").unwrap();
        let paths: Vec<&str> = bundle.paths().collect();
        assert_eq!(paths, vec!["css/site.css", "index.html", "js/app.js"]);
    }

    #[test]
    fn nested_entry_point_is_not_enough() {
        let data = zip_of(&[("site/index.html", b"<html></html>")]);
        let err = materialize(&data, "site.zip").unwrap_err();
        assert!(matches!(err, MaterializeError::MissingEntryPoint));
    }

    #[test]
    fn parent_escape_rejected() {
        let data = zip_of(&[
            ("index.html", b"<html></html>"),
            ("../../etc/passwd", b"root:x:0:0"),
        ]);
        let err = materialize(&data, "site.zip").unwrap_err();
        assert!(
            matches!(err, MaterializeError::PathTraversalRejected(ref n) if n == "../../etc/passwd"),
            "got {:?}",
            err
        );
    }

    #[test]
    fn normalize_entry_path_cases() {
        assert_eq!(normalize_entry_path("a/b.css").unwrap().as_deref(), Some("a/b.css"));
        assert_eq!(normalize_entry_path("./index.html").unwrap().as_deref(), Some("index.html"));
        assert_eq!(normalize_entry_path("a/../index.html").unwrap().as_deref(), Some("index.html"));
        assert_eq!(normalize_entry_path("a\\b.js").unwrap().as_deref(), Some("a/b.js"));
        assert_eq!(normalize_entry_path("./").unwrap(), None);
        assert!(normalize_entry_path("../x").is_err());
        assert!(normalize_entry_path("a/../../x").is_err());
        assert!(normalize_entry_path("/etc/passwd").is_err());
        assert!(normalize_entry_path("C:\\windows\\x").is_err());
        assert!(normalize_entry_path("./C:/evil.html").is_err());
        assert!(normalize_entry_path("a/../C:/evil.html").is_err());
        assert!(normalize_entry_path("css/site.css:stream").is_err());
    }

    #[test]
    fn drive_prefix_behind_dot_segments_rejects_archive() {
        let data = zip_of(&[("index.html", b"a"), ("a/../C:/evil.html", b"x")]);
        let err = materialize(&data, "site.zip").unwrap_err();
        assert!(
            matches!(err, MaterializeError::PathTraversalRejected(ref n) if n == "a/../C:/evil.html")
        );
    }

    #[test]
    fn directory_entries_are_skipped() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            zip.add_directory("assets/", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.start_file("index.html", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<html></html>").unwrap();
            zip.finish().unwrap();
        }
        let bundle = materialize(&buf, "site.zip").unwrap();
        assert_eq!(bundle.paths().collect::<Vec<_>>(), vec!["index.html"]);
    }

    #[test]
    fn aliased_entry_names_are_duplicates() {
        let data = zip_of(&[("index.html", b"a"), ("css/x.css", b"1"), ("css/./x.css", b"2")]);
        let err = materialize(&data, "site.zip").unwrap_err();
        assert!(matches!(err, MaterializeError::DuplicatePath(ref p) if p == "css/x.css"));
    }

    #[test]
    fn entry_count_limit_enforced() {
        let data = zip_of(&[("index.html", b"a"), ("b.txt", b"b"), ("c.txt", b"c")]);
        let m = Materializer::new(ArchiveConfig {
            max_entries: 2,
            ..ArchiveConfig::default()
        });
        let err = m.materialize(&data, "site.zip").unwrap_err();
        assert!(matches!(err, MaterializeError::ArchiveTooLarge(_)));
    }

    #[test]
    fn decompressed_size_limit_enforced() {
        let big = vec![b'x'; 4096];
        let data = zip_of(&[("index.html", &big)]);
        let m = Materializer::new(ArchiveConfig {
            max_total_bytes: 1024,
            ..ArchiveConfig::default()
        });
        let err = m.materialize(&data, "site.zip").unwrap_err();
        assert!(matches!(err, MaterializeError::ArchiveTooLarge(_)));
    }

    #[test]
    fn scratch_space_released_on_success_and_failure() {
        let scratch = tempfile::TempDir::new().unwrap();
        let m = Materializer::default().with_scratch_dir(scratch.path());

        let ok = zip_of(&[("index.html", b"<html></html>"), ("a/b.css", b"x")]);
        m.materialize(&ok, "ok.zip").unwrap();
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);

        let missing = zip_of(&[("about.html", b"x")]);
        assert!(m.materialize(&missing, "missing.zip").is_err());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);

        let escaping = zip_of(&[("index.html", b"x"), ("../evil", b"x")]);
        assert!(m.materialize(&escaping, "evil.zip").is_err());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
        assert!(!scratch.path().parent().unwrap().join("evil").exists());
    }
}
