// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content store: one immutable object per (digest, kind).
//
// Objects live directly in the archive directory as `<digest>.txt` or
// `<digest>.bin`.  Writes go through a temporary file in the same directory
// that is then linked into place without clobbering, so concurrent writers of
// the same digest cannot interleave and a reader never sees a half-written
// body.

use std::io::Write;
use std::path::{Path, PathBuf};

use snippetd_core::error::{Result, SnippetdError};
use snippetd_core::types::ArchiveKind;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The object did not exist and has been written.
    Created,
    /// An object with this address already existed and was left untouched.
    AlreadyPresent,
}

/// Storage backend for archived bodies.
///
/// `put_if_absent` must be atomic: of several concurrent callers with the same
/// address exactly one observes `Created`.
pub trait ContentStore: Send + Sync {
    fn put_if_absent(&self, digest: &str, kind: ArchiveKind, body: &[u8]) -> Result<PutOutcome>;

    /// Load a stored body.  `Ok(None)` when no such object exists.
    fn get(&self, digest: &str, kind: ArchiveKind) -> Result<Option<Vec<u8>>>;

    fn contains(&self, digest: &str, kind: ArchiveKind) -> bool;
}

/// Filesystem-backed content store.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Use `root` as the object directory.  The directory must exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the object for `(digest, kind)`.
    pub fn object_path(&self, digest: &str, kind: ArchiveKind) -> PathBuf {
        self.root.join(format!("{digest}.{}", kind.extension()))
    }
}

fn store_err(context: &str, path: &Path, e: std::io::Error) -> SnippetdError {
    SnippetdError::ArchiveIo(format!("{context} {}: {e}", path.display()))
}

impl ContentStore for FsStore {
    #[instrument(skip(self, body), fields(len = body.len()))]
    fn put_if_absent(&self, digest: &str, kind: ArchiveKind, body: &[u8]) -> Result<PutOutcome> {
        let path = self.object_path(digest, kind);
        if path.exists() {
            debug!(path = %path.display(), "object already stored");
            return Ok(PutOutcome::AlreadyPresent);
        }

        let mut tmp = NamedTempFile::new_in(&self.root)
            .map_err(|e| store_err("create temp file in", &self.root, e))?;
        tmp.write_all(body)
            .map_err(|e| store_err("write temp file for", &path, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| store_err("sync temp file for", &path, e))?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                debug!(path = %path.display(), "object stored");
                Ok(PutOutcome::Created)
            }
            // Lost a race against another writer of the same body.
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(PutOutcome::AlreadyPresent)
            }
            Err(e) => Err(store_err("persist", &path, e.error)),
        }
    }

    fn get(&self, digest: &str, kind: ArchiveKind) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(digest, kind);
        match std::fs::read(&path) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_err("read", &path, e)),
        }
    }

    fn contains(&self, digest: &str, kind: ArchiveKind) -> bool {
        self.object_path(digest, kind).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const DIGEST: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn first_put_creates_second_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        assert_eq!(
            store.put_if_absent(DIGEST, ArchiveKind::Text, b"hello").unwrap(),
            PutOutcome::Created
        );
        assert_eq!(
            store.put_if_absent(DIGEST, ArchiveKind::Text, b"overwrite?").unwrap(),
            PutOutcome::AlreadyPresent
        );
        assert_eq!(
            store.get(DIGEST, ArchiveKind::Text).unwrap().as_deref(),
            Some(&b"hello"[..])
        );
    }

    #[test]
    fn kinds_are_separate_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store.put_if_absent(DIGEST, ArchiveKind::Raw, b"hello").unwrap();
        assert!(store.contains(DIGEST, ArchiveKind::Raw));
        assert!(!store.contains(DIGEST, ArchiveKind::Text));
        assert!(dir.path().join(format!("{DIGEST}.bin")).is_file());
    }

    #[test]
    fn missing_object_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.get(DIGEST, ArchiveKind::Text).unwrap().is_none());
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.put_if_absent(DIGEST, ArchiveKind::Text, b"hello").unwrap();
        store.put_if_absent(DIGEST, ArchiveKind::Text, b"hello").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn concurrent_puts_create_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::new(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .put_if_absent(DIGEST, ArchiveKind::Text, b"hello")
                        .unwrap()
                })
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == PutOutcome::Created)
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn missing_root_is_an_archive_error() {
        let store = FsStore::new("/nonexistent/snippetd-archive");
        let err = store
            .put_if_absent(DIGEST, ArchiveKind::Text, b"hello")
            .unwrap_err();
        assert!(matches!(err, SnippetdError::ArchiveIo(_)));
    }
}
