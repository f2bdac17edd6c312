// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content archive: deduplicated body store plus ledger, and the reprint
// resolver that turns a digest back into a printable snippet.

use std::path::{Path, PathBuf};

use chrono::Utc;
use snippetd_core::error::{Result, SnippetdError};
use snippetd_core::types::{ArchiveKind, Snippet, SnippetIds};
use tracing::{debug, info, instrument};

use crate::integrity::{digest_hex, normalize_digest, verify_digest};
use crate::ledger::{Ledger, LedgerRow};
use crate::store::{ContentStore, FsStore, PutOutcome};

/// What `archive` did with a snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub digest: String,
    pub kind: ArchiveKind,
    /// `true` on first sight of this digest, `false` for a duplicate.
    pub newly_stored: bool,
}

/// Archive rooted at one directory.
pub struct ContentArchive {
    root: PathBuf,
    store: Box<dyn ContentStore>,
    ledger: Ledger,
}

impl std::fmt::Debug for ContentArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentArchive")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ContentArchive {
    /// Open (creating if needed) a filesystem archive at `root`.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            SnippetdError::ArchiveIo(format!("create archive dir {}: {e}", root.display()))
        })?;
        let store = FsStore::new(&root);
        info!("snippet archive opened");
        Ok(Self::with_store(root, Box::new(store)))
    }

    /// Use a custom content store; the ledger still lives under `root`.
    pub fn with_store(root: impl Into<PathBuf>, store: Box<dyn ContentStore>) -> Self {
        let root = root.into();
        Self {
            ledger: Ledger::new(&root),
            root,
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store the snippet body (once per digest) and record the event.
    ///
    /// The ledger row is appended whether or not the body was new.
    #[instrument(skip(self, snippet), fields(snippet_id = %snippet.id))]
    pub fn archive(&self, snippet: &Snippet) -> Result<ArchiveOutcome> {
        let digest = digest_hex(&snippet.body);
        let kind = snippet.archive_kind();
        debug!(%digest, ?kind, "archiving snippet");

        let newly_stored = match self.store.put_if_absent(&digest, kind, &snippet.body)? {
            PutOutcome::Created => {
                info!(%digest, ?kind, "new snippet stored");
                true
            }
            PutOutcome::AlreadyPresent => false,
        };

        self.ledger
            .append(&digest, &LedgerRow::for_snippet(snippet))?;

        Ok(ArchiveOutcome {
            digest,
            kind,
            newly_stored,
        })
    }

    /// Kind of the stored object for `digest`, text taking precedence.
    pub fn contains(&self, digest: &str) -> Result<Option<ArchiveKind>> {
        let digest = normalize_digest(digest)?;
        Ok(ArchiveKind::LOOKUP_ORDER
            .into_iter()
            .find(|kind| self.store.contains(&digest, *kind)))
    }

    /// Ledger rows for `digest`, oldest first.
    pub fn ledger(&self, digest: &str) -> Result<Vec<LedgerRow>> {
        let digest = normalize_digest(digest)?;
        self.ledger.rows(&digest)
    }

    /// Rebuild a snippet from archived bytes, ready to be queued again.
    ///
    /// The text object wins over the raw one when both exist.  A stored body
    /// that no longer matches its digest is refused.  The new snippet gets a
    /// fresh id and timestamp and is marked as a reprint.
    #[instrument(skip(self, ids))]
    pub fn resolve_reprint(&self, digest: &str, source: &str, ids: &SnippetIds) -> Result<Snippet> {
        let digest = normalize_digest(digest)?;

        for kind in ArchiveKind::LOOKUP_ORDER {
            if let Some(body) = self.store.get(&digest, kind)? {
                verify_digest(&body, &digest)?;
                let snippet = Snippet {
                    id: ids.next(),
                    source: source.to_owned(),
                    timestamp: Utc::now(),
                    body,
                    is_raw: kind == ArchiveKind::Raw,
                    is_reprint: true,
                };
                info!(%digest, ?kind, snippet_id = %snippet.id, "reprint resolved");
                return Ok(snippet);
            }
        }

        debug!(%digest, "reprint digest not archived");
        Err(SnippetdError::NotFound(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snippetd_core::types::{SizeClass, SnippetRequest};

    fn snippet(ids: &SnippetIds, body: &[u8], is_raw: bool) -> Snippet {
        SnippetRequest::new("10.1.2.3", body.to_vec(), is_raw, SizeClass::Image)
            .unwrap()
            .into_snippet(ids)
    }

    fn count_files_with_ext(dir: &Path, ext: &str) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|x| x == ext)
            })
            .count()
    }

    #[test]
    fn archiving_twice_stores_once_and_logs_twice() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ContentArchive::open(dir.path()).unwrap();
        let ids = SnippetIds::new();

        let first = archive.archive(&snippet(&ids, b"coffee x2", false)).unwrap();
        let second = archive.archive(&snippet(&ids, b"coffee x2", false)).unwrap();

        assert!(first.newly_stored);
        assert!(!second.newly_stored);
        assert_eq!(first.digest, second.digest);
        assert_eq!(count_files_with_ext(dir.path(), "txt"), 1);

        let rows = archive.ledger(&first.digest).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].snippet_id.0, 1);
        assert_eq!(rows[1].snippet_id.0, 2);
    }

    #[test]
    fn raw_snippets_are_stored_as_bin() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ContentArchive::open(dir.path()).unwrap();
        let ids = SnippetIds::new();

        let outcome = archive.archive(&snippet(&ids, b"\x1b\x21\x10big", true)).unwrap();
        assert_eq!(outcome.kind, ArchiveKind::Raw);
        assert!(dir.path().join(format!("{}.bin", outcome.digest)).is_file());
        assert_eq!(archive.contains(&outcome.digest).unwrap(), Some(ArchiveKind::Raw));
    }

    #[test]
    fn reprint_round_trip_preserves_body_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ContentArchive::open(dir.path()).unwrap();
        let ids = SnippetIds::new();
        let body: Vec<u8> = (0..=255u8).collect();
        let original = snippet(&ids, &body, true);
        let outcome = archive.archive(&original).unwrap();

        let reprint = archive
            .resolve_reprint(&outcome.digest, "10.9.9.9", &ids)
            .unwrap();

        assert_eq!(reprint.body, body);
        assert!(reprint.is_reprint);
        assert!(reprint.is_raw);
        assert_eq!(reprint.source, "10.9.9.9");
        assert!(reprint.id > original.id);
    }

    #[test]
    fn text_object_wins_over_raw() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ContentArchive::open(dir.path()).unwrap();
        let ids = SnippetIds::new();

        let raw = archive.archive(&snippet(&ids, b"same bytes", true)).unwrap();
        let text = archive.archive(&snippet(&ids, b"same bytes", false)).unwrap();
        assert_eq!(raw.digest, text.digest);

        let reprint = archive.resolve_reprint(&raw.digest, "h", &ids).unwrap();
        assert!(!reprint.is_raw);
    }

    #[test]
    fn unknown_digest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ContentArchive::open(dir.path()).unwrap();
        let ids = SnippetIds::new();

        let err = archive
            .resolve_reprint(&digest_hex(b"never archived"), "h", &ids)
            .unwrap_err();
        assert!(matches!(err, SnippetdError::NotFound(_)));
        assert_eq!(ids.last(), 0, "no id is consumed by a failed lookup");
    }

    #[test]
    fn corrupted_object_is_not_reprinted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ContentArchive::open(dir.path()).unwrap();
        let ids = SnippetIds::new();
        let outcome = archive.archive(&snippet(&ids, b"first print", false)).unwrap();

        std::fs::write(dir.path().join(format!("{}.txt", outcome.digest)), b"tampered").unwrap();
        let err = archive
            .resolve_reprint(&outcome.digest, "h", &ids)
            .unwrap_err();
        assert!(matches!(err, SnippetdError::ArchiveIo(_)));
    }

    #[test]
    fn malformed_digest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ContentArchive::open(dir.path()).unwrap();
        let err = archive
            .resolve_reprint("../secrets", "h", &SnippetIds::new())
            .unwrap_err();
        assert!(matches!(err, SnippetdError::InvalidDigest(_)));
    }

    #[test]
    fn uppercase_digest_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ContentArchive::open(dir.path()).unwrap();
        let ids = SnippetIds::new();
        let outcome = archive.archive(&snippet(&ids, b"hi", false)).unwrap();

        let reprint = archive
            .resolve_reprint(&outcome.digest.to_ascii_uppercase(), "h", &ids)
            .unwrap();
        assert_eq!(reprint.body, b"hi");
    }
}
