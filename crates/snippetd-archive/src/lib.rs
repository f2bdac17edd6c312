// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// snippetd-archive: durable, content-addressed storage for printed snippets.
//
// Bodies are stored once per SHA-256 digest; every archive event is appended
// to a per-digest CSV ledger.  Reprints resolve a digest back into a snippet
// that can rejoin the print queue.

pub mod archive;
pub mod integrity;
pub mod ledger;
pub mod store;

pub use archive::{ArchiveOutcome, ContentArchive};
pub use integrity::{digest_hex, normalize_digest, verify_digest};
pub use ledger::{Ledger, LedgerRow};
pub use store::{ContentStore, FsStore, PutOutcome};
