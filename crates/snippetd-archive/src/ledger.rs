// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ledger: append-only CSV log of every archive event, one file per digest.
//
// Layout:
//   <digest>.csv
//     timestamp,source_ip,req_id,is_raw,is_reprint
//     2026-01-02T03:04:05+00:00,10.0.0.7,42,false,false
//
// Unlike the content store the ledger is never deduplicated: archiving the
// same body twice yields one object and two rows.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snippetd_core::error::{Result, SnippetdError};
use snippetd_core::types::{Snippet, SnippetId};
use tracing::{debug, instrument};

/// Header row written when a ledger file is created.
pub const LEDGER_HEADER: &str = "timestamp,source_ip,req_id,is_raw,is_reprint";

/// One archive event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub snippet_id: SnippetId,
    pub is_raw: bool,
    pub is_reprint: bool,
}

impl LedgerRow {
    pub fn for_snippet(snippet: &Snippet) -> Self {
        Self {
            timestamp: snippet.timestamp,
            source: snippet.source.clone(),
            snippet_id: snippet.id,
            is_raw: snippet.is_raw,
            is_reprint: snippet.is_reprint,
        }
    }

    fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{}\n",
            self.timestamp.to_rfc3339(),
            csv_field(&self.source),
            self.snippet_id,
            self.is_raw,
            self.is_reprint
        )
    }

    fn parse_csv_line(line: &str) -> std::result::Result<Self, String> {
        let fields = split_csv_line(line)?;
        let [timestamp, source, id, is_raw, is_reprint]: [String; 5] = fields
            .try_into()
            .map_err(|f: Vec<String>| format!("expected 5 fields, got {}", f.len()))?;

        Ok(Self {
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| format!("timestamp {timestamp:?}: {e}"))?
                .with_timezone(&Utc),
            source,
            snippet_id: SnippetId(id.parse().map_err(|e| format!("req_id {id:?}: {e}"))?),
            is_raw: is_raw.parse().map_err(|e| format!("is_raw {is_raw:?}: {e}"))?,
            is_reprint: is_reprint
                .parse()
                .map_err(|e| format!("is_reprint {is_reprint:?}: {e}"))?,
        })
    }
}

/// Quote a field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

/// Split a ledger file into records.  Line breaks inside quoted fields belong
/// to the field, not to the record boundary.
fn split_csv_records(data: &str) -> Vec<&str> {
    let mut records = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, b) in data.bytes().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => {
                records.push(data[start..i].trim_end_matches('\r'));
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < data.len() {
        records.push(&data[start..]);
    }
    records
}

/// Split one CSV record, honouring double-quoted fields.
fn split_csv_line(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if current.is_empty() => in_quotes = true,
            (',', false) => fields.push(std::mem::take(&mut current)),
            (c, _) => current.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".into());
    }
    fields.push(current);
    Ok(fields)
}

/// Per-digest append-only ledger files in one directory.
///
/// Appends are serialised through an internal lock so the header is always
/// the first line of a file even with several archivers in the process.
#[derive(Debug)]
pub struct Ledger {
    root: PathBuf,
    append_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, digest: &str) -> PathBuf {
        self.root.join(format!("{digest}.csv"))
    }

    /// Append one row, creating the file with its header on first use.
    #[instrument(skip(self, row), fields(snippet_id = %row.snippet_id))]
    pub fn append(&self, digest: &str, row: &LedgerRow) -> Result<()> {
        let path = self.path_for(digest);
        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| SnippetdError::ArchiveIo("ledger lock poisoned".into()))?;

        let (mut file, fresh) = match OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&path)
        {
            Ok(f) => (f, true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => (
                OpenOptions::new()
                    .append(true)
                    .open(&path)
                    .map_err(|e| ledger_err("open", &path, e))?,
                false,
            ),
            Err(e) => return Err(ledger_err("create", &path, e)),
        };

        let mut record = String::new();
        if fresh {
            record.push_str(LEDGER_HEADER);
            record.push('\n');
        }
        record.push_str(&row.to_csv_line());

        file.write_all(record.as_bytes())
            .map_err(|e| ledger_err("append to", &path, e))?;

        debug!(path = %path.display(), fresh, "ledger row appended");
        Ok(())
    }

    /// All rows recorded for `digest`, oldest first.  Empty when the digest
    /// has never been archived.
    pub fn rows(&self, digest: &str) -> Result<Vec<LedgerRow>> {
        let path = self.path_for(digest);
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ledger_err("read", &path, e)),
        };

        split_csv_records(&data)
            .into_iter()
            .skip(1)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(i, line)| {
                LedgerRow::parse_csv_line(line).map_err(|e| {
                    SnippetdError::ArchiveIo(format!("{} row {}: {e}", path.display(), i + 1))
                })
            })
            .collect()
    }
}

fn ledger_err(context: &str, path: &Path, e: std::io::Error) -> SnippetdError {
    SnippetdError::ArchiveIo(format!("{context} ledger {}: {e}", path.display()))
}
