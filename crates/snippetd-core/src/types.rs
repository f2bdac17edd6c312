// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the snippetd print pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnippetdError};

/// Largest accepted body for text snippets (1.6 kB is plenty for a receipt).
pub const MAX_TEXT_LEN: usize = 1600;

/// Largest accepted body for image snippets.
pub const MAX_IMAGE_LEN: usize = 64_000;

/// Global ceiling, checked before the body is read at all.
pub const MAX_BODY_LEN: usize = MAX_IMAGE_LEN;

/// Per-process sequence number of a snippet.
///
/// Only used for correlation in logs, receipts and the ledger; stored
/// content is addressed by digest, never by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnippetId(pub u64);

impl std::fmt::Display for SnippetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Atomic id allocator shared by every producer in the process.
#[derive(Debug)]
pub struct SnippetIds {
    last: AtomicU64,
}

impl Default for SnippetIds {
    fn default() -> Self {
        Self::new()
    }
}

impl SnippetIds {
    /// The first id handed out is 1.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Allocate the next id.
    pub fn next(&self) -> SnippetId {
        SnippetId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// The most recently allocated id, or 0 if none yet.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

/// Size class of a submission, deciding the body ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Text,
    Image,
}

impl SizeClass {
    /// Maximum body length in bytes for this class.
    pub fn max_len(&self) -> usize {
        match self {
            Self::Text => MAX_TEXT_LEN,
            Self::Image => MAX_IMAGE_LEN,
        }
    }
}

impl std::fmt::Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Image => f.write_str("image"),
        }
    }
}

/// How a snippet is framed for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Reset, body verbatim, newline.
    Raw,
    /// Timestamp header, separators, `#id @ source` footer, cutter feed.
    Formatted,
}

/// Kind of a stored archive object.  Derived from the framing at archive
/// time and encoded in the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Text,
    Raw,
}

impl ArchiveKind {
    /// Lookup order used when resolving a digest for reprint.
    pub const LOOKUP_ORDER: [ArchiveKind; 2] = [ArchiveKind::Text, ArchiveKind::Raw];

    /// File extension of the stored body.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Raw => "bin",
        }
    }

    /// Framing a reprint of this kind uses.
    pub fn framing(&self) -> Framing {
        match self {
            Self::Text => Framing::Formatted,
            Self::Raw => Framing::Raw,
        }
    }
}

impl From<Framing> for ArchiveKind {
    fn from(framing: Framing) -> Self {
        match framing {
            Framing::Raw => Self::Raw,
            Framing::Formatted => Self::Text,
        }
    }
}

/// A unit of print work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: SnippetId,
    /// Submitter host, advisory only.
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub body: Vec<u8>,
    pub is_raw: bool,
    /// Set only on jobs reconstructed from the archive.
    pub is_reprint: bool,
}

impl Snippet {
    pub fn framing(&self) -> Framing {
        if self.is_raw {
            Framing::Raw
        } else {
            Framing::Formatted
        }
    }

    pub fn archive_kind(&self) -> ArchiveKind {
        self.framing().into()
    }
}

/// A validated-on-construction submission, before an id is assigned.
#[derive(Debug, Clone)]
pub struct SnippetRequest {
    pub source: String,
    pub body: Vec<u8>,
    pub is_raw: bool,
    pub class: SizeClass,
}

impl SnippetRequest {
    /// Build a request, rejecting empty or oversize bodies.
    pub fn new(
        source: impl Into<String>,
        body: Vec<u8>,
        is_raw: bool,
        class: SizeClass,
    ) -> Result<Self> {
        check_body_len(body.len(), class)?;
        Ok(Self {
            source: source.into(),
            body,
            is_raw,
            class,
        })
    }

    /// Turn the request into a queued snippet with a fresh id and timestamp.
    pub fn into_snippet(self, ids: &SnippetIds) -> Snippet {
        Snippet {
            id: ids.next(),
            source: self.source,
            timestamp: Utc::now(),
            body: self.body,
            is_raw: self.is_raw,
            is_reprint: false,
        }
    }
}

/// Check a body length against the ceiling of its class.
///
/// Callers that know the length before reading the body (e.g. from a
/// `Content-Length` header) use this directly.
pub fn check_body_len(len: usize, class: SizeClass) -> Result<()> {
    if len == 0 {
        return Err(SnippetdError::EmptyBody);
    }
    let max = class.max_len();
    if len > max {
        return Err(SnippetdError::BodyTooLarge { class, len, max });
    }
    Ok(())
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Device unplugged or busy; safe to retry automatically.
    Transient,
    /// Operator must act (permissions, wrong path).
    UserAction,
    /// Retrying would not help or would print twice.
    Permanent,
}

/// Lifecycle of the HTTP gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}
