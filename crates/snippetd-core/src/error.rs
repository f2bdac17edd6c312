// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for snippetd.

use std::time::Duration;

use thiserror::Error;

use crate::types::SizeClass;

/// Top-level error type for all snippetd operations.
#[derive(Debug, Error)]
pub enum SnippetdError {
    // -- Validation (rejected before queueing) --
    #[error("snippet body is empty")]
    EmptyBody,

    #[error("snippet body of {len} bytes exceeds the {class} ceiling of {max} bytes")]
    BodyTooLarge {
        class: SizeClass,
        len: usize,
        max: usize,
    },

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // -- Job queue --
    #[error("print queue is full")]
    QueueFull,

    #[error("print queue is closed")]
    QueueClosed,

    #[error("timed out after {0:?} waiting for a free queue slot")]
    EnqueueTimeout(Duration),

    // -- Device --
    #[error("failed to open device {path}: {source}")]
    DeviceOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write to device {path}: {source}")]
    DeviceWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to close device {path}: {source}")]
    DeviceClose {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("device {path} did not complete within {timeout:?}")]
    DeviceTimeout { path: String, timeout: Duration },

    // -- Archive --
    #[error("archive I/O error: {0}")]
    ArchiveIo(String),

    #[error("no archived snippet with digest {0}")]
    NotFound(String),

    #[error("snippet archive is not configured")]
    Unavailable,

    // -- Ambient --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("print worker error: {0}")]
    Worker(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SnippetdError {
    /// Whether this error was raised by submitter-side validation, i.e. the
    /// request was malformed and never reached the queue.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyBody
                | Self::BodyTooLarge { .. }
                | Self::InvalidDigest(_)
                | Self::InvalidRequest(_)
        )
    }

    /// Whether this error originated at the physical device.
    pub fn is_device(&self) -> bool {
        matches!(
            self,
            Self::DeviceOpen { .. }
                | Self::DeviceWrite { .. }
                | Self::DeviceClose { .. }
                | Self::DeviceTimeout { .. }
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SnippetdError>;
