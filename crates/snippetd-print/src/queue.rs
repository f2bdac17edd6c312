// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded in-memory print job queue.
//
// Many producers (gateway connections, reprint requests) feed one consumer,
// the print worker.  Order is FIFO across producers.  Nothing is persisted:
// jobs still queued when the process exits are lost.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tracing::{debug, instrument, warn};

use snippetd_core::config::EnqueuePolicy;
use snippetd_core::error::{Result, SnippetdError};
use snippetd_core::types::{Snippet, SnippetId};

/// Create a queue holding at most `capacity` snippets.
///
/// # Panics
///
/// Panics if `capacity` is zero; `DaemonConfig::validate` rejects that
/// before the pipeline is built.
pub fn job_queue(capacity: usize, policy: EnqueuePolicy) -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (JobQueue { tx, policy }, JobReceiver { rx })
}

/// Producer handle.  Cheap to clone; one per connection is fine.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Snippet>,
    policy: EnqueuePolicy,
}

impl JobQueue {
    /// Append `snippet` to the queue, waiting for room according to the
    /// configured policy.
    #[instrument(skip_all, fields(snippet_id = %snippet.id))]
    pub async fn enqueue(&self, snippet: Snippet) -> Result<SnippetId> {
        let id = snippet.id;
        match self.policy {
            EnqueuePolicy::Block => self
                .tx
                .send(snippet)
                .await
                .map_err(|_| SnippetdError::QueueClosed)?,
            EnqueuePolicy::Timeout { timeout_ms } => {
                let timeout = Duration::from_millis(timeout_ms);
                self.tx
                    .send_timeout(snippet, timeout)
                    .await
                    .map_err(|e| match e {
                        SendTimeoutError::Timeout(_) => {
                            warn!(?timeout, "print queue stayed full");
                            SnippetdError::EnqueueTimeout(timeout)
                        }
                        SendTimeoutError::Closed(_) => SnippetdError::QueueClosed,
                    })?
            }
            EnqueuePolicy::Reject => self.tx.try_send(snippet).map_err(|e| match e {
                TrySendError::Full(_) => {
                    warn!("print queue full, rejecting");
                    SnippetdError::QueueFull
                }
                TrySendError::Closed(_) => SnippetdError::QueueClosed,
            })?,
        }
        debug!(queued = self.len(), "snippet enqueued");
        Ok(id)
    }

    pub fn policy(&self) -> EnqueuePolicy {
        self.policy
    }

    /// Maximum number of queued snippets.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Snippets currently waiting for the worker.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the worker has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer handle owned by the print worker.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::Receiver<Snippet>,
}

impl JobReceiver {
    /// Wait for the oldest queued snippet.  `None` once every producer is
    /// gone and the queue is drained.
    pub async fn dequeue(&mut self) -> Option<Snippet> {
        self.rx.recv().await
    }

    /// Stop accepting new snippets; already queued ones can still be taken.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
