// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print pipeline: the producer-side facade shared by every front end.
//
// Owns the id allocator and a queue handle, and knows where the archive
// lives so reprints can be resolved.  Cloning is cheap.

use std::sync::Arc;

use tracing::{info, instrument};

use snippetd_archive::ContentArchive;
use snippetd_core::config::DaemonConfig;
use snippetd_core::error::{Result, SnippetdError};
use snippetd_core::metrics::Metrics;
use snippetd_core::types::{SnippetId, SnippetIds, SnippetRequest};

use crate::device::PrintDevice;
use crate::queue::{JobQueue, job_queue};
use crate::retry::RetryConfig;
use crate::worker::{PrintWorker, WorkerHandle};

#[derive(Clone)]
pub struct PrintPipeline {
    queue: JobQueue,
    ids: Arc<SnippetIds>,
    archive: Option<Arc<ContentArchive>>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for PrintPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintPipeline")
            .field("queued", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .field("archive", &self.archive.as_ref().map(|a| a.root().to_path_buf()))
            .finish()
    }
}

impl PrintPipeline {
    /// Build the queue and spawn the single print worker.
    pub fn start(
        config: &DaemonConfig,
        device: Arc<dyn PrintDevice>,
        archive: Option<Arc<ContentArchive>>,
        metrics: Arc<Metrics>,
    ) -> (Self, WorkerHandle) {
        let (queue, receiver) = job_queue(config.queue.capacity, config.queue.enqueue_policy);
        let worker = PrintWorker::new(receiver, device, archive.clone(), Arc::clone(&metrics))
            .with_retry(RetryConfig::from(&config.retry))
            .with_io_timeout(config.device.io_timeout());

        info!(
            capacity = config.queue.capacity,
            policy = ?config.queue.enqueue_policy,
            archive = archive.is_some(),
            "print pipeline started"
        );

        let pipeline = Self {
            queue,
            ids: Arc::new(SnippetIds::new()),
            archive,
            metrics,
        };
        (pipeline, worker.spawn())
    }

    /// Assign an id to a validated request and queue it.
    ///
    /// The id is consumed even when queueing fails.
    #[instrument(skip_all, fields(source = %request.source, raw = request.is_raw))]
    pub async fn submit(&self, request: SnippetRequest) -> Result<SnippetId> {
        let snippet = request.into_snippet(&self.ids);
        let id = self.queue.enqueue(snippet).await?;
        self.metrics.inc_enqueued();
        Ok(id)
    }

    /// Look up `digest` in the archive and queue the stored body again.
    #[instrument(skip(self))]
    pub async fn reprint(&self, digest: &str, source: &str) -> Result<SnippetId> {
        let archive = self.archive.clone().ok_or(SnippetdError::Unavailable)?;
        let ids = Arc::clone(&self.ids);
        let (digest, source) = (digest.to_owned(), source.to_owned());

        let snippet =
            tokio::task::spawn_blocking(move || archive.resolve_reprint(&digest, &source, &ids))
                .await
                .map_err(|e| SnippetdError::ArchiveIo(format!("reprint lookup task: {e}")))??;

        let id = self.queue.enqueue(snippet).await?;
        self.metrics.inc_reprints();
        self.metrics.inc_enqueued();
        Ok(id)
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn has_archive(&self) -> bool {
        self.archive.is_some()
    }
}
