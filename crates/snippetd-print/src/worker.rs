// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print worker: the single consumer of the job queue.
//
// Per job: frame, write to the device (retrying only failed opens), then
// archive.  A failing job is logged and counted and the worker moves on; it
// never exits because of a device or archive error.  On shutdown the job in
// flight runs to completion, anything still queued is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use snippetd_archive::ContentArchive;
use snippetd_core::error::{Result, SnippetdError};
use snippetd_core::metrics::Metrics;
use snippetd_core::types::{Framing, Snippet};

use crate::device::{self, DeviceGate, PrintDevice};
use crate::escpos;
use crate::queue::JobReceiver;
use crate::retry::{self, RetryConfig, RetryDecision};

/// What the worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Printing,
}

pub struct PrintWorker {
    receiver: JobReceiver,
    device: Arc<dyn PrintDevice>,
    gate: DeviceGate,
    archive: Option<Arc<ContentArchive>>,
    metrics: Arc<Metrics>,
    retry: RetryConfig,
    io_timeout: Duration,
    /// Framing buffer reused for every job.
    scratch: Vec<u8>,
    printing: Arc<AtomicBool>,
}

impl PrintWorker {
    pub fn new(
        receiver: JobReceiver,
        device: Arc<dyn PrintDevice>,
        archive: Option<Arc<ContentArchive>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            receiver,
            device,
            gate: DeviceGate::new(),
            archive,
            metrics,
            retry: RetryConfig::default(),
            io_timeout: Duration::from_secs(10),
            scratch: Vec::with_capacity(4096),
            printing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Start the worker on the current runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let printing = Arc::clone(&self.printing);
        let task = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown,
            task,
            printing,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(device = %self.device.describe(), "print worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let snippet = tokio::select! {
                biased;
                // Err means the handle is gone; stop as if asked to.
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.receiver.dequeue() => match next {
                    Some(snippet) => snippet,
                    None => break,
                },
            };

            self.process(snippet, &mut shutdown).await;
        }

        self.receiver.close();
        if !self.gate.is_idle() {
            info!("waiting for a timed-out device write to return");
        }
        self.gate.wait_idle().await;
        info!("print worker stopped");
    }

    #[instrument(skip_all, fields(snippet_id = %snippet.id, reprint = snippet.is_reprint))]
    async fn process(&mut self, snippet: Snippet, shutdown: &mut watch::Receiver<bool>) {
        self.printing.store(true, Ordering::Release);
        let started = Instant::now();

        escpos::render(&snippet, &mut self.scratch);
        if snippet.framing() == Framing::Formatted {
            trace!(layout = %escpos::render_plain(&snippet), "rendered");
        }

        let result = self.print_with_retry(&snippet, shutdown).await;
        self.metrics.inc_prints_attempted();
        match result {
            Ok(()) => info!(
                bytes = snippet.body.len(),
                elapsed_ms = started.elapsed().as_millis(),
                "snippet printed"
            ),
            Err(e) => {
                self.metrics.inc_print_failures();
                error!(
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis(),
                    "print failed, snippet dropped"
                );
            }
        }

        // Printed or not, the submission is part of the record.
        self.archive_snippet(snippet).await;

        self.printing.store(false, Ordering::Release);
    }

    async fn print_with_retry(
        &mut self,
        snippet: &Snippet,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            // A timed-out write never hands the buffer back; frame again.
            if self.scratch.is_empty() {
                escpos::render(snippet, &mut self.scratch);
            }

            let buf = std::mem::take(&mut self.scratch);
            let (returned, result) =
                device::write_with_timeout(Arc::clone(&self.device), &self.gate, buf, self.io_timeout)
                    .await;
            self.scratch = returned.unwrap_or_default();

            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            match retry::should_retry(&err, attempt, &self.retry) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(error = %err, attempt, delay_ms = delay.as_millis(), "device unavailable, retrying");
                    self.metrics.inc_device_retries();
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            debug!("shutdown during backoff, abandoning job");
                            return Err(err);
                        }
                    }
                }
                RetryDecision::GiveUp(class) => {
                    debug!(?class, "not retrying");
                    return Err(err);
                }
                RetryDecision::Exhausted => return Err(err),
            }
        }
    }

    async fn archive_snippet(&self, snippet: Snippet) {
        let Some(archive) = self.archive.clone() else {
            return;
        };

        match tokio::task::spawn_blocking(move || archive.archive(&snippet)).await {
            Ok(Ok(outcome)) => {
                if outcome.newly_stored {
                    self.metrics.inc_archived_new();
                } else {
                    self.metrics.inc_archived_duplicate();
                }
                debug!(digest = %outcome.digest, new = outcome.newly_stored, "snippet archived");
            }
            Ok(Err(e)) => {
                self.metrics.inc_archive_errors();
                error!(error = %e, "archiving failed");
            }
            Err(e) => {
                self.metrics.inc_archive_errors();
                error!(error = %e, "archive task failed");
            }
        }
    }
}

/// Control handle for a running [`PrintWorker`].
///
/// Dropping the handle stops the worker after its current job.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    printing: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        if self.printing.load(Ordering::Acquire) {
            WorkerState::Printing
        } else {
            WorkerState::Idle
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the worker to stop and wait for the in-flight job to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| SnippetdError::Worker(format!("task join: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    use snippetd_archive::digest_hex;
    use snippetd_core::config::EnqueuePolicy;
    use snippetd_core::types::{SizeClass, SnippetIds, SnippetRequest};

    use crate::queue::{JobQueue, job_queue};

    /// Records every job; can be told to fail opens or writes.
    #[derive(Default)]
    struct TestDevice {
        jobs: Mutex<Vec<Vec<u8>>>,
        opens: AtomicU32,
        fail_opens: AtomicU32,
        fail_writes: AtomicBool,
        fail_closes: AtomicBool,
        delay: Duration,
        active: AtomicU32,
        max_active: AtomicU32,
        finished: AtomicU32,
    }

    impl PrintDevice for TestDevice {
        fn write_job(&self, bytes: &[u8]) -> Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let pending = self.fail_opens.load(Ordering::SeqCst);
            if pending > 0 {
                self.fail_opens.store(pending - 1, Ordering::SeqCst);
                return Err(SnippetdError::DeviceOpen {
                    path: "test".into(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                });
            }
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            let result = self.write_body(bytes);
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            result
        }

        fn describe(&self) -> String {
            "test".into()
        }
    }

    impl TestDevice {
        fn write_body(&self, bytes: &[u8]) -> Result<()> {
            std::thread::sleep(self.delay);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(SnippetdError::DeviceWrite {
                    path: "test".into(),
                    source: io::Error::from(io::ErrorKind::BrokenPipe),
                });
            }
            self.jobs.lock().unwrap().push(bytes.to_vec());
            if self.fail_closes.load(Ordering::SeqCst) {
                return Err(SnippetdError::DeviceClose {
                    path: "test".into(),
                    source: io::Error::from(io::ErrorKind::Other),
                });
            }
            Ok(())
        }
    }

    struct Harness {
        queue: JobQueue,
        ids: SnippetIds,
        device: Arc<TestDevice>,
        metrics: Arc<Metrics>,
        handle: WorkerHandle,
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn start(device: TestDevice, archive: Option<Arc<ContentArchive>>, retry: RetryConfig) -> Harness {
        start_with_timeout(device, archive, retry, Duration::from_secs(10))
    }

    fn start_with_timeout(
        device: TestDevice,
        archive: Option<Arc<ContentArchive>>,
        retry: RetryConfig,
        io_timeout: Duration,
    ) -> Harness {
        let device = Arc::new(device);
        let metrics = Arc::new(Metrics::new());
        let (queue, rx) = job_queue(16, EnqueuePolicy::Block);
        let handle = PrintWorker::new(rx, device.clone(), archive, metrics.clone())
            .with_retry(retry)
            .with_io_timeout(io_timeout)
            .spawn();
        Harness {
            queue,
            ids: SnippetIds::new(),
            device,
            metrics,
            handle,
        }
    }

    impl Harness {
        async fn submit(&self, body: &str) {
            let snippet = SnippetRequest::new("10.0.0.5", body.as_bytes().to_vec(), true, SizeClass::Text)
                .unwrap()
                .into_snippet(&self.ids);
            self.queue.enqueue(snippet).await.unwrap();
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn prints_in_submission_order() {
        let h = start(TestDevice::default(), None, fast_retry(0));
        for body in ["one", "two", "three"] {
            h.submit(body).await;
        }

        wait_until(|| h.metrics.snapshot().prints_attempted == 3).await;
        let jobs = h.device.jobs.lock().unwrap().clone();
        assert_eq!(
            jobs,
            vec![
                b"\x1b\x40one\n".to_vec(),
                b"\x1b\x40two\n".to_vec(),
                b"\x1b\x40three\n".to_vec(),
            ]
        );
        h.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn open_failures_are_retried() {
        let device = TestDevice::default();
        device.fail_opens.store(2, Ordering::SeqCst);
        let h = start(device, None, fast_retry(5));

        h.submit("hello").await;
        wait_until(|| h.metrics.snapshot().prints_attempted == 1).await;

        let snap = h.metrics.snapshot();
        assert_eq!(snap.device_retries, 2);
        assert_eq!(snap.print_failures, 0);
        assert_eq!(h.device.jobs.lock().unwrap().len(), 1);
        h.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn worker_survives_an_exhausted_job() {
        let device = TestDevice::default();
        device.fail_opens.store(2, Ordering::SeqCst);
        let h = start(device, None, fast_retry(1));

        h.submit("lost").await;
        h.submit("kept").await;
        wait_until(|| h.metrics.snapshot().prints_attempted == 2).await;

        assert_eq!(h.metrics.snapshot().print_failures, 1);
        assert_eq!(*h.device.jobs.lock().unwrap(), vec![b"\x1b\x40kept\n".to_vec()]);
        assert!(!h.handle.is_finished());
        h.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn write_failure_is_not_retried() {
        let device = TestDevice::default();
        device.fail_writes.store(true, Ordering::SeqCst);
        let h = start(device, None, fast_retry(5));

        h.submit("once").await;
        wait_until(|| h.metrics.snapshot().prints_attempted == 1).await;

        assert_eq!(h.device.opens.load(Ordering::SeqCst), 1);
        assert_eq!(h.metrics.snapshot().print_failures, 1);
        assert_eq!(h.metrics.snapshot().device_retries, 0);
        h.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failed_prints_are_still_archived() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(ContentArchive::open(dir.path()).unwrap());
        let device = TestDevice::default();
        device.fail_writes.store(true, Ordering::SeqCst);
        let h = start(device, Some(archive.clone()), fast_retry(0));

        h.submit("keep me").await;
        h.submit("keep me").await;
        wait_until(|| {
            let s = h.metrics.snapshot();
            s.archived_new + s.archived_duplicate == 2
        })
        .await;

        let digest = digest_hex(b"keep me");
        assert!(archive.contains(&digest).unwrap().is_some());
        assert_eq!(archive.ledger(&digest).unwrap().len(), 2);
        let snap = h.metrics.snapshot();
        assert_eq!((snap.archived_new, snap.archived_duplicate), (1, 1));
        h.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_finishes_the_job_in_flight() {
        let device = TestDevice {
            delay: Duration::from_millis(200),
            ..Default::default()
        };
        let h = start(device, None, fast_retry(0));

        h.submit("in flight").await;
        h.submit("left behind").await;
        wait_until(|| h.handle.state() == WorkerState::Printing).await;

        h.handle.shutdown().await.unwrap();
        assert_eq!(
            *h.device.jobs.lock().unwrap(),
            vec![b"\x1b\x40in flight\n".to_vec()]
        );
        assert!(h.queue.is_closed());
    }

    #[tokio::test]
    async fn close_failure_is_counted_and_archived() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(ContentArchive::open(dir.path()).unwrap());
        let device = TestDevice::default();
        device.fail_closes.store(true, Ordering::SeqCst);
        let h = start(device, Some(archive.clone()), fast_retry(5));

        h.submit("first").await;
        h.submit("second").await;
        wait_until(|| h.metrics.snapshot().archived_new == 2).await;

        let snap = h.metrics.snapshot();
        assert_eq!(snap.prints_attempted, 2);
        assert_eq!(snap.print_failures, 2);
        assert_eq!(snap.device_retries, 0);
        assert_eq!(h.device.opens.load(Ordering::SeqCst), 2);
        assert!(archive.contains(&digest_hex(b"second")).unwrap().is_some());
        assert!(!h.handle.is_finished());
        h.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn timed_out_writes_never_overlap() {
        let device = TestDevice {
            delay: Duration::from_millis(150),
            ..Default::default()
        };
        let h = start_with_timeout(device, None, fast_retry(0), Duration::from_millis(30));

        for body in ["a", "b", "c"] {
            h.submit(body).await;
        }
        wait_until(|| h.metrics.snapshot().prints_attempted == 3).await;
        h.handle.shutdown().await.unwrap();

        assert_eq!(h.device.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(h.device.finished.load(Ordering::SeqCst), 3);
        assert_eq!(h.metrics.snapshot().print_failures, 3);
        assert_eq!(
            *h.device.jobs.lock().unwrap(),
            vec![
                b"\x1b\x40a\n".to_vec(),
                b"\x1b\x40b\n".to_vec(),
                b"\x1b\x40c\n".to_vec(),
            ]
        );
    }
}
