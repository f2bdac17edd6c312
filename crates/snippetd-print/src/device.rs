// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device writer: dump a framed job onto the printer's device node.
//
// The device is opened append/write-only right before each job and released
// right after it; it is never held across jobs.  A single print worker issues
// the writes and a `DeviceGate` keeps a timed-out write from overlapping the
// next one.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

use snippetd_core::error::{Result, SnippetdError};

/// Anything a framed job can be written to.
///
/// Implementations perform blocking I/O; the worker calls them from the
/// blocking thread pool through [`write_with_timeout`].
pub trait PrintDevice: Send + Sync + 'static {
    /// Open, write all of `bytes`, close.
    fn write_job(&self, bytes: &[u8]) -> Result<()>;

    /// Short description for logs (usually the device path).
    fn describe(&self) -> String;
}

/// A printer reachable as an append-writable file path, e.g. `/dev/usb/lp0`
/// or a serial tty.
#[derive(Debug, Clone)]
pub struct FileDevice {
    path: PathBuf,
    sync_on_close: bool,
}

impl FileDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_close: false,
        }
    }

    /// Sync written data before releasing the handle so that late I/O errors
    /// surface as `DeviceClose` instead of being lost on drop.
    pub fn with_sync_on_close(mut self, sync: bool) -> Self {
        self.sync_on_close = sync;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that the device node exists.  Used once at startup; a device
    /// that disappears later is handled by the worker's retry loop.
    pub fn probe(&self) -> Result<()> {
        std::fs::metadata(&self.path)
            .map(|_| ())
            .map_err(|source| SnippetdError::DeviceOpen {
                path: self.path.display().to_string(),
                source,
            })
    }
}

impl PrintDevice for FileDevice {
    #[instrument(skip_all, fields(path = %self.path.display(), len = bytes.len()))]
    fn write_job(&self, bytes: &[u8]) -> Result<()> {
        let path = self.path.display().to_string();

        // Never create: a missing node means the printer is gone.
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| SnippetdError::DeviceOpen {
                path: path.clone(),
                source,
            })?;

        file.write_all(bytes)
            .map_err(|source| SnippetdError::DeviceWrite {
                path: path.clone(),
                source,
            })?;

        if self.sync_on_close {
            file.sync_data()
                .map_err(|source| SnippetdError::DeviceClose { path, source })?;
        }

        debug!("job written to device");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Single-writer guard for a device.
///
/// A write that outlives its timeout keeps its permit until the blocking call
/// actually returns, so the next job cannot open the device underneath it.
#[derive(Debug, Clone)]
pub struct DeviceGate {
    permit: Arc<Semaphore>,
}

impl Default for DeviceGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceGate {
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// `true` when no write is running, timed out or not.
    pub fn is_idle(&self) -> bool {
        self.permit.available_permits() == 1
    }

    /// Wait until any write still running on the blocking pool has returned.
    pub async fn wait_idle(&self) {
        let _permit = self.permit.acquire().await;
    }

    async fn acquire(&self, path: &str) -> Result<OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.permit).try_acquire_owned() {
            return Ok(permit);
        }
        warn!(device = %path, "device still busy with a timed-out write, waiting");
        Arc::clone(&self.permit)
            .acquire_owned()
            .await
            .map_err(|_| SnippetdError::DeviceWrite {
                path: path.to_owned(),
                source: std::io::Error::other("device gate closed"),
            })
    }
}

/// Run `device.write_job(buf)` on the blocking pool, bounded by `timeout`.
///
/// Waits for `gate` first; the timeout only covers this job's own write.  The
/// buffer is handed back so the caller can reuse the allocation.  It is lost
/// (`None`) when the write timed out, because the blocking call still owns it
/// and cannot be cancelled.
pub async fn write_with_timeout(
    device: Arc<dyn PrintDevice>,
    gate: &DeviceGate,
    buf: Vec<u8>,
    timeout: Duration,
) -> (Option<Vec<u8>>, Result<()>) {
    let path = device.describe();
    let permit = match gate.acquire(&path).await {
        Ok(permit) => permit,
        Err(e) => return (Some(buf), Err(e)),
    };

    let mut task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let result = device.write_job(&buf);
        (buf, result)
    });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok((buf, result))) => (Some(buf), result),
        Ok(Err(join_err)) => (
            None,
            Err(SnippetdError::DeviceWrite {
                path,
                source: std::io::Error::other(format!("device task failed: {join_err}")),
            }),
        ),
        Err(_) => {
            let late_path = path.clone();
            tokio::spawn(async move {
                match task.await {
                    Ok((_, Ok(()))) => info!(device = %late_path, "timed-out write completed late"),
                    Ok((_, Err(e))) => warn!(device = %late_path, error = %e, "timed-out write failed late"),
                    Err(e) => warn!(device = %late_path, error = %e, "timed-out write task failed"),
                }
            });
            (None, Err(SnippetdError::DeviceTimeout { path, timeout }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_each_job() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let device = FileDevice::new(file.path());

        device.write_job(b"one\n").unwrap();
        device.write_job(b"two\n").unwrap();

        assert_eq!(std::fs::read(file.path()).unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn missing_device_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = FileDevice::new(dir.path().join("lp0"));

        let err = device.write_job(b"x").unwrap_err();
        assert!(matches!(err, SnippetdError::DeviceOpen { .. }));
        assert!(device.probe().is_err());
        assert!(!dir.path().join("lp0").exists(), "device node must not be created");
    }

    #[test]
    fn sync_on_close_writes_regular_files() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let device = FileDevice::new(file.path()).with_sync_on_close(true);
        device.write_job(b"synced").unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), b"synced");
    }

    struct SlowDevice(Duration);

    impl PrintDevice for SlowDevice {
        fn write_job(&self, _bytes: &[u8]) -> Result<()> {
            std::thread::sleep(self.0);
            Ok(())
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    #[tokio::test]
    async fn buffer_comes_back_after_write() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let device: Arc<dyn PrintDevice> = Arc::new(FileDevice::new(file.path()));
        let mut buf = Vec::with_capacity(1024);
        buf.extend_from_slice(b"receipt");

        let (returned, result) =
            write_with_timeout(device, &DeviceGate::new(), buf, Duration::from_secs(5)).await;
        result.unwrap();
        let returned = returned.expect("buffer handed back");
        assert_eq!(returned, b"receipt");
        assert!(returned.capacity() >= 1024);
    }

    #[tokio::test]
    async fn stuck_device_times_out() {
        let device: Arc<dyn PrintDevice> = Arc::new(SlowDevice(Duration::from_millis(500)));
        let gate = DeviceGate::new();
        let (returned, result) =
            write_with_timeout(device, &gate, b"x".to_vec(), Duration::from_millis(20)).await;

        assert!(returned.is_none());
        assert!(matches!(result, Err(SnippetdError::DeviceTimeout { .. })));
        assert!(!gate.is_idle(), "timed-out write still holds the device");

        tokio::time::timeout(Duration::from_secs(5), gate.wait_idle())
            .await
            .expect("write finishes eventually");
        assert!(gate.is_idle());
    }

    #[tokio::test]
    async fn next_write_waits_for_a_timed_out_one() {
        let device: Arc<dyn PrintDevice> = Arc::new(SlowDevice(Duration::from_millis(200)));
        let gate = DeviceGate::new();

        let started = std::time::Instant::now();
        let (_, first) =
            write_with_timeout(Arc::clone(&device), &gate, b"a".to_vec(), Duration::from_millis(20))
                .await;
        assert!(matches!(first, Err(SnippetdError::DeviceTimeout { .. })));

        let (_, second) =
            write_with_timeout(device, &gate, b"b".to_vec(), Duration::from_secs(5)).await;
        second.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(400));
    }
}
