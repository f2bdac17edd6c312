// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SnippetdError};

/// Default number of snippets buffered between the gateway and the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// What a producer does when the print queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueuePolicy {
    /// Wait for a free slot indefinitely (backpressure into the caller).
    #[default]
    Block,
    /// Wait at most this long, then fail with `EnqueueTimeout`.
    Timeout { timeout_ms: u64 },
    /// Fail immediately with `QueueFull`.
    Reject,
}

/// Job queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub enqueue_policy: EnqueuePolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_policy: EnqueuePolicy::default(),
        }
    }
}

/// Physical device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Upper bound on one open/write/close cycle.
    pub io_timeout_ms: u64,
    /// Sync written data before releasing the handle, surfacing close-time
    /// errors.  Most character devices reject fsync, so this is off by default.
    pub sync_on_close: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 10_000,
            sync_on_close: false,
        }
    }
}

impl DeviceConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Backoff applied when the device cannot be opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path of the printer device (e.g. `/dev/usb/lp0`).
    pub device_path: PathBuf,
    /// Address the HTTP gateway binds to.
    pub host: String,
    /// Port the HTTP gateway binds to.
    pub port: u16,
    /// Directory for the snippet archive; archiving is off when unset.
    pub archive_dir: Option<PathBuf>,
    pub queue: QueueConfig,
    pub device: DeviceConfig,
    pub retry: RetrySettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::new(),
            host: "127.0.0.1".into(),
            port: 9999,
            archive_dir: None,
            queue: QueueConfig::default(),
            device: DeviceConfig::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Read a JSON configuration file.  Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            SnippetdError::Config(format!("read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&data)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.device_path.as_os_str().is_empty() {
            return Err(SnippetdError::Config("device path is not set".into()));
        }
        if self.queue.capacity == 0 {
            return Err(SnippetdError::Config(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.device.io_timeout_ms == 0 {
            return Err(SnippetdError::Config(
                "device I/O timeout must be non-zero".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(SnippetdError::Config(
                "retry base delay exceeds max delay".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` for the gateway listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
