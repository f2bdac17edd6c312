// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: builds the archive, device, pipeline and gateway from a
// validated configuration and tears them down in order.

use std::net::SocketAddr;
use std::sync::Arc;

use snippetd_archive::ContentArchive;
use snippetd_core::config::DaemonConfig;
use snippetd_core::error::Result;
use snippetd_core::metrics::Metrics;
use snippetd_print::{FileDevice, HttpGateway, PrintPipeline, WorkerHandle};
use tracing::{info, warn};

/// Everything the daemon runs.
pub struct DaemonServices {
    gateway: HttpGateway,
    worker: WorkerHandle,
    metrics: Arc<Metrics>,
    local_addr: SocketAddr,
}

impl DaemonServices {
    /// Open the archive (creating its directory), start the worker, then
    /// start accepting submissions.
    pub async fn start(config: &DaemonConfig) -> Result<Self> {
        let archive = match &config.archive_dir {
            Some(dir) => Some(Arc::new(ContentArchive::open(dir)?)),
            None => {
                info!("archive directory not set, archiving disabled");
                None
            }
        };

        let device = FileDevice::new(&config.device_path)
            .with_sync_on_close(config.device.sync_on_close);
        let metrics = Arc::new(Metrics::new());
        let (pipeline, worker) =
            PrintPipeline::start(config, Arc::new(device), archive, Arc::clone(&metrics));

        let mut gateway = HttpGateway::new(config.listen_addr());
        let local_addr = match gateway.start(pipeline).await {
            Ok(addr) => addr,
            Err(e) => {
                if let Err(stop_err) = worker.shutdown().await {
                    warn!(error = %stop_err, "worker did not stop cleanly");
                }
                return Err(e);
            }
        };

        info!(
            addr = %local_addr,
            device = %config.device_path.display(),
            "snippetd services started"
        );

        Ok(Self {
            gateway,
            worker,
            metrics,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Stop the gateway first so nothing new is queued, then let the worker
    /// finish its current job.
    pub async fn shutdown(mut self) -> Result<()> {
        self.gateway.stop().await?;
        self.worker.shutdown().await?;

        let snapshot = self.metrics.snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => info!(metrics = %json, "snippetd services stopped"),
            Err(_) => info!(?snapshot, "snippetd services stopped"),
        }
        Ok(())
    }
}
