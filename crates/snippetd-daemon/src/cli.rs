// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line arguments and their merge with the optional config file.

use std::path::PathBuf;

use clap::Parser;

use snippetd_core::config::DaemonConfig;
use snippetd_core::error::Result;

#[derive(Debug, Parser)]
#[command(name = "snippetd")]
#[command(about = "snippetd - queue, print and archive receipt snippets", long_about = None)]
pub struct Cli {
    /// Printer device path, e.g. /dev/usb/lp0
    pub device: Option<PathBuf>,

    /// Address to listen on
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory to archive printed snippets in
    #[arg(short, long)]
    pub archive: Option<PathBuf>,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of snippets that may wait for the printer
    #[arg(short, long)]
    pub queue_capacity: Option<usize>,
}

impl Cli {
    /// Load the config file (or defaults), apply flags, validate.
    pub fn resolve(self) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load(path)?,
            None => DaemonConfig::default(),
        };

        if let Some(device) = self.device {
            config.device_path = device;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(archive) = self.archive {
            config.archive_dir = Some(archive);
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue.capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }
}
