// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// snippetd: receipt printer daemon.
//
// Entry point. Initialises logging, resolves configuration, starts the print
// pipeline and HTTP gateway, and runs until SIGINT or SIGTERM.

mod cli;
mod services;

use std::process::ExitCode;

use clap::Parser;
use snippetd_print::FileDevice;

use cli::Cli;
use services::DaemonServices;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Cli::parse().resolve() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    // The printer must be there at startup; later disappearances are retried.
    if let Err(e) = FileDevice::new(&config.device_path).probe() {
        tracing::error!(error = %e, "printer device not found");
        return ExitCode::from(2);
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "snippetd starting");

    let services = match DaemonServices::start(&config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    wait_for_signal().await;
    tracing::info!("shutdown requested");

    match services.shutdown().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "unclean shutdown");
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
