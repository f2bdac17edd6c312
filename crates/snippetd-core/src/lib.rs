// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// snippetd: Core types, errors, configuration and metrics shared across all
// crates.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::DaemonConfig;
pub use error::SnippetdError;
pub use metrics::{Metrics, MetricsSnapshot};
pub use types::*;
