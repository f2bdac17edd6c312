// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// snippetd Print: ESC/POS framing, device access, the bounded job queue,
// the supervised print worker and the HTTP submission gateway.  This crate
// turns validated requests from `snippetd-core` into bytes on the printer
// and hands every job to `snippetd-archive` afterwards.

pub mod device;
pub mod escpos;
pub mod gateway;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod worker;

pub use device::{FileDevice, PrintDevice};
pub use gateway::HttpGateway;
pub use pipeline::PrintPipeline;
pub use queue::{JobQueue, JobReceiver, job_queue};
pub use worker::{PrintWorker, WorkerHandle, WorkerState};
