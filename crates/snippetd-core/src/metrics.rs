// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline counters.
//
// One `Metrics` value is created at startup and shared by `Arc` between the
// gateway, the pipeline and the worker.  Counters are plain increments; the
// gateway serves a `MetricsSnapshot` as JSON.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counters for the print pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    rejected: AtomicU64,
    enqueued: AtomicU64,
    reprints: AtomicU64,
    /// Every job the worker tried to print, whatever the device said.
    prints_attempted: AtomicU64,
    print_failures: AtomicU64,
    device_retries: AtomicU64,
    archived_new: AtomicU64,
    archived_duplicate: AtomicU64,
    archive_errors: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub rejected: u64,
    pub enqueued: u64,
    pub reprints: u64,
    pub prints_attempted: u64,
    pub print_failures: u64,
    pub device_retries: u64,
    pub archived_new: u64,
    pub archived_duplicate: u64,
    pub archive_errors: u64,
}

macro_rules! counter {
    ($($inc:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $inc(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        inc_requests => requests,
        inc_rejected => rejected,
        inc_enqueued => enqueued,
        inc_reprints => reprints,
        inc_prints_attempted => prints_attempted,
        inc_print_failures => print_failures,
        inc_device_retries => device_retries,
        inc_archived_new => archived_new,
        inc_archived_duplicate => archived_duplicate,
        inc_archive_errors => archive_errors,
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            reprints: self.reprints.load(Ordering::Relaxed),
            prints_attempted: self.prints_attempted.load(Ordering::Relaxed),
            print_failures: self.print_failures.load(Ordering::Relaxed),
            device_retries: self.device_retries.load(Ordering::Relaxed),
            archived_new: self.archived_new.load(Ordering::Relaxed),
            archived_duplicate: self.archived_duplicate.load(Ordering::Relaxed),
            archive_errors: self.archive_errors.load(Ordering::Relaxed),
        }
    }
}
