//! Per-run counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Counters shared by everything taking part in one run
///
/// Owned by the top-level run and handed down as an `Arc`; there are no
/// process-wide counters.
#[derive(Debug, Default)]
pub struct RunContext {
    connection_attempts: AtomicU64,
    tests_run: AtomicU64,
    assertions_run: AtomicU64,
}

/// Point-in-time copy of the counters, as serialized in reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub connection_attempts: u64,
    pub total_tests_run: u64,
    pub total_assertions: u64,
}

impl RunContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_test(&self) {
        self.tests_run.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_assertion(&self) {
        self.assertions_run.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connection_attempts(&self) -> u64 {
        self.connection_attempts.load(Ordering::SeqCst)
    }

    pub fn tests_run(&self) -> u64 {
        self.tests_run.load(Ordering::SeqCst)
    }

    pub fn assertions_run(&self) -> u64 {
        self.assertions_run.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> RunMetrics {
        RunMetrics {
            connection_attempts: self.connection_attempts(),
            total_tests_run: self.tests_run(),
            total_assertions: self.assertions_run(),
        }
    }
}
