//! Per-source round counters, kept for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters of the latest round for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundStats {
    pub processed: u64,
    pub success: u64,
    pub fail: u64,
    pub skip: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub running: bool,
}

/// Totals across every source seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverallStats {
    pub sources: usize,
    pub running: usize,
    pub processed: u64,
    pub success: u64,
    pub fail: u64,
    pub skip: u64,
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Processed,
    Success,
    Fail,
    Skip,
}

/// Thread-safe in-memory progress tracker.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<Mutex<HashMap<String, RoundStats>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, HashMap<String, RoundStats>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned progress mutex");
            poisoned.into_inner()
        })
    }

    /// Resets the counters for `source` and marks it running.
    pub fn start_round(&self, source: &str) {
        self.lock_inner().insert(
            source.to_string(),
            RoundStats {
                start_time: Some(Utc::now()),
                running: true,
                ..Default::default()
            },
        );
    }

    pub fn end_round(&self, source: &str) {
        if let Some(stats) = self.lock_inner().get_mut(source) {
            stats.running = false;
            stats.end_time = Some(Utc::now());
        }
    }

    pub fn inc_processed(&self, source: &str) {
        self.bump(source, Counter::Processed);
    }

    pub fn inc_success(&self, source: &str) {
        self.bump(source, Counter::Success);
    }

    pub fn inc_fail(&self, source: &str) {
        self.bump(source, Counter::Fail);
    }

    pub fn inc_skip(&self, source: &str) {
        self.bump(source, Counter::Skip);
    }

    fn bump(&self, source: &str, counter: Counter) {
        let mut inner = self.lock_inner();
        let stats = inner.entry(source.to_string()).or_default();
        match counter {
            Counter::Processed => stats.processed += 1,
            Counter::Success => stats.success += 1,
            Counter::Fail => stats.fail += 1,
            Counter::Skip => stats.skip += 1,
        }
    }

    pub fn round_stats(&self, source: &str) -> Option<RoundStats> {
        self.lock_inner().get(source).cloned()
    }

    pub fn overall(&self) -> OverallStats {
        let inner = self.lock_inner();
        inner
            .values()
            .fold(OverallStats::default(), |mut acc, s| {
                acc.sources += 1;
                acc.running += usize::from(s.running);
                acc.processed += s.processed;
                acc.success += s.success;
                acc.fail += s.fail;
                acc.skip += s.skip;
                acc
            })
    }

    /// Forgets a finished round. Running rounds are kept.
    pub fn clear(&self, source: &str) -> bool {
        let mut inner = self.lock_inner();
        match inner.get(source) {
            Some(stats) if !stats.running => inner.remove(source).is_some(),
            _ => false,
        }
    }
}
