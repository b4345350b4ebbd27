//! Process-wide counters shared by the fetch and extraction pipelines.
//!
//! Both sides hold an `Arc<PipelineStats>` and only ever increment. The
//! counters are read once, through [`PipelineStats::summary`], after both
//! pipelines have been joined.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries_exhausted: AtomicU64,
    documents_processed: AtomicU64,
    documents_failed: AtomicU64,
    pages_scanned: AtomicU64,
    matches: AtomicU64,
    crops_saved: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// One gated-fetch attempt was started
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// A link produced its payload
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    /// A link is still failing after the final sweep
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A link used up its attempts within one pass
    pub fn record_retries_exhausted(&self) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_document_processed(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_document_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_scanned(&self) {
        self.pages_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crop_saved(&self) {
        self.crops_saved.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters. Only meaningful once both pipelines have drained.
    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            pages_scanned: self.pages_scanned.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            crops_saved: self.crops_saved.load(Ordering::Relaxed),
            finished_at: Utc::now(),
        }
    }
}

/// Final counter values for one run
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries_exhausted: u64,
    pub documents_processed: u64,
    pub documents_failed: u64,
    pub pages_scanned: u64,
    pub matches: u64,
    pub crops_saved: u64,
    pub finished_at: DateTime<Utc>,
}

impl StatsSummary {
    /// Log the summary at info level
    pub fn log(&self) {
        tracing::info!(
            attempts = self.attempts,
            successes = self.successes,
            failures = self.failures,
            retries_exhausted = self.retries_exhausted,
            documents_processed = self.documents_processed,
            documents_failed = self.documents_failed,
            pages_scanned = self.pages_scanned,
            matches = self.matches,
            crops_saved = self.crops_saved,
            "Run summary"
        );
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}
