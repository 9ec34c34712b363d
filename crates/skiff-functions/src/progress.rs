//! Progress reporting for function execution
//!
//! Functions push snapshots through a [`ProgressReporter`]. The engine
//! binds each phase to a [`LatestProgress`] slot and polls it, so a
//! function that never reports simply leaves the slot empty.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Progress snapshot from a running function
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    /// Completion percentage (0-100)
    pub percentage: u8,

    /// Human-readable status message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default)]
    pub uploaded_bytes: u64,

    #[serde(default)]
    pub downloaded_bytes: u64,

    #[serde(default)]
    pub estimated_upload_bytes: u64,

    #[serde(default)]
    pub estimated_download_bytes: u64,
}

impl Progress {
    /// Create a new progress snapshot
    pub fn new(percentage: u8, message: impl Into<String>) -> Self {
        Self {
            percentage: percentage.min(100),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Create a "completed" snapshot
    pub fn completed() -> Self {
        Self::new(100, "Completed")
    }

    /// Add upload counters; the percentage follows the ratio
    pub fn with_upload(mut self, uploaded: u64, estimated: u64) -> Self {
        self.uploaded_bytes = uploaded;
        self.estimated_upload_bytes = estimated;
        if estimated > 0 {
            self.percentage = ratio_percent(uploaded, estimated);
        }
        self
    }

    /// Add download counters; the percentage follows the ratio
    pub fn with_download(mut self, downloaded: u64, estimated: u64) -> Self {
        self.downloaded_bytes = downloaded;
        self.estimated_download_bytes = estimated;
        if estimated > 0 {
            self.percentage = ratio_percent(downloaded, estimated);
        }
        self
    }

    pub fn is_complete(&self) -> bool {
        self.percentage >= 100
    }
}

fn ratio_percent(done: u64, total: u64) -> u8 {
    ((done as f64 / total as f64) * 100.0).min(100.0) as u8
}

/// Trait for types that receive progress snapshots
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: Progress);
}

/// A reporter that drops every snapshot
#[derive(Debug, Default, Clone)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _progress: Progress) {}
}

/// Keeps only the newest snapshot
#[derive(Debug, Default)]
pub struct LatestProgress {
    latest: Mutex<Option<Progress>>,
}

impl LatestProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest snapshot, `None` if nothing was reported
    pub fn latest(&self) -> Option<Progress> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressReporter for LatestProgress {
    fn report(&self, progress: Progress) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(progress);
    }
}

/// A reporter that collects all snapshots
#[derive(Debug, Default)]
pub struct CollectingReporter {
    updates: Mutex<Vec<Progress>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<Progress> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, progress: Progress) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage_capped() {
        let p = Progress::new(150, "Test");
        assert_eq!(p.percentage, 100);
        assert!(p.is_complete());
    }

    #[test]
    fn test_progress_with_upload() {
        let p = Progress::new(0, "Uploading").with_upload(512 * 1024, 1024 * 1024);
        assert_eq!(p.uploaded_bytes, 512 * 1024);
        assert_eq!(p.estimated_upload_bytes, 1024 * 1024);
        assert_eq!(p.percentage, 50);
    }

    #[test]
    fn test_progress_with_unknown_total() {
        let p = Progress::new(30, "Downloading").with_download(4096, 0);
        assert_eq!(p.downloaded_bytes, 4096);
        assert_eq!(p.percentage, 30);
    }

    #[test]
    fn test_latest_progress_keeps_newest() {
        let slot = LatestProgress::new();
        assert!(slot.latest().is_none());

        slot.report(Progress::new(10, "start"));
        slot.report(Progress::new(60, "more"));

        assert_eq!(slot.latest().map(|p| p.percentage), Some(60));
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::new();
        reporter.report(Progress::new(0, "start"));
        reporter.report(Progress::completed());

        let updates = reporter.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].percentage, 100);
    }

    #[test]
    fn test_noop_reporter() {
        let reporter = NoopReporter;
        reporter.report(Progress::completed());
    }
}
