//! Error tracking: the sink for failures that must not crash the process.

use std::sync::{Arc, Mutex};

use tracing::error;

use crate::io::config::AppConfig;

/// Receives errors that were caught and swallowed (startup fallbacks,
/// periodic job failures, 5xx responses).
pub trait ErrorTracker: Send + Sync {
    fn report(&self, err: &anyhow::Error);
}

/// Reports to the `tipjar::tracker` log target with the full cause chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTracker;

impl ErrorTracker for TracingTracker {
    fn report(&self, err: &anyhow::Error) {
        error!(target: "tipjar::tracker", error = %format!("{err:#}"), "error reported");
    }
}

/// Drops every report. Used when error tracking is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl ErrorTracker for NullTracker {
    fn report(&self, _err: &anyhow::Error) {}
}

/// Keeps rendered reports in memory so callers can inspect them.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    reports: Mutex<Vec<String>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far, rendered with `{:#}`.
    pub fn reports(&self) -> Vec<String> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }
}

impl ErrorTracker for RecordingTracker {
    fn report(&self, err: &anyhow::Error) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(format!("{err:#}"));
        }
    }
}

/// Build the tracker selected by `config.error_tracking`.
pub fn make_tracker(config: &AppConfig) -> Arc<dyn ErrorTracker> {
    if config.error_tracking {
        Arc::new(TracingTracker)
    } else {
        Arc::new(NullTracker)
    }
}
