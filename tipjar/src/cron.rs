//! Periodic background jobs.
//!
//! Each job runs on its own detached thread, sleeping a fixed period between
//! runs. Exclusive jobs only run in the one process that holds the jobs
//! advisory lock; once taken, the lock is kept for the life of the lock owner.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info};

use crate::io::db::AdvisoryLock;
use crate::io::tracker::ErrorTracker;

/// Schedule for one periodic job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronJob {
    pub name: String,
    /// Time between runs; `None` disables the job.
    pub period: Option<Duration>,
    /// Only run while holding the jobs advisory lock.
    pub exclusive: bool,
}

impl CronJob {
    pub fn every(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            period: (!period.is_zero()).then_some(period),
            exclusive: false,
        }
    }

    /// Period in whole seconds as configured; `<= 0` disables the job.
    pub fn every_secs(name: impl Into<String>, secs: i64) -> Self {
        let period = u64::try_from(secs).unwrap_or(0);
        Self::every(name, Duration::from_secs(period))
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// Start `action` on a background thread according to `job`.
///
/// Returns `None` (and starts nothing) when the job is disabled. The thread
/// is never joined by the caller; it ends with the process.
pub fn spawn<F>(
    job: CronJob,
    lock: Arc<dyn AdvisoryLock>,
    tracker: Arc<dyn ErrorTracker>,
    mut action: F,
) -> Result<Option<JoinHandle<()>>>
where
    F: FnMut() -> Result<()> + Send + 'static,
{
    let Some(period) = job.period else {
        info!(job = %job.name, "periodic job disabled");
        return Ok(None);
    };
    info!(
        job = %job.name,
        period_ms = period.as_millis() as u64,
        exclusive = job.exclusive,
        "starting periodic job"
    );

    let name = job.name.clone();
    let handle = thread::Builder::new()
        .name(format!("cron-{}", job.name))
        .spawn(move || {
            let mut has_lock = false;
            loop {
                let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<()> {
                    if job.exclusive && !has_lock {
                        has_lock = lock.try_lock().context("try jobs advisory lock")?;
                        if has_lock {
                            info!(job = %job.name, "acquired jobs advisory lock");
                        }
                    }
                    if !job.exclusive || has_lock {
                        action()?;
                    } else {
                        debug!(job = %job.name, "jobs lock held elsewhere; skipping");
                    }
                    Ok(())
                }));

                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err),
                    Err(payload) => Some(anyhow!("panicked: {}", panic_message(&*payload))),
                };
                if let Some(err) = failure {
                    let err = err.context(format!("periodic job {} failed", job.name));
                    tracker.report(&err);
                    error!(job = %job.name, error = %format!("{err:#}"), "periodic job failed");
                }

                thread::sleep(period);
            }
        })
        .with_context(|| format!("spawn periodic job {name}"))?;

    Ok(Some(handle))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
