//! Side-effecting operations: configuration files, the database, error
//! tracking, and version lookup.

pub mod config;
pub mod db;
pub mod participants;
pub mod stats;
pub mod tracker;
pub mod version;

use anyhow::{Result, anyhow};
use chrono::{SecondsFormat, TimeDelta, Utc};

/// Current UTC time as RFC 3339 with second precision (`2026-01-02T03:04:05Z`).
///
/// This fixed-width form sorts lexicographically, so stored timestamps can be
/// compared directly in SQL.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `days` from now in the same format as [`now_rfc3339`]; errors if the date
/// is out of range.
pub(crate) fn rfc3339_in_days(days: u32) -> Result<String> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| anyhow!("{days} days from now is out of range"))
}
