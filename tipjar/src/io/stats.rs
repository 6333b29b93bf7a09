//! Site-wide statistics refreshed by a periodic job.

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use tracing::info;

use crate::io::db::Database;
use crate::io::now_rfc3339;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalStats {
    /// Claimed participants.
    pub nactive: i64,
    /// Sum of every participant's weekly giving, in cents.
    pub weekly_usage_cents: i64,
    pub updated_at: String,
}

/// Recompute and store the global stats row.
pub fn update_global_stats(db: &Database) -> Result<GlobalStats> {
    let conn = db.conn()?;
    let (nactive, weekly_usage_cents): (i64, i64) = conn
        .query_row(
            "SELECT count(claimed_time), coalesce(sum(usage_cents), 0) FROM participants",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .context("aggregate participants")?;
    let updated_at = now_rfc3339();
    conn.execute(
        "INSERT INTO global_stats (id, nactive, weekly_usage_cents, updated_at)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
             nactive = excluded.nactive,
             weekly_usage_cents = excluded.weekly_usage_cents,
             updated_at = excluded.updated_at",
        params![nactive, weekly_usage_cents, updated_at],
    )
    .context("store global stats")?;
    info!(nactive, weekly_usage_cents, "global stats updated");
    Ok(GlobalStats {
        nactive,
        weekly_usage_cents,
        updated_at,
    })
}

/// Last stored stats, or `None` before the first refresh.
pub fn global_stats(db: &Database) -> Result<Option<GlobalStats>> {
    let conn = db.conn()?;
    conn.query_row(
        "SELECT nactive, weekly_usage_cents, updated_at FROM global_stats WHERE id = 1",
        [],
        |row| {
            Ok(GlobalStats {
                nactive: row.get(0)?,
                weekly_usage_cents: row.get(1)?,
                updated_at: row.get(2)?,
            })
        },
    )
    .optional()
    .context("load global stats")
}
