//! SQLite access: connection, schema, advisory locks, and self checks.
//!
//! One `Database` owns one connection. The periodic jobs and the request
//! handlers share it through an `Arc`; the connection itself is guarded by a
//! mutex so statements never interleave.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use rand::Rng;
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use crate::io::now_rfc3339;

/// Advisory lock key that elects the single instance running exclusive jobs.
pub const JOBS_LOCK_KEY: i64 = 0;

/// Cooperative mutual exclusion across every process sharing the database.
pub trait AdvisoryLock: Send + Sync {
    /// Try to take the lock. Returns whether the caller holds it afterwards.
    fn try_lock(&self) -> Result<bool>;
}

pub struct Database {
    conn: Mutex<Connection>,
    /// Identifies this connection's advisory locks.
    holder: String,
}

impl Database {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS participants (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL,
            username_lower TEXT NOT NULL UNIQUE,
            claimed_time TEXT,
            is_free_rider INTEGER,
            usage_cents INTEGER NOT NULL DEFAULT 0,
            session_token TEXT UNIQUE,
            session_expires TEXT
        );

        CREATE TABLE IF NOT EXISTS global_stats (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            nactive INTEGER NOT NULL,
            weekly_usage_cents INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS advisory_locks (
            key INTEGER PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at TEXT NOT NULL
        );
    ";

    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set busy timeout")?;
        Self::initialize(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(Self::SCHEMA)
            .context("create database schema")?;
        let holder = hex::encode(rand::thread_rng().r#gen::<[u8; 16]>());
        Ok(Self {
            conn: Mutex::new(conn),
            holder,
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Try to take the advisory lock `key` for this connection.
    ///
    /// Returns true when this connection holds the lock after the call,
    /// including when it already held it.
    pub fn try_advisory_lock(&self, key: i64) -> Result<bool> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO advisory_locks (key, holder, acquired_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO NOTHING",
            params![key, self.holder, now_rfc3339()],
        )
        .with_context(|| format!("acquire advisory lock {key}"))?;
        let holder: String = conn
            .query_row(
                "SELECT holder FROM advisory_locks WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .with_context(|| format!("read advisory lock {key}"))?;
        let held = holder == self.holder;
        debug!(key, held, "advisory lock attempt");
        Ok(held)
    }

    /// Release every advisory lock held by this connection.
    pub fn release_advisory_locks(&self) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM advisory_locks WHERE holder = ?1",
            params![self.holder],
        )
        .context("release advisory locks")
    }

    /// Remove every advisory lock regardless of holder.
    ///
    /// For recovering after a process died without releasing its locks.
    pub fn clear_advisory_locks(&self) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM advisory_locks", [])
            .context("clear advisory locks")
    }

    /// Check data consistency, failing with every violation found.
    pub fn self_check(&self) -> Result<()> {
        let conn = self.conn()?;
        let mut violations = Vec::new();

        let checks: [(&str, &str); 3] = [
            (
                "SELECT username FROM participants WHERE username_lower != lower(username)",
                "username_lower out of sync",
            ),
            (
                "SELECT username FROM participants
                 WHERE claimed_time IS NULL AND session_token IS NOT NULL",
                "unclaimed participant has a session",
            ),
            (
                "SELECT username FROM participants WHERE usage_cents < 0",
                "negative usage",
            ),
        ];
        for (sql, label) in checks {
            let mut stmt = conn.prepare(sql).context("prepare self check")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .context("run self check")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("read self check rows")?;
            for name in names {
                violations.push(format!("{label}: {name}"));
            }
        }

        let stats: Option<(i64, i64)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT nactive, (SELECT count(*) FROM participants) FROM global_stats",
                )
                .context("prepare stats check")?;
            let mut rows = stmt.query([]).context("run stats check")?;
            match rows.next().context("read stats check")? {
                Some(row) => Some((row.get(0)?, row.get(1)?)),
                None => None,
            }
        };
        if let Some((nactive, total)) = stats
            && nactive > total
        {
            violations.push(format!(
                "global stats count {nactive} active participants out of {total}"
            ));
        }

        if !violations.is_empty() {
            bail!("database self check failed:\n- {}", violations.join("\n- "));
        }
        debug!("database self check passed");
        Ok(())
    }
}

impl AdvisoryLock for Database {
    fn try_lock(&self) -> Result<bool> {
        self.try_advisory_lock(JOBS_LOCK_KEY)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.release_advisory_locks() {
            warn!(error = %format!("{err:#}"), "failed to release advisory locks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_lock_is_exclusive_across_connections() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("db.sqlite3");
        let first = Database::open(&path).expect("open first");
        let second = Database::open(&path).expect("open second");

        assert!(first.try_lock().expect("first lock"));
        assert!(first.try_lock().expect("relock is idempotent"));
        assert!(!second.try_lock().expect("second lock"));
        assert!(second.try_advisory_lock(7).expect("other key"));
    }

    #[test]
    fn advisory_lock_is_released_on_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("db.sqlite3");
        let first = Database::open(&path).expect("open first");
        let second = Database::open(&path).expect("open second");

        assert!(first.try_lock().expect("first lock"));
        drop(first);
        assert!(second.try_lock().expect("lock after release"));
    }

    #[test]
    fn clearing_locks_frees_them_for_others() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("db.sqlite3");
        let first = Database::open(&path).expect("open first");
        let second = Database::open(&path).expect("open second");

        assert!(first.try_lock().expect("first lock"));
        assert_eq!(second.clear_advisory_locks().expect("clear"), 1);
        assert!(second.try_lock().expect("lock after clear"));
    }

    #[test]
    fn self_check_passes_on_clean_database() {
        let db = Database::open_in_memory().expect("open");
        db.self_check().expect("clean");
    }

    #[test]
    fn self_check_reports_every_violation() {
        let db = Database::open_in_memory().expect("open");
        {
            let conn = db.conn().expect("conn");
            conn.execute_batch(
                "INSERT INTO participants (username, username_lower, usage_cents)
                 VALUES ('Alice', 'bob', 0), ('carl', 'carl', -5);
                 INSERT INTO participants (username, username_lower, session_token)
                 VALUES ('dana', 'dana', 'tok');",
            )
            .expect("seed");
        }
        let err = db.self_check().expect_err("violations");
        let message = err.to_string();
        assert!(message.contains("username_lower out of sync: Alice"), "{message}");
        assert!(message.contains("negative usage: carl"), "{message}");
        assert!(
            message.contains("unclaimed participant has a session: dana"),
            "{message}"
        );
    }
}
