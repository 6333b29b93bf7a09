//! Participant records: creation, sessions, and username changes.

use anyhow::{Context, Result, bail};
use rand::Rng;
use rusqlite::{ErrorCode, OptionalExtension, Row, params};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::core::username::{RestrictedUsernames, UsernameError, validate_username};
use crate::io::db::Database;
use crate::io::{now_rfc3339, rfc3339_in_days};

/// A user of the platform, as seen by request handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub id: i64,
    pub username: String,
    /// When the account was claimed; `None` for placeholder accounts.
    pub claimed_time: Option<String>,
    /// Whether they chose not to support the platform; `None` if never asked.
    pub is_free_rider: Option<bool>,
    /// Weekly amount given, in cents.
    pub usage_cents: i64,
}

impl Participant {
    pub fn is_claimed(&self) -> bool {
        self.claimed_time.is_some()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            claimed_time: row.get("claimed_time")?,
            is_free_rider: row.get("is_free_rider")?,
            usage_cents: row.get("usage_cents")?,
        })
    }
}

const PARTICIPANT_COLUMNS: &str = "id, username, claimed_time, is_free_rider, usage_cents";

/// Why a username change was refused.
#[derive(Debug, Error)]
pub enum ChangeUsernameError {
    #[error(transparent)]
    Invalid(#[from] UsernameError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::ConstraintViolation
    )
}

impl Database {
    /// Insert a participant without validating the username (fixtures and admin use).
    pub fn make_participant(&self, username: &str, claimed: bool) -> Result<Participant> {
        let claimed_time = claimed.then(now_rfc3339);
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO participants (username, username_lower, claimed_time)
                 VALUES (?1, ?2, ?3)",
                params![username, username.to_lowercase(), claimed_time],
            )
            .with_context(|| format!("insert participant {username}"))?;
            conn.last_insert_rowid()
        };
        info!(username, claimed, "participant created");
        self.participant_by_id(id)?
            .with_context(|| format!("participant {id} vanished after insert"))
    }

    pub fn participant_by_id(&self, id: i64) -> Result<Option<Participant>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?1"),
            params![id],
            Participant::from_row,
        )
        .optional()
        .with_context(|| format!("load participant {id}"))
    }

    /// Look up a participant by username, ignoring case.
    pub fn participant_by_username(&self, username: &str) -> Result<Option<Participant>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE username_lower = ?1"),
            params![username.to_lowercase()],
            Participant::from_row,
        )
        .optional()
        .with_context(|| format!("load participant {username}"))
    }

    pub fn set_usage(&self, id: i64, usage_cents: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE participants SET usage_cents = ?2 WHERE id = ?1",
            params![id, usage_cents],
        )
        .with_context(|| format!("set usage for participant {id}"))?;
        Ok(())
    }

    pub fn set_free_rider(&self, id: i64, is_free_rider: Option<bool>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE participants SET is_free_rider = ?2 WHERE id = ?1",
            params![id, is_free_rider],
        )
        .with_context(|| format!("set free rider flag for participant {id}"))?;
        Ok(())
    }

    /// Start a sign-in session lasting `days`, returning its token.
    pub fn start_session(&self, id: i64, days: u32) -> Result<String> {
        let Some(participant) = self.participant_by_id(id)? else {
            bail!("no participant with id {id}");
        };
        if !participant.is_claimed() {
            bail!("participant {} is not claimed", participant.username);
        }
        let expires = rfc3339_in_days(days)?;
        let token = hex::encode(rand::thread_rng().r#gen::<[u8; 24]>());
        let conn = self.conn()?;
        conn.execute(
            "UPDATE participants SET session_token = ?2, session_expires = ?3 WHERE id = ?1",
            params![id, token, expires],
        )
        .with_context(|| format!("start session for {}", participant.username))?;
        Ok(token)
    }

    /// Push an existing session's expiry out to `days` from now.
    pub fn extend_session(&self, token: &str, days: u32) -> Result<()> {
        let expires = rfc3339_in_days(days)?;
        let conn = self.conn()?;
        conn.execute(
            "UPDATE participants SET session_expires = ?2 WHERE session_token = ?1",
            params![token, expires],
        )
        .context("extend session")?;
        Ok(())
    }

    pub fn end_session(&self, token: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE participants SET session_token = NULL, session_expires = NULL
             WHERE session_token = ?1",
            params![token],
        )
        .context("end session")?;
        Ok(())
    }

    /// Participant owning an unexpired session, if any.
    pub fn participant_for_session(&self, token: &str) -> Result<Option<Participant>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants
                 WHERE session_token = ?1
                   AND session_expires > ?2
                   AND claimed_time IS NOT NULL"
            ),
            params![token, now_rfc3339()],
            Participant::from_row,
        )
        .optional()
        .context("load session participant")
    }

    /// Validate `suggested` and rename participant `id` to it.
    ///
    /// Returns the stored (trimmed) username. Changing only the letter case
    /// of one's own name is allowed.
    pub fn change_username(
        &self,
        id: i64,
        suggested: &str,
        restricted: &RestrictedUsernames,
    ) -> Result<String, ChangeUsernameError> {
        let username = validate_username(suggested, restricted)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE participants SET username = ?2, username_lower = ?3 WHERE id = ?1",
            params![id, username, username.to_lowercase()],
        );
        match updated {
            Ok(0) => Err(anyhow::anyhow!("no participant with id {id}").into()),
            Ok(_) => {
                info!(id, username = %username, "username changed");
                Ok(username)
            }
            Err(err) if is_unique_violation(&err) => {
                Err(UsernameError::AlreadyTaken(username).into())
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("rename participant {id}"))
                .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().expect("open")
    }

    #[test]
    fn lookup_ignores_case() {
        let db = db();
        let alice = db.make_participant("Alice", true).expect("make");
        let found = db
            .participant_by_username("aLiCe")
            .expect("query")
            .expect("found");
        assert_eq!(found, alice);
        assert!(found.is_claimed());
    }

    #[test]
    fn change_username_updates_record() {
        let db = db();
        let alice = db.make_participant("alice", true).expect("make");
        let restricted = RestrictedUsernames::default();
        let new = db
            .change_username(alice.id, "  bob ", &restricted)
            .expect("change");
        assert_eq!(new, "bob");
        assert!(db.participant_by_username("alice").expect("query").is_none());
        assert_eq!(
            db.participant_by_id(alice.id)
                .expect("query")
                .expect("found")
                .username,
            "bob"
        );
    }

    #[test]
    fn change_username_to_taken_name_fails() {
        let db = db();
        let alice = db.make_participant("alice", true).expect("make");
        db.make_participant("bob", false).expect("make");
        let err = db
            .change_username(alice.id, "BOB", &RestrictedUsernames::default())
            .expect_err("taken");
        assert!(matches!(
            err,
            ChangeUsernameError::Invalid(UsernameError::AlreadyTaken(ref name)) if name == "BOB"
        ));
    }

    #[test]
    fn case_only_change_is_allowed() {
        let db = db();
        let alice = db.make_participant("alice", true).expect("make");
        let new = db
            .change_username(alice.id, "Alice", &RestrictedUsernames::default())
            .expect("change");
        assert_eq!(new, "Alice");
    }

    #[test]
    fn sessions_resolve_to_claimed_participants() {
        let db = db();
        let alice = db.make_participant("alice", true).expect("make");
        let token = db.start_session(alice.id, 1).expect("session");
        let found = db
            .participant_for_session(&token)
            .expect("query")
            .expect("found");
        assert_eq!(found.id, alice.id);

        db.end_session(&token).expect("end");
        assert!(db.participant_for_session(&token).expect("query").is_none());
    }

    #[test]
    fn unclaimed_participants_cannot_sign_in() {
        let db = db();
        let stub = db.make_participant("stub", false).expect("make");
        assert!(db.start_session(stub.id, 1).is_err());
    }

    #[test]
    fn out_of_range_session_length_is_an_error() {
        let db = db();
        let alice = db.make_participant("alice", true).expect("make");
        assert!(db.start_session(alice.id, u32::MAX).is_err());

        let token = db.start_session(alice.id, 1).expect("session");
        assert!(db.extend_session(&token, u32::MAX).is_err());
        assert!(db.participant_for_session(&token).expect("query").is_some());
    }
}
