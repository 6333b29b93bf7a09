//! Test-only helpers for building a wired-up website with fixtures.

use std::sync::Arc;

use crate::io::config::AppConfig;
use crate::io::db::Database;
use crate::io::participants::Participant;
use crate::io::tracker::RecordingTracker;
use crate::wireup::{Website, wire_up_with};

/// A website backed by an in-memory database and a recording tracker.
pub struct Harness {
    pub website: Website,
    pub tracker: Arc<RecordingTracker>,
    /// Keeps `www_root` and the version file alive for the harness lifetime.
    pub dir: tempfile::TempDir,
}

impl Harness {
    /// Harness with default config, version `1.2.3`, and no periodic jobs.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Harness whose config is adjusted by `edit` before wiring up.
    pub fn with_config(edit: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let version_file = dir.path().join("version.txt");
        std::fs::write(&version_file, "1.2.3\n").expect("write version");
        let www_root = dir.path().join("www");
        std::fs::create_dir_all(www_root.join("assets")).expect("create www");

        let mut config = AppConfig {
            database_path: dir.path().join("unused.sqlite3"),
            version_file,
            www_root,
            update_global_stats_every: 0,
            check_db_every: 0,
            ..AppConfig::default()
        };
        edit(&mut config);

        let tracker = Arc::new(RecordingTracker::new());
        let db = Database::open_in_memory().expect("open db");
        let website = wire_up_with(config, tracker.clone(), db).expect("wire up");
        Self {
            website,
            tracker,
            dir,
        }
    }

    pub fn db(&self) -> &Database {
        &self.website.db
    }

    /// Create a participant; `claimed` ones can sign in.
    pub fn make_participant(&self, username: &str, claimed: bool) -> Participant {
        self.db()
            .make_participant(username, claimed)
            .expect("make participant")
    }

    /// Create a claimed participant and return them with a session token.
    pub fn signed_in(&self, username: &str) -> (Participant, String) {
        let participant = self.make_participant(username, true);
        let token = self
            .db()
            .start_session(participant.id, 1)
            .expect("start session");
        (participant, token)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
