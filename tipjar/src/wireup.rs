//! Startup wiring: turns an [`AppConfig`] into a ready [`Website`] and starts
//! the periodic jobs.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::username::RestrictedUsernames;
use crate::cron::{self, CronJob};
use crate::io::config::AppConfig;
use crate::io::db::Database;
use crate::io::stats::update_global_stats;
use crate::io::tracker::{ErrorTracker, make_tracker};
use crate::io::version::{UNKNOWN_VERSION, get_version};

/// Everything request handlers and jobs share.
#[derive(Clone)]
pub struct Website {
    pub config: Arc<AppConfig>,
    pub version: String,
    pub tracker: Arc<dyn ErrorTracker>,
    pub db: Arc<Database>,
    pub restricted: Arc<RestrictedUsernames>,
}

/// Build the website from configuration.
///
/// A missing version does not stop startup: the version becomes `"x"` and the
/// failure is reported once the tracker exists.
pub fn wire_up(config: AppConfig) -> Result<Website> {
    let tracker = make_tracker(&config);
    let db = Database::open(&config.database_path)?;
    wire_up_with(config, tracker, db)
}

/// Like [`wire_up`], with an explicit tracker and database.
pub fn wire_up_with(
    config: AppConfig,
    tracker: Arc<dyn ErrorTracker>,
    db: Database,
) -> Result<Website> {
    let (version, version_err) = match get_version(&config.version_file) {
        Ok(version) => (version, None),
        Err(err) => (UNKNOWN_VERSION.to_string(), Some(err)),
    };

    let restricted = username_restrictions(&config)?;
    info!(
        version = %version,
        restricted = restricted.len(),
        database = %config.database_path.display(),
        "website wired up"
    );

    if let Some(err) = version_err {
        let err = err.context("resolve version");
        warn!(error = %format!("{err:#}"), "falling back to unknown version");
        tracker.report(&err);
    }

    Ok(Website {
        config: Arc::new(config),
        version,
        tracker,
        db: Arc::new(db),
        restricted: Arc::new(restricted),
    })
}

/// Built-in names, configured names, and the top-level entries of `www_root`.
pub fn username_restrictions(config: &AppConfig) -> Result<RestrictedUsernames> {
    let mut restricted = RestrictedUsernames::default();
    restricted.extend(&config.restricted_usernames);
    restricted.extend(top_level_names(&config.www_root)?);
    Ok(restricted)
}

fn top_level_names(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    let entries = fs::read_dir(root).with_context(|| format!("read {}", root.display()))?;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "skipping unreadable www entry");
                continue;
            }
        };
        let path = entry.path();
        let name = if path.is_dir() {
            path.file_name()
        } else {
            path.file_stem()
        };
        if let Some(name) = name.and_then(|n| n.to_str())
            && !name.starts_with('.')
            && !name.starts_with('%')
        {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Start the global stats refresh and the (exclusive) database self check.
pub fn start_periodic_jobs(website: &Website) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();

    let db = website.db.clone();
    let stats_job = CronJob::every_secs(
        "update-global-stats",
        website.config.update_global_stats_every,
    );
    handles.extend(cron::spawn(
        stats_job,
        website.db.clone(),
        website.tracker.clone(),
        move || update_global_stats(&db).map(|_| ()),
    )?);

    let db = website.db.clone();
    let check_job = CronJob::every_secs("check-db", website.config.check_db_every).exclusive();
    handles.extend(cron::spawn(
        check_job,
        website.db.clone(),
        website.tracker.clone(),
        move || db.self_check(),
    )?);

    Ok(handles)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::io::stats::global_stats;
    use crate::io::tracker::RecordingTracker;

    #[test]
    fn missing_version_falls_back_and_reports() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = AppConfig {
            version_file: temp.path().join("version.txt"),
            www_root: temp.path().join("www"),
            ..AppConfig::default()
        };
        let tracker = Arc::new(RecordingTracker::new());
        let db = Database::open_in_memory().expect("db");
        let website = wire_up_with(config, tracker.clone(), db).expect("wire up");

        assert_eq!(website.version, "x");
        let reports = tracker.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("resolve version"), "{reports:?}");
    }

    #[test]
    fn www_entries_become_restricted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let www = temp.path().join("www");
        fs::create_dir_all(www.join("discover")).expect("mkdir");
        fs::write(www.join("privacy.html"), "").expect("write");
        fs::write(www.join("%username.html"), "").expect("write");
        let config = AppConfig {
            www_root: www,
            restricted_usernames: vec!["Admin".to_string()],
            ..AppConfig::default()
        };

        let restricted = username_restrictions(&config).expect("restrictions");
        assert!(restricted.contains("privacy"));
        assert!(restricted.contains("discover"));
        assert!(restricted.contains("admin"));
        assert!(restricted.contains("assets"));
        assert!(!restricted.contains("%username"));
    }

    #[test]
    fn periodic_jobs_refresh_stats() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("version.txt"), "1.0.0").expect("write");
        let config = AppConfig {
            version_file: temp.path().join("version.txt"),
            www_root: temp.path().join("www"),
            update_global_stats_every: 1,
            check_db_every: 0,
            ..AppConfig::default()
        };
        let tracker = Arc::new(RecordingTracker::new());
        let db = Database::open_in_memory().expect("db");
        let website = wire_up_with(config, tracker.clone(), db).expect("wire up");
        assert_eq!(website.version, "1.0.0");

        let handles = start_periodic_jobs(&website).expect("start");
        assert_eq!(handles.len(), 1, "disabled self check must not start");

        let deadline = Instant::now() + Duration::from_secs(5);
        while global_stats(&website.db).expect("load").is_none() {
            assert!(Instant::now() < deadline, "stats never refreshed");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(tracker.reports().is_empty());
    }
}
