//! Application configuration: a TOML file plus environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Longest allowed sign-in session (about ten years).
pub const MAX_SESSION_DAYS: u32 = 3650;

/// Site configuration (TOML).
///
/// Missing fields default to values suitable for local development. Every
/// deploy-sensitive field can also be overridden from the environment, see
/// [`AppConfig::apply_env`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// `http` or `https`; requests arriving with another scheme are redirected.
    pub canonical_scheme: String,

    /// Host (with optional port) requests are redirected to. Empty disables
    /// canonical redirects.
    pub canonical_host: String,

    /// Seconds between global stats refreshes. `<= 0` disables the job.
    pub update_global_stats_every: i64,

    /// Seconds between database self checks. `<= 0` disables the job.
    pub check_db_every: i64,

    /// Serve 304s and long-lived caching headers for `/assets/`.
    pub cache_static: bool,

    /// Forward errors to the error tracker (logged at `error` level).
    pub error_tracking: bool,

    /// File holding the deployed version string.
    pub version_file: PathBuf,

    /// Site root: `assets/` lives here and top-level entries are reserved usernames.
    pub www_root: PathBuf,

    /// Extra usernames nobody may claim.
    pub restricted_usernames: Vec<String>,

    /// Lifetime of a sign-in session, in days.
    pub session_days: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("tipjar.sqlite3"),
            canonical_scheme: "http".to_string(),
            canonical_host: String::new(),
            update_global_stats_every: 600,
            check_db_every: 600,
            cache_static: false,
            error_tracking: true,
            version_file: PathBuf::from("version.txt"),
            www_root: PathBuf::from("www"),
            restricted_usernames: Vec::new(),
            session_days: 7,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(anyhow!("database_path must not be empty"));
        }
        if !matches!(self.canonical_scheme.as_str(), "http" | "https") {
            return Err(anyhow!(
                "canonical_scheme must be http or https, got {:?}",
                self.canonical_scheme
            ));
        }
        if self.canonical_host.contains('/') {
            return Err(anyhow!("canonical_host must be a bare host[:port]"));
        }
        if self.session_days == 0 || self.session_days > MAX_SESSION_DAYS {
            return Err(anyhow!(
                "session_days must be between 1 and {MAX_SESSION_DAYS}, got {}",
                self.session_days
            ));
        }
        Ok(())
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DATABASE_PATH") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("CANONICAL_SCHEME") {
            self.canonical_scheme = value;
        }
        if let Some(value) = lookup("CANONICAL_HOST") {
            self.canonical_host = value;
        }
        if let Some(value) = lookup("UPDATE_GLOBAL_STATS_EVERY") {
            self.update_global_stats_every = parse_env("UPDATE_GLOBAL_STATS_EVERY", &value)?;
        }
        if let Some(value) = lookup("CHECK_DB_EVERY") {
            self.check_db_every = parse_env("CHECK_DB_EVERY", &value)?;
        }
        if let Some(value) = lookup("CACHE_STATIC") {
            self.cache_static = parse_bool("CACHE_STATIC", &value)?;
        }
        if let Some(value) = lookup("ERROR_TRACKING") {
            self.error_tracking = parse_bool("ERROR_TRACKING", &value)?;
        }
        if let Some(value) = lookup("VERSION_FILE") {
            self.version_file = PathBuf::from(value);
        }
        if let Some(value) = lookup("WWW_ROOT") {
            self.www_root = PathBuf::from(value);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid {name}={value:?}"))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(anyhow!("invalid {name}={value:?}: expected a boolean")),
    }
}

/// Load config from a TOML file, then apply process environment overrides.
///
/// If the file is missing, starts from `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let mut cfg = read_config_file(path)?;
    cfg.apply_env(|name| std::env::var(name).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_file_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = read_config_file(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AppConfig::default());
        cfg.validate().expect("default is valid");
    }

    #[test]
    fn file_fields_override_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tipjar.toml");
        fs::write(
            &path,
            "canonical_host = \"tipjar.test\"\ncheck_db_every = 0\nrestricted_usernames = [\"admin\"]\n",
        )
        .expect("write");
        let cfg = read_config_file(&path).expect("load");
        assert_eq!(cfg.canonical_host, "tipjar.test");
        assert_eq!(cfg.check_db_every, 0);
        assert_eq!(cfg.restricted_usernames, vec!["admin".to_string()]);
        assert_eq!(cfg.session_days, 7);
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = AppConfig::default();
        cfg.apply_env(env(&[
            ("CANONICAL_SCHEME", "https"),
            ("UPDATE_GLOBAL_STATS_EVERY", "-1"),
            ("CACHE_STATIC", "yes"),
            ("DATABASE_PATH", "/tmp/x.db"),
        ]))
        .expect("apply");
        assert_eq!(cfg.canonical_scheme, "https");
        assert_eq!(cfg.update_global_stats_every, -1);
        assert!(cfg.cache_static);
        assert_eq!(cfg.database_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn env_rejects_bad_numbers() {
        let mut cfg = AppConfig::default();
        let err = cfg
            .apply_env(env(&[("CHECK_DB_EVERY", "soon")]))
            .expect_err("bad number");
        assert!(err.to_string().contains("CHECK_DB_EVERY"));
    }

    #[test]
    fn validate_rejects_unknown_scheme() {
        let cfg = AppConfig {
            canonical_scheme: "ftp".to_string(),
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_bounds_session_days() {
        let at_cap = AppConfig {
            session_days: MAX_SESSION_DAYS,
            ..AppConfig::default()
        };
        at_cap.validate().expect("cap is allowed");

        for days in [0, MAX_SESSION_DAYS + 1, 200_000_000] {
            let cfg = AppConfig {
                session_days: days,
                ..AppConfig::default()
            };
            let err = cfg.validate().expect_err("out of range");
            assert!(err.to_string().contains("session_days"), "{err}");
        }
    }
}
