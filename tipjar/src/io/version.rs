//! Deployed version lookup.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

/// Version shown when the real one cannot be determined.
pub const UNKNOWN_VERSION: &str = "x";

/// Read the deployed version from `path` (trimmed, must be non-empty).
pub fn get_version(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let version = raw.trim();
    if version.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_trimmed_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("version.txt");
        fs::write(&path, "12.3.4\n").expect("write");
        assert_eq!(get_version(&path).expect("version"), "12.3.4");
    }

    #[test]
    fn missing_or_empty_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("version.txt");
        assert!(get_version(&path).is_err());
        fs::write(&path, "  \n").expect("write");
        let err = get_version(&path).expect_err("empty");
        assert!(err.to_string().contains("is empty"));
    }
}
