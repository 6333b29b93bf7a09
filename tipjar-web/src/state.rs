//! Shared application state for request handlers and pipeline stages.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tipjar::io::config::AppConfig;
use tipjar::io::db::Database;
use tipjar::io::tracker::ErrorTracker;
use tipjar::wireup::Website;

use crate::templates::Templates;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub website: Website,
    pub templates: Arc<Templates>,
    /// Entity tag for everything under `/assets/`; changes with each deploy.
    pub asset_etag: String,
}

impl AppState {
    pub fn new(website: Website) -> anyhow::Result<Self> {
        let templates = Arc::new(Templates::new()?);
        let asset_etag = asset_etag(&website.version);
        Ok(Self {
            website,
            templates,
            asset_etag,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.website.config
    }

    pub fn db(&self) -> &Database {
        &self.website.db
    }

    pub fn tracker(&self) -> &dyn ErrorTracker {
        self.website.tracker.as_ref()
    }

    pub fn version(&self) -> &str {
        &self.website.version
    }

    /// Whether cookies should carry the `Secure` flag.
    pub fn is_https(&self) -> bool {
        self.config().canonical_scheme == "https"
    }
}

/// Quoted entity tag derived from the deployed version.
fn asset_etag(version: &str) -> String {
    let digest = Sha256::digest(version.as_bytes());
    format!("\"{}\"", &hex::encode(digest)[..16])
}
