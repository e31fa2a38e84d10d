// SPDX-License-Identifier: MPL-2.0

use crate::config::{APP_ID, PUBLIC_API};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Runtime settings, persisted as JSON. Every field has a default so a partial
/// file only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// AppView base URL used for all upstream calls
    pub service_url: String,
    /// SQLite database path; defaults to the XDG data directory
    pub database_path: Option<PathBuf>,
    /// Minimum seconds between upstream fetches for one (identity, filter)
    pub cooldown_secs: u64,
    /// Seconds before a handle -> DID mapping is resolved again
    pub handle_refresh_secs: u64,
    /// Maximum entries in a rendered feed
    pub page_size: usize,
    /// Maximum timeline pages requested in one ingestion pass
    pub max_pages: usize,
    /// How far back a pass keeps paging once a watermark exists
    pub max_backfill_secs: u64,
    pub request_timeout_secs: u64,
    /// Refuse profiles that ask to be hidden from logged-out viewers
    pub skip_auth_required_profiles: bool,
    /// Public base URL of the feed server, used for the feed's self link
    pub feed_base_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_url: PUBLIC_API.to_string(),
            database_path: None,
            cooldown_secs: 3600,
            handle_refresh_secs: 7 * 24 * 60 * 60,
            page_size: 100,
            max_pages: 10,
            max_backfill_secs: 24 * 60 * 60,
            request_timeout_secs: 10,
            skip_auth_required_profiles: false,
            feed_base_url: None,
        }
    }
}

impl Settings {
    /// Get the settings file path (~/.config/bsky-feeds/settings.json)
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push(APP_ID);
            p.push("settings.json");
            p
        })
    }

    /// Load settings from the default location, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load settings from `path`. A missing file is normal; a broken one is logged.
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return Self::default(),
        };

        match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable settings file");
                Self::default()
            }
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn handle_refresh(&self) -> Duration {
        Duration::from_secs(self.handle_refresh_secs)
    }

    pub fn max_backfill(&self) -> Duration {
        Duration::from_secs(self.max_backfill_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
