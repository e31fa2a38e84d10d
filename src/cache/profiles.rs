// SPDX-License-Identifier: MPL-2.0

use crate::atproto::{Author, ProfileRecord};
use crate::cache::db::read_unix;
use crate::cache::{CacheDb, CacheError};
use chrono::{DateTime, Utc};
use rusqlite::params;

/// A profile row as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedProfile {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub description: Option<String>,
    pub requires_auth: bool,
    pub fetched_at: DateTime<Utc>,
    /// Fetched as a feed owner rather than seen as a post author
    pub is_full: bool,
}

impl CachedProfile {
    /// Display name if set and non-blank, otherwise the handle
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.handle)
    }
}

/// Cache operations for profiles
pub struct ProfileCache<'a> {
    db: &'a CacheDb,
}

impl<'a> ProfileCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Store a full profile (upserts, overwrites minimal)
    pub fn store_full(&self, profile: &ProfileRecord, now: DateTime<Utc>) -> Result<(), CacheError> {
        let conn = self.db.conn();

        conn.execute(
            r#"
            INSERT INTO profiles (
                did, handle, display_name, avatar, description, requires_auth,
                fetched_at, is_full
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
            ON CONFLICT(did) DO UPDATE SET
                handle = excluded.handle,
                display_name = excluded.display_name,
                avatar = excluded.avatar,
                description = excluded.description,
                requires_auth = excluded.requires_auth,
                fetched_at = excluded.fetched_at,
                is_full = 1
            "#,
            params![
                profile.did,
                profile.handle,
                profile.display_name,
                profile.avatar,
                profile.description,
                profile.requires_auth,
                now.timestamp(),
            ],
        )?;

        Ok(())
    }

    /// Store the author view embedded in a post. Never downgrades a full
    /// profile; fields the view leaves empty keep their stored values.
    pub fn store_minimal(&self, author: &Author, now: DateTime<Utc>) -> Result<(), CacheError> {
        let conn = self.db.conn();

        conn.execute(
            r#"
            INSERT INTO profiles (did, handle, display_name, avatar, fetched_at, is_full)
            VALUES (?1, ?2, ?3, ?4, ?5, 0)
            ON CONFLICT(did) DO UPDATE SET
                handle = excluded.handle,
                display_name = COALESCE(excluded.display_name, profiles.display_name),
                avatar = COALESCE(excluded.avatar, profiles.avatar),
                fetched_at = excluded.fetched_at
            WHERE profiles.is_full = 0
            "#,
            params![
                author.did,
                author.handle,
                author.display_name,
                author.avatar,
                now.timestamp(),
            ],
        )?;

        Ok(())
    }

    /// Get profile by DID
    pub fn get(&self, did: &str) -> Result<CachedProfile, CacheError> {
        let conn = self.db.conn();

        let mut stmt = conn.prepare(
            r#"
            SELECT
                did, handle, display_name, avatar, description, requires_auth,
                fetched_at, is_full
            FROM profiles
            WHERE did = ?
            "#,
        )?;

        let profile = stmt
            .query_row([did], |row| {
                Ok(CachedProfile {
                    did: row.get(0)?,
                    handle: row.get(1)?,
                    display_name: row.get(2)?,
                    avatar: row.get(3)?,
                    description: row.get(4)?,
                    requires_auth: row.get(5)?,
                    fetched_at: read_unix(row, 6)?,
                    is_full: row.get(7)?,
                })
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => CacheError::NotFound,
                other => CacheError::Database(other),
            })?;

        Ok(profile)
    }
}
