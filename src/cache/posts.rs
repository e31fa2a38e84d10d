// SPDX-License-Identifier: MPL-2.0

use crate::atproto::{Author, PostStub};
use crate::cache::db::read_date;
use crate::cache::{CacheDb, CacheError};
use crate::model::format_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

/// A rendered post. Written once per CID and never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPost {
    pub cid: String,
    pub uri: String,
    pub url: String,
    pub html: String,
    pub published_at: DateTime<Utc>,
    pub author_did: String,
    pub author_handle: String,
    pub author_name: Option<String>,
    pub title: String,
}

impl StoredPost {
    /// Display name if set and non-blank, otherwise the handle
    pub fn author_label(&self) -> &str {
        self.author_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.author_handle)
    }
}

/// Cache operations for posts
pub struct PostCache<'a> {
    db: &'a CacheDb,
}

impl<'a> PostCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    pub fn exists(&self, cid: &str) -> Result<bool, CacheError> {
        let conn = self.db.conn();
        Ok(Self::exists_in(&conn, cid)?)
    }

    pub(crate) fn exists_in(conn: &Connection, cid: &str) -> rusqlite::Result<bool> {
        conn.prepare_cached("SELECT 1 FROM posts WHERE cid = ?")?
            .exists([cid])
    }

    /// Get post by CID
    pub fn get(&self, cid: &str) -> Result<StoredPost, CacheError> {
        let conn = self.db.conn();

        let mut stmt = conn.prepare(
            r#"
            SELECT cid, uri, url, html, published_at, author_did, author_handle, author_name, title
            FROM posts
            WHERE cid = ?
            "#,
        )?;

        stmt.query_row([cid], Self::row_to_post)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => CacheError::NotFound,
                other => CacheError::Database(other),
            })
    }

    /// Identity of a stored post, enough to link to it and name its author
    pub fn stub(&self, cid: &str) -> Result<Option<PostStub>, CacheError> {
        let conn = self.db.conn();

        let stub = conn
            .query_row(
                "SELECT uri, cid, author_did, author_handle, author_name FROM posts WHERE cid = ?",
                [cid],
                |row| {
                    Ok(PostStub {
                        uri: row.get(0)?,
                        cid: row.get(1)?,
                        author: Author::minimal(row.get(2)?, row.get(3)?, row.get(4)?, None),
                    })
                },
            )
            .optional()?;

        Ok(stub)
    }

    /// Insert unless the CID is already stored. Returns whether a row was written.
    pub(crate) fn insert_in(
        conn: &Connection,
        post: &StoredPost,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<bool> {
        let changed = conn.execute(
            r#"
            INSERT OR IGNORE INTO posts (
                cid, uri, url, html, published_at,
                author_did, author_handle, author_name, title, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                post.cid,
                post.uri,
                post.url,
                post.html,
                format_timestamp(&post.published_at),
                post.author_did,
                post.author_handle,
                post.author_name,
                post.title,
                now.timestamp(),
            ],
        )?;

        Ok(changed > 0)
    }

    /// Convert a row selected in `get` column order
    pub(crate) fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<StoredPost> {
        Ok(StoredPost {
            cid: row.get(0)?,
            uri: row.get(1)?,
            url: row.get(2)?,
            html: row.get(3)?,
            published_at: read_date(row, 4)?,
            author_did: row.get(5)?,
            author_handle: row.get(6)?,
            author_name: row.get(7)?,
            title: row.get(8)?,
        })
    }
}
