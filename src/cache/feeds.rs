// SPDX-License-Identifier: MPL-2.0

use crate::cache::db::{read_date, read_unix};
use crate::cache::{CacheDb, CacheError, PostCache, StoredPost};
use crate::model::{Category, FilterFlags, PostFilter, format_timestamp};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;

/// A post as it appeared in one owner's timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub owner_did: String,
    pub cid: String,
    /// Repost time for reposts, otherwise the post's creation time
    pub updated_at: DateTime<Utc>,
    pub categories: BTreeSet<Category>,
    pub flags: FilterFlags,
}

impl FeedItem {
    pub fn new(
        owner_did: &str,
        cid: &str,
        updated_at: DateTime<Utc>,
        categories: BTreeSet<Category>,
    ) -> Self {
        let flags = FilterFlags::from_categories(&categories);
        Self {
            owner_did: owner_did.to_string(),
            cid: cid.to_string(),
            updated_at,
            categories,
            flags,
        }
    }
}

/// A feed item joined with its post, ready for composition
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub post: StoredPost,
    pub updated_at: DateTime<Utc>,
    pub categories: BTreeSet<Category>,
}

/// Cooldown and watermark of one (owner, filter) feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    pub owner_did: String,
    pub filter: PostFilter,
    pub last_fetched_at: DateTime<Utc>,
    /// Newest item date seen by a completed pass
    pub latest_seen: Option<DateTime<Utc>>,
}

/// Cache operations for feeds
pub struct FeedCache<'a> {
    db: &'a CacheDb,
}

impl<'a> FeedCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Store a post and its feed item together. Neither is overwritten if
    /// already present. Returns whether the feed item is new.
    pub fn store_item(
        &self,
        post: &StoredPost,
        item: &FeedItem,
        now: DateTime<Utc>,
    ) -> Result<bool, CacheError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        PostCache::insert_in(&tx, post, now)?;
        let item_created = Self::link_in(&tx, item, now)?;

        tx.commit()?;
        Ok(item_created)
    }

    /// Add a feed item for a post that is already stored
    pub fn link_item(&self, item: &FeedItem, now: DateTime<Utc>) -> Result<bool, CacheError> {
        let conn = self.db.conn();
        Self::link_in(&conn, item, now)
    }

    fn link_in(conn: &Connection, item: &FeedItem, now: DateTime<Utc>) -> Result<bool, CacheError> {
        if !PostCache::exists_in(conn, &item.cid)? {
            return Err(CacheError::MissingPost(item.cid.clone()));
        }

        let categories_json = serde_json::to_string(&item.categories)?;

        let changed = conn.execute(
            r#"
            INSERT INTO feed_items (
                owner_did, cid, updated_at, categories_json,
                in_author_threads, in_with_replies, in_no_replies, in_with_media,
                fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(owner_did, cid) DO NOTHING
            "#,
            params![
                item.owner_did,
                item.cid,
                format_timestamp(&item.updated_at),
                categories_json,
                item.flags.author_threads,
                item.flags.with_replies,
                item.flags.no_replies,
                item.flags.with_media,
                now.timestamp(),
            ],
        )?;

        Ok(changed > 0)
    }

    /// Newest items of an owner's feed that belong to `filter`
    pub fn get_page(
        &self,
        owner_did: &str,
        filter: PostFilter,
        limit: usize,
    ) -> Result<Vec<FeedEntry>, CacheError> {
        let conn = self.db.conn();

        let sql = format!(
            r#"
            SELECT
                p.cid, p.uri, p.url, p.html, p.published_at,
                p.author_did, p.author_handle, p.author_name, p.title,
                fi.updated_at, fi.categories_json
            FROM feed_items fi
            JOIN posts p ON fi.cid = p.cid
            WHERE fi.owner_did = ? AND fi.{} = 1
            ORDER BY fi.updated_at DESC, fi.cid DESC
            LIMIT ?
            "#,
            filter.column()
        );
        let mut stmt = conn.prepare(&sql)?;

        let mut rows = stmt.query(params![owner_did, limit as i64])?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next()? {
            let categories_json: String = row.get(10)?;
            entries.push(FeedEntry {
                post: PostCache::row_to_post(row)?,
                updated_at: read_date(row, 9)?,
                categories: serde_json::from_str(&categories_json)?,
            });
        }

        Ok(entries)
    }

    pub fn get_item(&self, owner_did: &str, cid: &str) -> Result<Option<FeedItem>, CacheError> {
        let conn = self.db.conn();

        let row = conn
            .query_row(
                r#"
                SELECT updated_at, categories_json
                FROM feed_items
                WHERE owner_did = ? AND cid = ?
                "#,
                [owner_did, cid],
                |row| Ok((read_date(row, 0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((updated_at, categories_json)) => {
                let categories = serde_json::from_str(&categories_json)?;
                Ok(Some(FeedItem::new(owner_did, cid, updated_at, categories)))
            }
            None => Ok(None),
        }
    }

    /// Get count of cached items for an owner, across all filters
    pub fn count(&self, owner_did: &str) -> Result<usize, CacheError> {
        let conn = self.db.conn();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM feed_items WHERE owner_did = ?",
            [owner_did],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    pub fn get_fetch_record(
        &self,
        owner_did: &str,
        filter: PostFilter,
    ) -> Result<Option<FetchRecord>, CacheError> {
        let conn = self.db.conn();

        let mut stmt = conn.prepare(
            r#"
            SELECT last_fetched_at, latest_seen
            FROM fetches
            WHERE owner_did = ? AND filter = ?
            "#,
        )?;

        let record = stmt
            .query_row([owner_did, filter.as_str()], |row| {
                let latest_seen = match row.get::<_, Option<String>>(1)? {
                    Some(_) => Some(read_date(row, 1)?),
                    None => None,
                };
                Ok(FetchRecord {
                    owner_did: owner_did.to_string(),
                    filter,
                    last_fetched_at: read_unix(row, 0)?,
                    latest_seen,
                })
            })
            .optional()?;

        Ok(record)
    }

    pub fn put_fetch_record(&self, record: &FetchRecord) -> Result<(), CacheError> {
        let conn = self.db.conn();

        conn.execute(
            r#"
            INSERT INTO fetches (owner_did, filter, last_fetched_at, latest_seen)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(owner_did, filter) DO UPDATE SET
                last_fetched_at = excluded.last_fetched_at,
                latest_seen = excluded.latest_seen
            "#,
            params![
                record.owner_did,
                record.filter.as_str(),
                record.last_fetched_at.timestamp(),
                record.latest_seen.as_ref().map(format_timestamp),
            ],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "did:plc:owner";

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn post(cid: &str, published: i64) -> StoredPost {
        StoredPost {
            cid: cid.to_string(),
            uri: format!("at://{OWNER}/app.bsky.feed.post/{cid}"),
            url: format!("https://bsky.app/profile/{OWNER}/post/{cid}"),
            html: format!("<p>{cid}</p>"),
            published_at: at(published),
            author_did: OWNER.to_string(),
            author_handle: "owner.test".to_string(),
            author_name: None,
            title: cid.to_string(),
        }
    }

    fn item(cid: &str, updated: i64, categories: &[Category]) -> FeedItem {
        FeedItem::new(OWNER, cid, at(updated), categories.iter().copied().collect())
    }

    #[test]
    fn test_store_item_writes_post_and_item() {
        let db = CacheDb::open_in_memory().unwrap();
        let feeds = FeedCache::new(&db);

        assert!(
            feeds
                .store_item(&post("c1", 100), &item("c1", 100, &[]), at(500))
                .unwrap()
        );
        assert!(PostCache::new(&db).exists("c1").unwrap());

        let again = feeds
            .store_item(&post("c1", 100), &item("c1", 300, &[Category::Reply]), at(600))
            .unwrap();
        assert!(!again);

        // First write wins
        let stored = feeds.get_item(OWNER, "c1").unwrap().unwrap();
        assert_eq!(stored.updated_at, at(100));
        assert!(stored.categories.is_empty());
        assert_eq!(feeds.count(OWNER).unwrap(), 1);
    }

    #[test]
    fn test_link_item_requires_post() {
        let db = CacheDb::open_in_memory().unwrap();
        let feeds = FeedCache::new(&db);

        let err = feeds.link_item(&item("ghost", 100, &[]), at(500)).unwrap_err();
        assert!(matches!(err, CacheError::MissingPost(cid) if cid == "ghost"));
        assert_eq!(feeds.count(OWNER).unwrap(), 0);
    }

    #[test]
    fn test_same_post_in_two_feeds() {
        let db = CacheDb::open_in_memory().unwrap();
        let feeds = FeedCache::new(&db);

        feeds
            .store_item(&post("c1", 100), &item("c1", 100, &[]), at(500))
            .unwrap();
        let reposted = FeedItem::new(
            "did:plc:fan",
            "c1",
            at(200),
            [Category::Repost].into_iter().collect(),
        );
        assert!(feeds.link_item(&reposted, at(500)).unwrap());

        let fan_feed = feeds
            .get_page("did:plc:fan", PostFilter::PostsWithReplies, 10)
            .unwrap();
        assert_eq!(fan_feed.len(), 1);
        assert_eq!(fan_feed[0].updated_at, at(200));
        assert_eq!(fan_feed[0].post.published_at, at(100));
    }

    #[test]
    fn test_page_is_filtered_and_newest_first() {
        let db = CacheDb::open_in_memory().unwrap();
        let feeds = FeedCache::new(&db);

        feeds
            .store_item(&post("plain", 100), &item("plain", 100, &[]), at(500))
            .unwrap();
        feeds
            .store_item(
                &post("reply", 200),
                &item("reply", 200, &[Category::Reply]),
                at(500),
            )
            .unwrap();
        feeds
            .store_item(
                &post("photo", 300),
                &item("photo", 300, &[Category::SelfReply, Category::Image]),
                at(500),
            )
            .unwrap();

        let cids = |filter| -> Vec<String> {
            feeds
                .get_page(OWNER, filter, 10)
                .unwrap()
                .into_iter()
                .map(|e| e.post.cid)
                .collect()
        };

        assert_eq!(cids(PostFilter::PostsWithReplies), ["photo", "reply", "plain"]);
        assert_eq!(cids(PostFilter::PostsAndAuthorThreads), ["photo", "plain"]);
        assert_eq!(cids(PostFilter::PostsNoReplies), ["plain"]);
        assert_eq!(cids(PostFilter::PostsWithMedia), ["photo"]);

        let limited = feeds.get_page(OWNER, PostFilter::PostsWithReplies, 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(
            limited[0].categories,
            [Category::SelfReply, Category::Image].into_iter().collect()
        );
    }

    #[test]
    fn test_fetch_record_round_trip() {
        let db = CacheDb::open_in_memory().unwrap();
        let feeds = FeedCache::new(&db);

        assert_eq!(
            feeds
                .get_fetch_record(OWNER, PostFilter::PostsNoReplies)
                .unwrap(),
            None
        );

        let mut record = FetchRecord {
            owner_did: OWNER.to_string(),
            filter: PostFilter::PostsNoReplies,
            last_fetched_at: at(1000),
            latest_seen: None,
        };
        feeds.put_fetch_record(&record).unwrap();
        assert_eq!(
            feeds
                .get_fetch_record(OWNER, PostFilter::PostsNoReplies)
                .unwrap(),
            Some(record.clone())
        );

        record.last_fetched_at = at(5000);
        record.latest_seen = Some(DateTime::from_timestamp(900, 250_000_000).unwrap());
        feeds.put_fetch_record(&record).unwrap();
        assert_eq!(
            feeds
                .get_fetch_record(OWNER, PostFilter::PostsNoReplies)
                .unwrap(),
            Some(record)
        );

        // Records are per filter
        assert_eq!(
            feeds
                .get_fetch_record(OWNER, PostFilter::PostsWithMedia)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_corrupt_categories_surface_as_errors() {
        let db = CacheDb::open_in_memory().unwrap();
        let feeds = FeedCache::new(&db);
        feeds
            .store_item(&post("c1", 100), &item("c1", 100, &[]), at(500))
            .unwrap();
        db.conn()
            .execute("UPDATE feed_items SET categories_json = 'nope'", [])
            .unwrap();

        assert!(matches!(
            feeds.get_page(OWNER, PostFilter::PostsWithReplies, 10),
            Err(CacheError::Serialization(_))
        ));
        assert!(matches!(
            feeds.get_item(OWNER, "c1"),
            Err(CacheError::Serialization(_))
        ));
    }
}
