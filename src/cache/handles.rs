// SPDX-License-Identifier: MPL-2.0

use crate::cache::db::read_unix;
use crate::cache::{CacheDb, CacheError};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

/// Last known resolution of a handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleMapping {
    pub handle: String,
    /// None when the last resolution attempt found no such handle
    pub did: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Cache operations for handle -> DID mappings
pub struct HandleCache<'a> {
    db: &'a CacheDb,
}

impl<'a> HandleCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    pub fn get(&self, handle: &str) -> Result<Option<HandleMapping>, CacheError> {
        let conn = self.db.conn();

        let mapping = conn
            .query_row(
                "SELECT handle, did, updated_at FROM handles WHERE handle = ?",
                [handle],
                |row| {
                    Ok(HandleMapping {
                        handle: row.get(0)?,
                        did: row.get(1)?,
                        updated_at: read_unix(row, 2)?,
                    })
                },
            )
            .optional()?;

        Ok(mapping)
    }

    /// Record a resolution result. A handle that moved to another DID simply
    /// overwrites the old mapping.
    pub fn upsert(
        &self,
        handle: &str,
        did: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let conn = self.db.conn();

        conn.execute(
            r#"
            INSERT INTO handles (handle, did, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(handle) DO UPDATE SET
                did = excluded.did,
                updated_at = excluded.updated_at
            "#,
            params![handle, did, now.timestamp()],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_missing_handle_is_none() {
        let db = CacheDb::open_in_memory().unwrap();
        assert_eq!(HandleCache::new(&db).get("nobody.test").unwrap(), None);
    }

    #[test]
    fn test_upsert_overwrites_previous_mapping() {
        let db = CacheDb::open_in_memory().unwrap();
        let handles = HandleCache::new(&db);

        handles.upsert("alice.test", Some("did:plc:old"), at(100)).unwrap();
        handles.upsert("alice.test", Some("did:plc:new"), at(200)).unwrap();

        let mapping = handles.get("alice.test").unwrap().unwrap();
        assert_eq!(mapping.did.as_deref(), Some("did:plc:new"));
        assert_eq!(mapping.updated_at, at(200));
    }

    #[test]
    fn test_unresolved_handle_keeps_null_did() {
        let db = CacheDb::open_in_memory().unwrap();
        let handles = HandleCache::new(&db);

        handles.upsert("gone.test", None, at(100)).unwrap();

        let mapping = handles.get("gone.test").unwrap().unwrap();
        assert_eq!(mapping.did, None);
    }
}
