// SPDX-License-Identifier: MPL-2.0

//! Cooldown enforcement per (owner, filter) feed.
//!
//! The gate owns the fetch record lifecycle: it decides whether a feed is due
//! for an ingestion pass, serializes passes for the same feed, and writes the
//! record (cooldown start and watermark) once a pass has produced anything.

use crate::cache::{CacheDb, FeedCache, FetchRecord};
use crate::error::FeedError;
use crate::ingest::{IngestReport, Ingester};
use crate::model::PostFilter;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Whether a feed may be fetched now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Inside the cooldown window; `remaining` until it closes
    Fresh { remaining: Duration },
    /// Due for a pass, resuming from `watermark`
    Stale { watermark: Option<DateTime<Utc>> },
}

/// Pure cooldown check. A record stamped in the future counts as just written.
pub fn decide(record: Option<&FetchRecord>, now: DateTime<Utc>, cooldown: Duration) -> Decision {
    let Some(record) = record else {
        return Decision::Stale { watermark: None };
    };

    let elapsed = (now - record.last_fetched_at).to_std().unwrap_or(Duration::ZERO);
    if elapsed < cooldown {
        Decision::Fresh {
            remaining: cooldown - elapsed,
        }
    } else {
        Decision::Stale {
            watermark: record.latest_seen,
        }
    }
}

/// What the gate did for a request
#[derive(Debug)]
pub struct GateOutcome {
    /// Present when an ingestion pass ran
    pub report: Option<IngestReport>,
    /// How long the stored feed can be considered current
    pub max_age: Duration,
}

type FeedKey = (String, PostFilter);

pub struct FetchGate {
    cooldown: Duration,
    locks: Mutex<HashMap<FeedKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl FetchGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, owner: &str, filter: PostFilter) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop locks nobody is holding or waiting on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry((owner.to_string(), filter))
            .or_default()
            .clone()
    }

    /// Run an ingestion pass for the feed unless it is inside its cooldown
    pub async fn ensure_fresh(
        &self,
        db: &CacheDb,
        ingester: &Ingester<'_>,
        owner: &str,
        filter: PostFilter,
        now: DateTime<Utc>,
    ) -> Result<GateOutcome, FeedError> {
        let feeds = FeedCache::new(db);

        if let Decision::Fresh { remaining } =
            decide(feeds.get_fetch_record(owner, filter)?.as_ref(), now, self.cooldown)
        {
            debug!(did = owner, %filter, "feed inside cooldown");
            return Ok(GateOutcome {
                report: None,
                max_age: remaining,
            });
        }

        let lock = self.lock_for(owner, filter);
        let _guard = lock.lock().await;

        // Another request may have finished a pass while we waited
        let previous = feeds.get_fetch_record(owner, filter)?;
        let watermark = match decide(previous.as_ref(), now, self.cooldown) {
            Decision::Fresh { remaining } => {
                debug!(did = owner, %filter, "feed refreshed by a concurrent request");
                return Ok(GateOutcome {
                    report: None,
                    max_age: remaining,
                });
            }
            Decision::Stale { watermark } => watermark,
        };

        let report = ingester.run(owner, filter, watermark, now).await?;

        if !report.is_complete() && report.pages == 0 {
            // Nothing was fetched; the next request tries again
            return Ok(GateOutcome {
                report: Some(report),
                max_age: Duration::ZERO,
            });
        }

        let latest_seen = if report.is_complete() {
            watermark.max(report.newest)
        } else {
            watermark
        };
        feeds.put_fetch_record(&FetchRecord {
            owner_did: owner.to_string(),
            filter,
            last_fetched_at: now,
            latest_seen,
        })?;

        Ok(GateOutcome {
            report: Some(report),
            max_age: self.cooldown,
        })
    }
}
