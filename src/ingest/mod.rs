// SPDX-License-Identifier: MPL-2.0

//! Pulls an author timeline from upstream and stores it as feed items.

mod render;
mod thread;

pub use render::render_post;
pub use thread::{ContextArena, Relation, Resolved};

use crate::atproto::{ClientError, Embed, TimelineItem, Upstream};
use crate::cache::{CacheDb, FeedCache, FeedItem, PostCache, ProfileCache, StoredPost};
use crate::error::FeedError;
use crate::model::{Category, PostFilter};
use crate::settings::Settings;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounds on a single ingestion pass
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub max_pages: usize,
    /// With a watermark, items older than this are not fetched
    pub max_backfill: Duration,
    /// Treat profiles that ask to be hidden from logged-out viewers as absent
    pub skip_auth_required: bool,
}

impl From<&Settings> for IngestLimits {
    fn from(settings: &Settings) -> Self {
        Self {
            max_pages: settings.max_pages.max(1),
            max_backfill: settings.max_backfill(),
            skip_auth_required: settings.skip_auth_required_profiles,
        }
    }
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// Outcome of one pass
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Timeline pages received
    pub pages: usize,
    /// Feed items created
    pub stored: usize,
    /// Undecodable records that were passed over
    pub skipped: usize,
    /// Newest item date among the items examined
    pub newest: Option<DateTime<Utc>>,
    /// Set when a transport failure cut the pass short
    pub interrupted: Option<ClientError>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }

    fn saw(&mut self, date: DateTime<Utc>) {
        self.newest = Some(self.newest.map_or(date, |newest| newest.max(date)));
    }
}

pub struct Ingester<'a> {
    db: &'a CacheDb,
    upstream: &'a dyn Upstream,
    limits: IngestLimits,
}

impl<'a> Ingester<'a> {
    pub fn new(db: &'a CacheDb, upstream: &'a dyn Upstream, limits: IngestLimits) -> Self {
        Self {
            db,
            upstream,
            limits,
        }
    }

    /// Fetch everything newer than `watermark` into the owner's feed.
    ///
    /// Without a watermark only the first page is read. Transport failures
    /// end the pass and are reported, not returned; an account the AppView
    /// does not know is `IdentityNotFound`.
    pub async fn run(
        &self,
        owner: &str,
        filter: PostFilter,
        watermark: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<IngestReport, FeedError> {
        let mut report = IngestReport::default();

        if let Err(e) = self.refresh_profile(owner, now).await? {
            warn!(did = owner, error = %e, "profile refresh failed");
            report.interrupted = Some(e);
            return Ok(report);
        }

        let cutoff = TimeDelta::from_std(self.limits.max_backfill)
            .ok()
            .and_then(|d| now.checked_sub_signed(d));
        let mut cursor: Option<String> = None;

        while report.pages < self.limits.max_pages {
            let page = match self
                .upstream
                .fetch_timeline(owner, filter, cursor.as_deref())
                .await
            {
                Ok(page) => page,
                // Past the first page a rejection is about the cursor, not the account
                Err(e) if e.is_not_found() && report.pages == 0 => {
                    return Err(FeedError::IdentityNotFound(owner.to_string()));
                }
                Err(e) => {
                    warn!(did = owner, %filter, error = %e, "timeline fetch interrupted");
                    report.interrupted = Some(e);
                    break;
                }
            };
            report.pages += 1;

            let mut arena = ContextArena::new(self.db);
            arena.add_page(page.items.iter().filter_map(|item| item.as_ref().ok()));

            let mut reached_known = page.items.is_empty();
            for result in &page.items {
                let item = match result {
                    Ok(item) => item,
                    Err(e) => {
                        warn!(did = owner, error = %e, "skipping malformed timeline record");
                        report.skipped += 1;
                        continue;
                    }
                };

                let date = item.sort_date();
                if let Some(watermark) = watermark {
                    let too_old = cutoff.is_some_and(|cutoff| date < cutoff);
                    if date <= watermark || too_old {
                        reached_known = true;
                        break;
                    }
                }

                report.saw(date);
                if self.store(owner, item, &arena, now)? {
                    report.stored += 1;
                }
            }

            if reached_known || watermark.is_none() {
                break;
            }
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(
            did = owner,
            %filter,
            pages = report.pages,
            stored = report.stored,
            complete = report.is_complete(),
            "ingest pass finished"
        );
        Ok(report)
    }

    /// Outer error aborts the read, inner error only interrupts the pass
    async fn refresh_profile(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Result<(), ClientError>, FeedError> {
        let profile = match self.upstream.fetch_profile(owner).await {
            Ok(profile) => profile,
            Err(e) if e.is_not_found() => {
                return Err(FeedError::IdentityNotFound(owner.to_string()));
            }
            Err(e) => return Ok(Err(e)),
        };

        // Stored first so later reads honor the label without upstream
        ProfileCache::new(self.db).store_full(&profile, now)?;

        if self.limits.skip_auth_required && profile.requires_auth {
            info!(did = owner, "profile asks to be hidden from logged-out viewers");
            return Err(FeedError::IdentityNotFound(owner.to_string()));
        }
        Ok(Ok(()))
    }

    /// Store one item. Returns whether a new feed item was created.
    fn store(
        &self,
        owner: &str,
        item: &TimelineItem,
        arena: &ContextArena<'_>,
        now: DateTime<Utc>,
    ) -> Result<bool, FeedError> {
        let post = &item.post;
        ProfileCache::new(self.db).store_minimal(&post.author, now)?;

        let relation = arena.relation(item)?;
        let categories = categorize(item, &relation);
        let feed_item = FeedItem::new(owner, &post.cid, item.sort_date(), categories);
        let feeds = FeedCache::new(self.db);

        // Title and HTML are fixed by whoever stored the post first
        if PostCache::new(self.db).exists(&post.cid)? {
            debug!(cid = %post.cid, "post already stored, linking");
            return Ok(feeds.link_item(&feed_item, now)?);
        }

        let quoted = post
            .embed
            .as_ref()
            .and_then(Embed::quoted)
            .map(|quoted| arena.resolve(quoted))
            .transpose()?;

        let stored = StoredPost {
            cid: post.cid.clone(),
            uri: post.uri.clone(),
            url: post.web_url(),
            html: render_post(post, quoted.as_ref())?,
            published_at: post.created_at,
            author_did: post.author.did.clone(),
            author_handle: post.author.handle.clone(),
            author_name: post.author.display_name.clone(),
            title: title(item, &relation),
        };

        Ok(feeds.store_item(&stored, &feed_item, now)?)
    }
}

fn is_self(item: &TimelineItem, other: &Resolved) -> bool {
    matches!(other, Resolved::Post(stub) if stub.author.did == item.post.author.did)
}

/// Feed entry title: the post text behind relationship prefixes, the repost
/// prefix outermost
pub fn title(item: &TimelineItem, relation: &Relation) -> String {
    let post = &item.post;
    let mut title = String::new();

    if let Some(reason) = &item.reason {
        if reason.by.did == post.author.did {
            title.push_str("Self-reposted: ");
        } else {
            title.push_str(&format!("Reposted @{}: ", post.author.handle));
        }
    }

    match relation {
        Relation::Reply(parent) if is_self(item, parent) => title.push_str("Self-replied: "),
        Relation::Reply(Resolved::Post(parent)) => {
            title.push_str(&format!("Replied to @{}: ", parent.author.handle))
        }
        Relation::Reply(Resolved::Unavailable) => {
            title.push_str("Replied to deleted/blocked post: ")
        }
        Relation::Quote(quoted) if is_self(item, quoted) => title.push_str("Self-quoted: "),
        Relation::Quote(Resolved::Post(quoted)) => {
            title.push_str(&format!("Quoted @{}: ", quoted.author.handle))
        }
        Relation::Quote(Resolved::Unavailable) => title.push_str("Quoted deleted/blocked post: "),
        Relation::Standalone => {}
    }

    title.push_str(&post.text);
    title
}

pub fn categorize(item: &TimelineItem, relation: &Relation) -> BTreeSet<Category> {
    let mut categories = BTreeSet::new();

    match relation {
        Relation::Reply(parent) if is_self(item, parent) => {
            categories.insert(Category::SelfReply);
        }
        Relation::Reply(_) => {
            categories.insert(Category::Reply);
        }
        Relation::Quote(quoted) if is_self(item, quoted) => {
            categories.insert(Category::SelfQuote);
        }
        Relation::Quote(_) => {
            categories.insert(Category::Quote);
        }
        Relation::Standalone => {}
    }

    if let Some(reason) = &item.reason {
        if reason.by.did == item.post.author.did {
            categories.insert(Category::SelfRepost);
        } else {
            categories.insert(Category::Repost);
        }
    }

    match item.post.embed.as_ref().and_then(Embed::media) {
        Some(Embed::Images(images)) if !images.is_empty() => {
            categories.insert(Category::Image);
        }
        Some(Embed::Video(_)) => {
            categories.insert(Category::Video);
        }
        _ => {}
    }

    categories
}
