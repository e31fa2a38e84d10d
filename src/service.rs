// SPDX-License-Identifier: MPL-2.0

use crate::atproto::Upstream;
use crate::cache::{CacheDb, CacheError, CachedProfile, FeedCache, ProfileCache};
use crate::compose::{FeedComposer, FeedDocument, OutputFormat};
use crate::config::DEFAULT_FILTER;
use crate::error::FeedError;
use crate::gate::FetchGate;
use crate::identity::{Identifier, IdentityResolver};
use crate::ingest::{IngestLimits, Ingester};
use crate::model::PostFilter;
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// The feed read path: identifier in, document out
pub struct FeedService {
    db: CacheDb,
    upstream: Arc<dyn Upstream>,
    settings: Settings,
    gate: FetchGate,
}

impl FeedService {
    pub fn new(db: CacheDb, upstream: Arc<dyn Upstream>, settings: Settings) -> Self {
        let gate = FetchGate::new(settings.cooldown());
        Self {
            db,
            upstream,
            settings,
            gate,
        }
    }

    pub async fn get_feed(
        &self,
        identifier: &str,
        filter: Option<&str>,
        format: OutputFormat,
    ) -> Result<FeedDocument, FeedError> {
        self.get_feed_at(identifier, filter, format, Utc::now()).await
    }

    pub(crate) async fn get_feed_at(
        &self,
        identifier: &str,
        filter: Option<&str>,
        format: OutputFormat,
        now: DateTime<Utc>,
    ) -> Result<FeedDocument, FeedError> {
        let filter_name = filter.unwrap_or(DEFAULT_FILTER);
        let post_filter: PostFilter = filter_name.parse()?;

        let id = Identifier::parse(identifier)?;
        let did = IdentityResolver::new(
            &self.db,
            self.upstream.as_ref(),
            self.settings.handle_refresh(),
        )
        .resolve(&id, now)
        .await?;

        let ingester = Ingester::new(
            &self.db,
            self.upstream.as_ref(),
            IngestLimits::from(&self.settings),
        );
        let outcome = self
            .gate
            .ensure_fresh(&self.db, &ingester, &did, post_filter, now)
            .await?;

        let cached = self.cached_profile(&did)?;
        if self.settings.skip_auth_required_profiles
            && cached.as_ref().is_some_and(|p| p.is_full && p.requires_auth)
        {
            info!(did, "profile asks to be hidden from logged-out viewers");
            return Err(FeedError::IdentityNotFound(did));
        }

        if let Some(report) = &outcome.report
            && let Some(err) = &report.interrupted
        {
            if !self.has_cached(&did, cached.as_ref(), now)? {
                return Err(FeedError::UpstreamUnavailable(err.clone()));
            }
            warn!(did, filter = filter_name, error = %err, "serving cached feed after failed refresh");
        }

        let document = FeedComposer::new(
            &self.db,
            self.settings.page_size,
            self.settings.feed_base_url.as_deref(),
        )
        .compose(&did, filter_name, format)?
        .with_max_age(outcome.max_age);

        info!(%id, did, filter = filter_name, %format, "served feed");
        Ok(document)
    }

    fn cached_profile(&self, did: &str) -> Result<Option<CachedProfile>, FeedError> {
        match ProfileCache::new(&self.db).get(did) {
            Ok(profile) => Ok(Some(profile)),
            Err(CacheError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether an earlier pass left something to serve. A profile written by
    /// the failing pass itself, or one known only as the author of another
    /// feed's post, does not count.
    fn has_cached(
        &self,
        did: &str,
        profile: Option<&CachedProfile>,
        now: DateTime<Utc>,
    ) -> Result<bool, FeedError> {
        if FeedCache::new(&self.db).count(did)? > 0 {
            return Ok(true);
        }
        Ok(profile.is_some_and(|p| p.is_full && p.fetched_at < now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atproto::{Author, ClientError, PostRef};
    use crate::testing::{FakeUpstream, at, author, item, post, profile, reply, stub};
    use atom_syndication::Feed;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn fixture() -> FakeUpstream {
        let alice = author("alice");
        let bob = author("bob");
        let question = post(&bob, "b1", "anyone?", 500);
        FakeUpstream::default()
            .with_handle("alice.test", "did:plc:alice")
            .with_profile(profile("alice"))
            .with_page(vec![
                reply(
                    post(&alice, "a2", "me!", 2_000),
                    PostRef::Available(stub(&question)),
                ),
                item(post(&alice, "a1", "Hello", 1_000)),
            ])
    }

    fn service(upstream: Arc<FakeUpstream>) -> FeedService {
        FeedService::new(
            CacheDb::open_in_memory().unwrap(),
            upstream,
            Settings::default(),
        )
    }

    fn titles(doc: &FeedDocument) -> Vec<String> {
        let feed: Feed = doc.body.parse().unwrap();
        feed.entries()
            .iter()
            .map(|e| e.title().value.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_default_filter_hides_replies_to_others() {
        let upstream = Arc::new(fixture());
        let service = service(upstream.clone());

        let doc = service
            .get_feed_at("alice.test", None, OutputFormat::Atom, at(10_000))
            .await
            .unwrap();
        assert_eq!(titles(&doc), ["Hello"]);
        assert_eq!(doc.max_age, Duration::from_secs(3600));

        let doc = service
            .get_feed_at(
                "alice.test",
                Some("posts_with_replies"),
                OutputFormat::Atom,
                at(10_000),
            )
            .await
            .unwrap();
        assert_eq!(titles(&doc), ["Replied to @bob.test: me!", "Hello"]);
    }

    #[tokio::test]
    async fn test_reads_inside_cooldown_fetch_once() {
        let upstream = Arc::new(fixture());
        let service = service(upstream.clone());

        for (offset, expected_age) in [(0, 3600), (600, 3000)] {
            let doc = service
                .get_feed_at(
                    "alice.test",
                    None,
                    OutputFormat::Rss,
                    at(10_000 + offset),
                )
                .await
                .unwrap();
            assert_eq!(doc.max_age, Duration::from_secs(expected_age));
        }
        assert_eq!(upstream.timeline_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_handle_is_not_found() {
        let upstream = Arc::new(fixture());
        let service = service(upstream.clone());

        let err = service
            .get_feed_at("nobody.test", None, OutputFormat::Atom, at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::IdentityNotFound(_)));
        assert_eq!(err.status_code(), 404);
        assert_eq!(upstream.timeline_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bad_input_is_rejected_before_upstream() {
        let upstream = Arc::new(fixture());
        let service = service(upstream.clone());

        let err = service
            .get_feed_at("alice.test", Some("likes"), OutputFormat::Atom, at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::InvalidFilter(_)));

        let err = service
            .get_feed_at("not a handle", None, OutputFormat::Atom, at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::IdentityNotFound(_)));

        assert_eq!(upstream.resolve_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_outage_without_cache_is_unavailable() {
        let upstream = Arc::new(fixture());
        upstream.fail(ClientError::Timeout);
        let service = service(upstream.clone());

        let err = service
            .get_feed_at("alice.test", None, OutputFormat::Atom, at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::UpstreamUnavailable(ClientError::Timeout)));
        assert_eq!(err.status_code(), 502);
    }

    #[tokio::test]
    async fn test_outage_serves_cached_feed() {
        let upstream = Arc::new(fixture());
        let service = service(upstream.clone());

        service
            .get_feed_at("alice.test", None, OutputFormat::Atom, at(10_000))
            .await
            .unwrap();

        // Past both the cooldown and the handle freshness window
        upstream.fail(ClientError::Network("connection refused".to_string()));
        let later = at(10_000 + 8 * 86_400);
        let doc = service
            .get_feed_at("alice.test", None, OutputFormat::Atom, later)
            .await
            .unwrap();
        assert_eq!(titles(&doc), ["Hello"]);
        assert_eq!(doc.max_age, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_first_page_failure_is_unavailable_despite_fresh_profile() {
        let upstream = Arc::new(fixture().failing_timeline_at(0, ClientError::Timeout));
        let service = service(upstream.clone());

        let err = service
            .get_feed_at("alice.test", None, OutputFormat::Atom, at(10_000))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::UpstreamUnavailable(ClientError::Timeout)));
        assert_eq!(upstream.profile_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_author_profile_is_not_a_cached_feed() {
        const DID: &str = "did:plc:abcdefghijklmnopqrstuvwx";
        let upstream = Arc::new(FakeUpstream::default().failing(ClientError::Timeout));
        let service = service(upstream.clone());
        // Known only as the author of a post in someone else's feed
        let minimal = Author::minimal(DID.to_string(), "carol.test".to_string(), None, None);
        ProfileCache::new(&service.db)
            .store_minimal(&minimal, at(0))
            .unwrap();

        let err = service
            .get_feed_at(DID, None, OutputFormat::Atom, at(10_000))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::UpstreamUnavailable(ClientError::Timeout)));
        assert_eq!(upstream.profile_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hidden_profile_stays_hidden_during_outage() {
        let mut hidden = profile("alice");
        hidden.requires_auth = true;
        let upstream = Arc::new(
            FakeUpstream::default()
                .with_handle("alice.test", "did:plc:alice")
                .with_profile(hidden)
                .with_page(vec![item(post(&author("alice"), "a1", "Hello", 1_000))]),
        );
        let settings = Settings {
            skip_auth_required_profiles: true,
            ..Settings::default()
        };
        let service = FeedService::new(
            CacheDb::open_in_memory().unwrap(),
            upstream.clone(),
            settings,
        );

        let err = service
            .get_feed_at("alice.test", None, OutputFormat::Atom, at(10_000))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::IdentityNotFound(_)));

        upstream.fail(ClientError::Timeout);
        let err = service
            .get_feed_at("alice.test", None, OutputFormat::Atom, at(20_000))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::IdentityNotFound(_)));
        assert_eq!(upstream.timeline_calls.load(Ordering::SeqCst), 0);
    }
}
