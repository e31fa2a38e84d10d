// SPDX-License-Identifier: MPL-2.0

//! Turns the stored feed of an owner into an Atom or RSS document.

use crate::cache::{CacheDb, CacheError, CachedProfile, FeedCache, FeedEntry, ProfileCache};
use crate::config::{APP_NAME, MAX_ENTRIES, PROFILE_URL};
use crate::error::FeedError;
use crate::model::PostFilter;
use atom_syndication as atom;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Atom,
    Rss,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Atom => "application/atom+xml; charset=utf-8",
            OutputFormat::Rss => "application/rss+xml; charset=utf-8",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atom" => Ok(OutputFormat::Atom),
            "rss" => Ok(OutputFormat::Rss),
            other => Err(format!("unknown feed format: {other}")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Atom => "atom",
            OutputFormat::Rss => "rss",
        })
    }
}

/// A rendered feed, ready to be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDocument {
    pub body: String,
    pub content_type: &'static str,
    /// How long a client may cache the document
    pub max_age: Duration,
}

impl FeedDocument {
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

/// Feed-level metadata, from the cached profile when there is one
struct FeedHead {
    title: String,
    subtitle: Option<String>,
    icon: Option<String>,
    profile_url: String,
    self_url: Option<String>,
    id: String,
    updated: DateTime<Utc>,
}

pub struct FeedComposer<'a> {
    db: &'a CacheDb,
    page_size: usize,
    feed_base_url: Option<&'a str>,
}

impl<'a> FeedComposer<'a> {
    pub fn new(db: &'a CacheDb, page_size: usize, feed_base_url: Option<&'a str>) -> Self {
        Self {
            db,
            page_size: page_size.clamp(1, MAX_ENTRIES),
            feed_base_url,
        }
    }

    pub fn compose(
        &self,
        owner_did: &str,
        filter_name: &str,
        format: OutputFormat,
    ) -> Result<FeedDocument, FeedError> {
        let filter: PostFilter = filter_name.parse()?;

        let profile = match ProfileCache::new(self.db).get(owner_did) {
            Ok(profile) => Some(profile),
            Err(CacheError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        let entries = FeedCache::new(self.db).get_page(owner_did, filter, self.page_size)?;
        debug!(did = owner_did, %filter, %format, entries = entries.len(), "composing feed");

        let head = self.head(owner_did, filter, profile.as_ref(), &entries);
        let body = match format {
            OutputFormat::Atom => atom_feed(&head, &entries).to_string(),
            OutputFormat::Rss => rss_channel(&head, &entries).to_string(),
        };

        Ok(FeedDocument {
            body,
            content_type: format.content_type(),
            max_age: Duration::ZERO,
        })
    }

    fn head(
        &self,
        owner_did: &str,
        filter: PostFilter,
        profile: Option<&CachedProfile>,
        entries: &[FeedEntry],
    ) -> FeedHead {
        let profile_url = format!("{PROFILE_URL}/{owner_did}");
        let self_url = self.feed_base_url.map(|base| {
            format!(
                "{}/actor/{owner_did}?filter={}",
                base.trim_end_matches('/'),
                filter.as_str()
            )
        });
        let id = self_url
            .clone()
            .unwrap_or_else(|| format!("{profile_url}?filter={}", filter.as_str()));

        // Entries are newest first
        let updated = entries
            .first()
            .map(|e| e.updated_at)
            .or(profile.map(|p| p.fetched_at))
            .unwrap_or(DateTime::UNIX_EPOCH);

        FeedHead {
            title: profile.map_or_else(|| owner_did.to_string(), |p| p.name().to_string()),
            subtitle: profile.and_then(|p| p.description.clone()).filter(|d| !d.is_empty()),
            icon: profile.and_then(|p| p.avatar.clone()),
            profile_url,
            self_url,
            id,
            updated,
        }
    }
}

fn atom_link(href: &str, rel: &str, mime_type: Option<&str>) -> atom::Link {
    let mut link = atom::Link::default();
    link.set_href(href);
    link.set_rel(rel);
    link.set_mime_type(mime_type.map(String::from));
    link
}

fn atom_feed(head: &FeedHead, entries: &[FeedEntry]) -> atom::Feed {
    let mut feed = atom::Feed::default();
    feed.set_id(head.id.clone());
    feed.set_title(head.title.clone());
    feed.set_subtitle(head.subtitle.clone().map(atom::Text::plain));
    feed.set_updated(head.updated.fixed_offset());
    feed.set_icon(head.icon.clone());

    let mut links = vec![atom_link(&head.profile_url, "alternate", Some("text/html"))];
    if let Some(self_url) = &head.self_url {
        links.push(atom_link(self_url, "self", Some("application/atom+xml")));
    }
    feed.set_links(links);

    let mut generator = atom::Generator::default();
    generator.set_value(APP_NAME);
    generator.set_version(Some(env!("CARGO_PKG_VERSION").to_string()));
    feed.set_generator(Some(generator));

    feed.set_entries(entries.iter().map(atom_entry).collect::<Vec<_>>());
    feed
}

fn atom_entry(entry: &FeedEntry) -> atom::Entry {
    let post = &entry.post;

    let mut author = atom::Person::default();
    author.set_name(post.author_label());
    author.set_uri(Some(format!("{PROFILE_URL}/{}", post.author_did)));

    let mut content = atom::Content::default();
    content.set_content_type(Some("html".to_string()));
    content.set_value(Some(post.html.clone()));

    let categories = entry
        .categories
        .iter()
        .map(|c| {
            let mut category = atom::Category::default();
            category.set_term(c.as_str());
            category
        })
        .collect::<Vec<_>>();

    let mut out = atom::Entry::default();
    out.set_id(post.url.clone());
    out.set_title(post.title.clone());
    out.set_authors(vec![author]);
    out.set_links(vec![atom_link(&post.url, "alternate", Some("text/html"))]);
    out.set_published(Some(post.published_at.fixed_offset()));
    out.set_updated(entry.updated_at.fixed_offset());
    out.set_categories(categories);
    out.set_content(Some(content));
    out
}

fn rss_channel(head: &FeedHead, entries: &[FeedEntry]) -> rss::Channel {
    let mut channel = rss::Channel::default();
    channel.set_title(head.title.clone());
    channel.set_link(head.profile_url.clone());
    channel.set_description(head.subtitle.clone().unwrap_or_else(|| head.title.clone()));
    channel.set_generator(Some(APP_NAME.to_string()));
    channel.set_last_build_date(Some(head.updated.to_rfc2822()));

    if let Some(icon) = &head.icon {
        let mut image = rss::Image::default();
        image.set_url(icon.clone());
        image.set_title(head.title.clone());
        image.set_link(head.profile_url.clone());
        channel.set_image(Some(image));
    }

    channel.set_items(entries.iter().map(rss_item).collect::<Vec<_>>());
    channel
}

fn rss_item(entry: &FeedEntry) -> rss::Item {
    let post = &entry.post;

    let mut guid = rss::Guid::default();
    guid.set_value(post.url.clone());
    guid.set_permalink(true);

    let mut creator = rss::extension::dublincore::DublinCoreExtension::default();
    creator.set_creators(vec![post.author_label().to_string()]);

    let categories = entry
        .categories
        .iter()
        .map(|c| {
            let mut category = rss::Category::default();
            category.set_name(c.as_str());
            category
        })
        .collect::<Vec<_>>();

    // RSS has a single date; the feed position is what readers sort by
    let mut item = rss::Item::default();
    item.set_title(Some(post.title.clone()));
    item.set_link(Some(post.url.clone()));
    item.set_guid(Some(guid));
    item.set_pub_date(Some(entry.updated_at.to_rfc2822()));
    item.set_description(Some(post.html.clone()));
    item.set_categories(categories);
    item.set_dublin_core_ext(Some(creator));
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atproto::ProfileRecord;
    use crate::cache::{FeedItem, StoredPost};
    use crate::model::Category;
    use crate::testing::at;

    const OWNER: &str = "did:plc:alice";

    fn store(db: &CacheDb, n: i64, categories: &[Category]) {
        let post = StoredPost {
            cid: format!("cid-{n}"),
            uri: format!("at://{OWNER}/app.bsky.feed.post/{n}"),
            url: format!("{PROFILE_URL}/{OWNER}/post/{n}"),
            html: format!("<p>post {n}</p>"),
            published_at: at(n * 10),
            author_did: OWNER.to_string(),
            author_handle: "alice.test".to_string(),
            author_name: Some("Alice".to_string()),
            title: format!("post {n}"),
        };
        let categories = categories.iter().copied().collect();
        let item = FeedItem::new(OWNER, &post.cid, at(n * 10), categories);
        FeedCache::new(db).store_item(&post, &item, at(0)).unwrap();
    }

    fn with_profile(db: &CacheDb) {
        ProfileCache::new(db)
            .store_full(
                &ProfileRecord {
                    did: OWNER.to_string(),
                    handle: "alice.test".to_string(),
                    display_name: Some("Alice".to_string()),
                    avatar: Some("https://cdn.test/alice.jpg".to_string()),
                    description: Some("Posting things".to_string()),
                    requires_auth: false,
                },
                at(0),
            )
            .unwrap();
    }

    #[test]
    fn test_unknown_filter_is_rejected() {
        let db = CacheDb::open_in_memory().unwrap();
        let err = FeedComposer::new(&db, 100, None)
            .compose(OWNER, "posts_and_likes", OutputFormat::Atom)
            .unwrap_err();
        assert!(matches!(err, FeedError::InvalidFilter(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_empty_feed_is_valid() {
        let db = CacheDb::open_in_memory().unwrap();
        let composer = FeedComposer::new(&db, 100, None);

        let doc = composer
            .compose(OWNER, "posts_no_replies", OutputFormat::Atom)
            .unwrap();
        assert_eq!(doc.content_type, "application/atom+xml; charset=utf-8");
        let feed: atom::Feed = doc.body.parse().unwrap();
        assert!(feed.entries().is_empty());
        // No profile cached: the DID stands in for the title
        assert_eq!(feed.title().value.as_str(), OWNER);

        let doc = composer
            .compose(OWNER, "posts_no_replies", OutputFormat::Rss)
            .unwrap();
        let channel: rss::Channel = doc.body.parse().unwrap();
        assert!(channel.items().is_empty());
    }

    #[test]
    fn test_atom_entries_newest_first_and_capped() {
        let db = CacheDb::open_in_memory().unwrap();
        with_profile(&db);
        for n in 1..=105 {
            store(&db, n, &[]);
        }

        let doc = FeedComposer::new(&db, 500, None)
            .compose(OWNER, "posts_and_author_threads", OutputFormat::Atom)
            .unwrap();
        let feed: atom::Feed = doc.body.parse().unwrap();

        assert_eq!(feed.entries().len(), MAX_ENTRIES);
        assert_eq!(feed.entries()[0].title().value.as_str(), "post 105");
        assert!(
            feed.entries()
                .windows(2)
                .all(|w| w[0].updated() >= w[1].updated())
        );
        assert_eq!(feed.title().value.as_str(), "Alice");
        assert_eq!(feed.icon(), Some("https://cdn.test/alice.jpg"));
        assert_eq!(*feed.updated(), at(1050).fixed_offset());
    }

    #[test]
    fn test_atom_entry_fields() {
        let db = CacheDb::open_in_memory().unwrap();
        with_profile(&db);
        store(&db, 7, &[Category::SelfReply, Category::Image]);

        let doc = FeedComposer::new(&db, 100, Some("https://feeds.test/"))
            .compose(OWNER, "posts_with_media", OutputFormat::Atom)
            .unwrap();
        let feed: atom::Feed = doc.body.parse().unwrap();

        let self_link = feed.links().iter().find(|l| l.rel() == "self").unwrap();
        assert_eq!(
            self_link.href(),
            "https://feeds.test/actor/did:plc:alice?filter=posts_with_media"
        );

        let entry = &feed.entries()[0];
        assert_eq!(entry.id(), format!("{PROFILE_URL}/{OWNER}/post/7"));
        assert_eq!(entry.authors()[0].name(), "Alice");
        assert_eq!(entry.content().unwrap().value(), Some("<p>post 7</p>"));
        let terms: Vec<&str> = entry.categories().iter().map(|c| c.term()).collect();
        assert_eq!(terms, ["self-reply", "image"]);
    }

    #[test]
    fn test_rss_items() {
        let db = CacheDb::open_in_memory().unwrap();
        with_profile(&db);
        store(&db, 1, &[]);
        store(&db, 2, &[Category::Reply]);

        let doc = FeedComposer::new(&db, 100, None)
            .compose(OWNER, "posts_with_replies", OutputFormat::Rss)
            .unwrap();
        assert_eq!(doc.content_type, "application/rss+xml; charset=utf-8");

        let channel: rss::Channel = doc.body.parse().unwrap();
        assert_eq!(channel.title(), "Alice");
        assert_eq!(channel.description(), "Posting things");
        let titles: Vec<_> = channel.items().iter().filter_map(|i| i.title()).collect();
        assert_eq!(titles, ["post 2", "post 1"]);
        assert_eq!(channel.items()[1].description(), Some("<p>post 1</p>"));
        assert_eq!(channel.items()[0].categories()[0].name(), "reply");
    }
}
