// SPDX-License-Identifier: MPL-2.0

use crate::atproto::ClientError;
use crate::atproto::facets::RawFacet;
use crate::config::PROFILE_URL;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Decoupled from atrium's internal representation so we own the API boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

impl Author {
    pub fn minimal(
        did: String,
        handle: String,
        display_name: Option<String>,
        avatar: Option<String>,
    ) -> Self {
        Self {
            did,
            handle,
            display_name,
            avatar,
        }
    }

    /// Display name if set and non-blank, otherwise the handle
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.handle)
    }
}

/// Full profile of a feed owner
#[derive(Debug, Clone)]
pub struct ProfileRecord {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub description: Option<String>,
    /// Account self-labelled as hidden from logged-out viewers
    pub requires_auth: bool,
}

/// A post as seen in an author timeline, already decoded from the lexicon.
#[derive(Debug, Clone)]
pub struct Post {
    pub uri: String,
    pub cid: String,
    pub author: Author,
    pub text: String,
    pub facets: Vec<RawFacet>,
    pub created_at: DateTime<Utc>,
    /// Parent named by the record itself, which is present even when the view
    /// carries no reply context
    pub reply_to: Option<StrongRef>,
    pub embed: Option<Embed>,
}

impl Post {
    /// Public web URL for this post
    pub fn web_url(&self) -> String {
        post_url(&self.author.did, &self.uri)
    }
}

/// Record key: the last path segment of the AT-URI
fn rkey(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

pub fn post_url(author_did: &str, uri: &str) -> String {
    format!("{}/{}/post/{}", PROFILE_URL, author_did, rkey(uri))
}

/// Pointer to another post (uri + cid) as written in a record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Minimal view of a referenced post: enough to attribute it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostStub {
    pub uri: String,
    pub cid: String,
    pub author: Author,
}

impl PostStub {
    pub fn web_url(&self) -> String {
        post_url(&self.author.did, &self.uri)
    }
}

/// A reply parent or quoted post, in whatever state the AppView reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostRef {
    Available(PostStub),
    NotFound { uri: String },
    Blocked { uri: String },
    Detached { uri: String },
    /// Only the strong ref is known; needs a lookup by cid
    Unresolved { uri: String, cid: String },
}

#[derive(Debug, Clone)]
pub enum Embed {
    Images(Vec<ImageEmbed>),
    Video(VideoEmbed),
    External(ExternalEmbed),
    Record(PostRef),
    RecordWithMedia { record: PostRef, media: Box<Embed> },
}

impl Embed {
    /// The quoted post, if this embed quotes one
    pub fn quoted(&self) -> Option<&PostRef> {
        match self {
            Embed::Record(record) | Embed::RecordWithMedia { record, .. } => Some(record),
            _ => None,
        }
    }

    /// The post's own visual content, unwrapping record-with-media
    pub fn media(&self) -> Option<&Embed> {
        match self {
            Embed::Images(_) | Embed::Video(_) | Embed::External(_) => Some(self),
            Embed::RecordWithMedia { media, .. } => media.media(),
            Embed::Record(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageEmbed {
    pub thumb: String,
    pub fullsize: String,
    pub alt: String,
}

#[derive(Debug, Clone)]
pub struct VideoEmbed {
    pub thumbnail: Option<String>,
    pub alt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExternalEmbed {
    pub uri: String,
    pub title: String,
    pub description: String,
    pub thumb: Option<String>,
}

/// Who reposted a post into the timeline, and when
#[derive(Debug, Clone)]
pub struct RepostReason {
    pub by: Author,
    pub indexed_at: DateTime<Utc>,
}

/// One entry of an author timeline
#[derive(Debug, Clone)]
pub struct TimelineItem {
    pub post: Post,
    pub reply_parent: Option<PostRef>,
    pub reason: Option<RepostReason>,
}

impl TimelineItem {
    /// Position of the item in the timeline: repost time for reposts
    pub fn sort_date(&self) -> DateTime<Utc> {
        self.reason
            .as_ref()
            .map(|r| r.indexed_at)
            .unwrap_or(self.post.created_at)
    }
}

/// One page of an author timeline, newest first. Records that failed to
/// decode are kept in place so the caller can log and skip them.
#[derive(Debug, Clone, Default)]
pub struct TimelinePage {
    pub items: Vec<Result<TimelineItem, ClientError>>,
    pub cursor: Option<String>,
}

/// The subset of an `app.bsky.feed.post` record we read
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub facets: Vec<serde_json::Value>,
    #[serde(default)]
    pub reply: Option<RecordReply>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecordReply {
    pub parent: StrongRef,
}
