// SPDX-License-Identifier: MPL-2.0

//! Shared feed vocabulary: filters, category tags and the per-item filter flags
//! derived from them.

use crate::error::FeedError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Timeline views a feed can be requested for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PostFilter {
    #[default]
    PostsAndAuthorThreads,
    PostsWithReplies,
    PostsNoReplies,
    PostsWithMedia,
}

impl PostFilter {
    pub const ALL: [PostFilter; 4] = [
        PostFilter::PostsAndAuthorThreads,
        PostFilter::PostsWithReplies,
        PostFilter::PostsNoReplies,
        PostFilter::PostsWithMedia,
    ];

    /// Name used on the wire, in URLs and in the fetch record table
    pub fn as_str(self) -> &'static str {
        match self {
            PostFilter::PostsAndAuthorThreads => "posts_and_author_threads",
            PostFilter::PostsWithReplies => "posts_with_replies",
            PostFilter::PostsNoReplies => "posts_no_replies",
            PostFilter::PostsWithMedia => "posts_with_media",
        }
    }

    /// Membership column in `feed_items`
    pub(crate) fn column(self) -> &'static str {
        match self {
            PostFilter::PostsAndAuthorThreads => "in_author_threads",
            PostFilter::PostsWithReplies => "in_with_replies",
            PostFilter::PostsNoReplies => "in_no_replies",
            PostFilter::PostsWithMedia => "in_with_media",
        }
    }
}

impl FromStr for PostFilter {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PostFilter::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| FeedError::InvalidFilter(s.to_string()))
    }
}

impl fmt::Display for PostFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag attached to a feed item at ingestion time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Reply,
    SelfReply,
    Quote,
    SelfQuote,
    Repost,
    SelfRepost,
    Image,
    Video,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Reply => "reply",
            Category::SelfReply => "self-reply",
            Category::Quote => "quote",
            Category::SelfQuote => "self-quote",
            Category::Repost => "repost",
            Category::SelfRepost => "self-repost",
            Category::Image => "image",
            Category::Video => "video",
        }
    }
}

/// Precomputed filter membership of a feed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterFlags {
    pub author_threads: bool,
    pub with_replies: bool,
    pub no_replies: bool,
    pub with_media: bool,
}

impl FilterFlags {
    pub fn from_categories(categories: &BTreeSet<Category>) -> Self {
        let reply_to_other = categories.contains(&Category::Reply);
        let any_reply = reply_to_other || categories.contains(&Category::SelfReply);

        Self {
            author_threads: !reply_to_other,
            with_replies: true,
            no_replies: !any_reply,
            with_media: categories.contains(&Category::Image)
                || categories.contains(&Category::Video),
        }
    }
}

/// Fixed-width UTC form, so stored dates sort lexically in time order
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
