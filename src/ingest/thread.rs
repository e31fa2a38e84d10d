// SPDX-License-Identifier: MPL-2.0

//! One-hop resolution of reply parents and quoted posts.
//!
//! The AppView normally hands us the parent and quoted post views inline.
//! When it only gives a strong ref, the post is looked up among the posts of
//! the current page, then among stored posts. Nothing is fetched and refs
//! are never followed further.

use crate::atproto::{PostRef, PostStub, StrongRef, TimelineItem};
use crate::cache::{CacheDb, CacheError, PostCache};
use std::collections::HashMap;

/// A reply parent or quoted post after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Post(PostStub),
    /// Deleted, blocked, detached or simply unknown to us
    Unavailable,
}

/// How a post relates to another post. A reply that also quotes is a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Standalone,
    Reply(Resolved),
    Quote(Resolved),
}

/// Posts reachable without another upstream call, keyed by CID
pub struct ContextArena<'a> {
    known: HashMap<String, PostStub>,
    db: &'a CacheDb,
}

impl<'a> ContextArena<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self {
            known: HashMap::new(),
            db,
        }
    }

    /// Collect every post, parent and quoted post view on a page
    pub fn add_page<'i>(&mut self, items: impl IntoIterator<Item = &'i TimelineItem>) {
        for item in items {
            let post = &item.post;
            self.insert(PostStub {
                uri: post.uri.clone(),
                cid: post.cid.clone(),
                author: post.author.clone(),
            });

            let parent = item.reply_parent.as_ref();
            let quoted = post.embed.as_ref().and_then(|e| e.quoted());
            for post_ref in parent.into_iter().chain(quoted) {
                if let PostRef::Available(stub) = post_ref {
                    self.insert(stub.clone());
                }
            }
        }
    }

    fn insert(&mut self, stub: PostStub) {
        self.known.entry(stub.cid.clone()).or_insert(stub);
    }

    pub fn resolve(&self, post_ref: &PostRef) -> Result<Resolved, CacheError> {
        match post_ref {
            PostRef::Available(stub) => Ok(Resolved::Post(stub.clone())),
            PostRef::NotFound { .. } | PostRef::Blocked { .. } | PostRef::Detached { .. } => {
                Ok(Resolved::Unavailable)
            }
            PostRef::Unresolved { cid, .. } => self.lookup(cid),
        }
    }

    fn lookup(&self, cid: &str) -> Result<Resolved, CacheError> {
        if let Some(stub) = self.known.get(cid) {
            return Ok(Resolved::Post(stub.clone()));
        }
        Ok(PostCache::new(self.db)
            .stub(cid)?
            .map_or(Resolved::Unavailable, Resolved::Post))
    }

    /// Work out what an item replies to or quotes
    pub fn relation(&self, item: &TimelineItem) -> Result<Relation, CacheError> {
        // The record's own reply ref covers views that dropped the parent
        let parent = item.reply_parent.clone().or_else(|| {
            item.post
                .reply_to
                .as_ref()
                .map(|StrongRef { uri, cid }| PostRef::Unresolved {
                    uri: uri.clone(),
                    cid: cid.clone(),
                })
        });
        if let Some(parent) = parent {
            return Ok(Relation::Reply(self.resolve(&parent)?));
        }

        match item.post.embed.as_ref().and_then(|e| e.quoted()) {
            Some(quoted) => Ok(Relation::Quote(self.resolve(quoted)?)),
            None => Ok(Relation::Standalone),
        }
    }
}
