// SPDX-License-Identifier: MPL-2.0

//! In-memory upstream and fixture builders shared by unit tests.

use crate::atproto::{
    Author, ClientError, Post, PostRef, PostStub, ProfileRecord, RepostReason, StrongRef,
    TimelineItem, TimelinePage, Upstream,
};
use crate::model::PostFilter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub(crate) fn author(handle: &str) -> Author {
    Author::minimal(format!("did:plc:{handle}"), format!("{handle}.test"), None, None)
}

pub(crate) fn profile(handle: &str) -> ProfileRecord {
    ProfileRecord {
        did: format!("did:plc:{handle}"),
        handle: format!("{handle}.test"),
        display_name: Some(handle.to_uppercase()),
        avatar: Some(format!("https://cdn.test/{handle}.jpg")),
        description: Some(format!("posts by {handle}")),
        requires_auth: false,
    }
}

pub(crate) fn post(by: &Author, rkey: &str, text: &str, created: i64) -> Post {
    Post {
        uri: format!("at://{}/app.bsky.feed.post/{rkey}", by.did),
        cid: format!("cid-{rkey}"),
        author: by.clone(),
        text: text.to_string(),
        facets: Vec::new(),
        created_at: at(created),
        reply_to: None,
        embed: None,
    }
}

pub(crate) fn stub(post: &Post) -> PostStub {
    PostStub {
        uri: post.uri.clone(),
        cid: post.cid.clone(),
        author: post.author.clone(),
    }
}

pub(crate) fn item(post: Post) -> TimelineItem {
    TimelineItem {
        post,
        reply_parent: None,
        reason: None,
    }
}

pub(crate) fn reply(mut post: Post, parent: PostRef) -> TimelineItem {
    let (uri, cid) = match &parent {
        PostRef::Available(stub) => (stub.uri.clone(), stub.cid.clone()),
        PostRef::Unresolved { uri, cid } => (uri.clone(), cid.clone()),
        PostRef::NotFound { uri } | PostRef::Blocked { uri } | PostRef::Detached { uri } => {
            (uri.clone(), "cid-gone".to_string())
        }
    };
    post.reply_to = Some(StrongRef { uri, cid });
    TimelineItem {
        post,
        reply_parent: Some(parent),
        reason: None,
    }
}

pub(crate) fn repost(post: Post, by: &Author, indexed: i64) -> TimelineItem {
    TimelineItem {
        post,
        reply_parent: None,
        reason: Some(RepostReason {
            by: by.clone(),
            indexed_at: at(indexed),
        }),
    }
}

/// Scripted upstream. Timeline pages are served in order, the cursor being
/// the index of the next page; every (did, filter) sees the same pages.
#[derive(Default)]
pub(crate) struct FakeUpstream {
    handles: HashMap<String, String>,
    profiles: HashMap<String, ProfileRecord>,
    pages: Vec<Vec<Result<TimelineItem, ClientError>>>,
    failure: Mutex<Option<ClientError>>,
    timeline_failure: Option<(usize, ClientError)>,
    pub resolve_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    pub timeline_calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn with_handle(mut self, handle: &str, did: &str) -> Self {
        self.handles.insert(handle.to_string(), did.to_string());
        self
    }

    pub fn with_profile(mut self, profile: ProfileRecord) -> Self {
        self.profiles.insert(profile.did.clone(), profile);
        self
    }

    pub fn with_page(mut self, items: Vec<TimelineItem>) -> Self {
        self.pages.push(items.into_iter().map(Ok).collect());
        self
    }

    pub fn with_raw_page(mut self, items: Vec<Result<TimelineItem, ClientError>>) -> Self {
        self.pages.push(items);
        self
    }

    /// Every call fails with `err` until `recover` is called
    pub fn failing(self, err: ClientError) -> Self {
        self.fail(err);
        self
    }

    pub fn fail(&self, err: ClientError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Timeline requests for page `index` and later fail with `err`
    pub fn failing_timeline_at(mut self, index: usize, err: ClientError) -> Self {
        self.timeline_failure = Some((index, err));
        self
    }

    fn check(&self) -> Result<(), ClientError> {
        match self.failure.lock().unwrap().as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn resolve_handle(&self, handle: &str) -> Result<String, ClientError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.check()?;
        self.handles
            .get(handle)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(handle.to_string()))
    }

    async fn fetch_profile(&self, did: &str) -> Result<ProfileRecord, ClientError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.check()?;
        self.profiles
            .get(did)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(did.to_string()))
    }

    async fn fetch_timeline(
        &self,
        _did: &str,
        _filter: PostFilter,
        cursor: Option<&str>,
    ) -> Result<TimelinePage, ClientError> {
        self.timeline_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.check()?;

        let index = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        if let Some((fail_at, err)) = &self.timeline_failure
            && index >= *fail_at
        {
            return Err(err.clone());
        }

        let Some(items) = self.pages.get(index) else {
            return Ok(TimelinePage::default());
        };
        let cursor = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());

        Ok(TimelinePage {
            items: items.clone(),
            cursor,
        })
    }
}
