// SPDX-License-Identifier: MPL-2.0

//! Handle and DID handling for incoming feed requests.

use crate::atproto::Upstream;
use crate::cache::{CacheDb, HandleCache};
use crate::error::FeedError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

static DID_PLC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:plc:[a-z2-7]{24}$").unwrap());

static DID_WEB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:web:[a-zA-Z0-9.\-]+(%3[aA][0-9]+)?$").unwrap());

/// DNS-style labels, last label starting with a letter
static HANDLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$",
    )
    .unwrap()
});

const MAX_HANDLE_LEN: usize = 253;

/// A syntactically valid account identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Did(String),
    /// Lowercased, without a leading `@`
    Handle(String),
}

impl Identifier {
    pub fn parse(input: &str) -> Result<Self, FeedError> {
        let input = input.trim();

        if input.starts_with("did:") {
            if DID_PLC_RE.is_match(input) || DID_WEB_RE.is_match(input) {
                return Ok(Identifier::Did(input.to_string()));
            }
            return Err(FeedError::IdentityNotFound(input.to_string()));
        }

        let handle = input.strip_prefix('@').unwrap_or(input);
        if handle.len() <= MAX_HANDLE_LEN && HANDLE_RE.is_match(handle) {
            Ok(Identifier::Handle(handle.to_ascii_lowercase()))
        } else {
            Err(FeedError::IdentityNotFound(input.to_string()))
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Did(did) => f.write_str(did),
            Identifier::Handle(handle) => write!(f, "@{handle}"),
        }
    }
}

/// Maps identifiers to DIDs, caching handle lookups in the store
pub struct IdentityResolver<'a> {
    db: &'a CacheDb,
    upstream: &'a dyn Upstream,
    refresh_after: Duration,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(db: &'a CacheDb, upstream: &'a dyn Upstream, refresh_after: Duration) -> Self {
        Self {
            db,
            upstream,
            refresh_after,
        }
    }

    pub async fn resolve(&self, id: &Identifier, now: DateTime<Utc>) -> Result<String, FeedError> {
        let handle = match id {
            Identifier::Did(did) => return Ok(did.clone()),
            Identifier::Handle(handle) => handle,
        };

        let handles = HandleCache::new(self.db);
        let cached = handles.get(handle)?;

        // A NULL did always goes back upstream
        if let Some(mapping) = &cached
            && let Some(did) = &mapping.did
            && (now - mapping.updated_at).num_seconds() < self.refresh_after.as_secs() as i64
        {
            debug!(handle, did, "handle resolved from cache");
            return Ok(did.clone());
        }

        match self.upstream.resolve_handle(handle).await {
            Ok(did) => {
                handles.upsert(handle, Some(&did), now)?;
                info!(handle, did, "resolved handle");
                Ok(did)
            }
            Err(e) if e.is_not_found() => {
                handles.upsert(handle, None, now)?;
                info!(handle, error = %e, "handle does not resolve");
                Err(FeedError::IdentityNotFound(handle.clone()))
            }
            Err(e) => match cached.and_then(|m| m.did) {
                Some(did) => {
                    warn!(handle, did, error = %e, "handle refresh failed, using stale mapping");
                    Ok(did)
                }
                None => Err(FeedError::UpstreamUnavailable(e)),
            },
        }
    }
}
