// SPDX-License-Identifier: MPL-2.0

use crate::atproto::ClientError;
use crate::cache::CacheError;
use thiserror::Error;

/// Errors surfaced by the feed read path
#[derive(Error, Debug)]
pub enum FeedError {
    /// No such profile; maps to 404
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    /// Unknown filter name; maps to 400
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    /// Upstream could not be reached and nothing usable is cached
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] ClientError),
    #[error("store error: {0}")]
    Store(#[from] CacheError),
    #[error("render error: {0}")]
    Render(String),
}

impl FeedError {
    /// HTTP status an outer routing layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            FeedError::IdentityNotFound(_) => 404,
            FeedError::InvalidFilter(_) => 400,
            FeedError::UpstreamUnavailable(_) => 502,
            FeedError::Store(_) | FeedError::Render(_) => 500,
        }
    }
}

impl From<askama::Error> for FeedError {
    fn from(e: askama::Error) -> Self {
        FeedError::Render(e.to_string())
    }
}
