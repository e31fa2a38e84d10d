// SPDX-License-Identifier: MPL-2.0

mod db;
mod feeds;
mod handles;
mod posts;
mod profiles;
mod schema;

pub use db::CacheDb;
pub use feeds::{FeedCache, FeedEntry, FeedItem, FetchRecord};
pub use handles::{HandleCache, HandleMapping};
pub use posts::{PostCache, StoredPost};
pub use profiles::{CachedProfile, ProfileCache};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found")]
    NotFound,
    #[error("feed item references missing post {0}")]
    MissingPost(String),
    #[error("database path error: {0}")]
    Path(String),
}
