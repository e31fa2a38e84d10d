// SPDX-License-Identifier: MPL-2.0

//! Atom and RSS feeds for Bluesky profiles.
//!
//! A read resolves the identifier to a DID, runs an ingestion pass against
//! the AppView if the feed is outside its cooldown, and renders the stored
//! entries for the requested filter.

pub mod atproto;
pub mod cache;
pub mod compose;
pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod ingest;
pub mod model;
pub mod runtime;
pub mod service;
pub mod settings;

#[cfg(test)]
mod testing;

pub use atproto::{BskyClient, ClientError, Upstream};
pub use cache::{CacheDb, CacheError};
pub use compose::{FeedDocument, OutputFormat};
pub use error::FeedError;
pub use model::PostFilter;
pub use service::FeedService;
pub use settings::Settings;
