// SPDX-License-Identifier: MPL-2.0

pub const APP_ID: &str = "bsky-feeds";
pub const APP_NAME: &str = "bsky-feeds";

/// Unauthenticated AppView; serves profiles that are hidden from logged-out web visitors.
pub const PUBLIC_API: &str = "https://public.api.bsky.app";

pub const PROFILE_URL: &str = "https://bsky.app/profile";
pub const HASHTAG_URL: &str = "https://bsky.app/hashtag";

pub const DEFAULT_FILTER: &str = "posts_and_author_threads";

/// Upper bound on entries in a served document
pub const MAX_ENTRIES: usize = 100;

/// Self-applied label asking clients to hide the account from logged-out viewers
pub const NO_UNAUTHENTICATED_LABEL: &str = "!no-unauthenticated";

pub const USER_AGENT: &str = concat!("bsky-feeds/", env!("CARGO_PKG_VERSION"));
