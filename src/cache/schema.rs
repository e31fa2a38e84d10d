// SPDX-License-Identifier: MPL-2.0

/// SQL schema for the feed database
pub const SCHEMA: &str = r#"
-- Database version for migrations
PRAGMA user_version = 1;

-- handles: handle -> DID; did stays NULL until a resolution succeeds
CREATE TABLE IF NOT EXISTS handles (
    handle TEXT PRIMARY KEY,
    did TEXT,
    updated_at INTEGER NOT NULL
);

-- profiles: DID-keyed, minimal (from post authors) vs full (fetched for a feed owner)
CREATE TABLE IF NOT EXISTS profiles (
    did TEXT PRIMARY KEY,
    handle TEXT NOT NULL,
    display_name TEXT,
    avatar TEXT,
    description TEXT,
    requires_auth INTEGER NOT NULL DEFAULT 0,
    fetched_at INTEGER NOT NULL,
    is_full INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_profiles_handle ON profiles(handle);

-- posts: immutable once written; title and html are derived at ingestion
CREATE TABLE IF NOT EXISTS posts (
    cid TEXT PRIMARY KEY,
    author_did TEXT NOT NULL,
    uri TEXT NOT NULL,
    url TEXT NOT NULL,
    html TEXT NOT NULL,
    published_at TEXT NOT NULL,
    author_handle TEXT NOT NULL,
    author_name TEXT,
    title TEXT NOT NULL,
    fetched_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_did);

-- feed_items: a post as it appeared in one owner's timeline
CREATE TABLE IF NOT EXISTS feed_items (
    owner_did TEXT NOT NULL,
    cid TEXT NOT NULL REFERENCES posts(cid),
    updated_at TEXT NOT NULL,
    categories_json TEXT NOT NULL,
    in_author_threads INTEGER NOT NULL,
    in_with_replies INTEGER NOT NULL,
    in_no_replies INTEGER NOT NULL,
    in_with_media INTEGER NOT NULL,
    fetched_at INTEGER NOT NULL,
    PRIMARY KEY (owner_did, cid)
);

CREATE INDEX IF NOT EXISTS idx_feed_items_owner_updated ON feed_items(owner_did, updated_at DESC);

-- fetches: cooldown and watermark per (owner, filter)
CREATE TABLE IF NOT EXISTS fetches (
    owner_did TEXT NOT NULL,
    filter TEXT NOT NULL,
    last_fetched_at INTEGER NOT NULL,
    latest_seen TEXT,
    PRIMARY KEY (owner_did, filter)
);
"#;
