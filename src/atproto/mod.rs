// SPDX-License-Identifier: MPL-2.0

mod client;
pub mod facets;
mod types;

pub use client::{BskyClient, ClientError, Upstream};
pub use types::{
    Author, Embed, ExternalEmbed, ImageEmbed, Post, PostRef, PostStub, ProfileRecord,
    RepostReason, StrongRef, TimelineItem, TimelinePage, VideoEmbed, post_url,
};
