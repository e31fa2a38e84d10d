// SPDX-License-Identifier: MPL-2.0

use crate::atproto::facets::{self, TextSegment, safe_href};
use crate::atproto::{Embed, Post};
use crate::ingest::thread::Resolved;
use askama::Template;

/// A visual element shown above the post text
#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    /// (full size href, thumbnail, alt)
    Image(String, String, String),
    /// (post href, poster, alt)
    Video(String, Option<String>, String),
    /// (href, thumbnail, title, description)
    Card(String, Option<String>, String, String),
    /// (quoted post href, author label)
    Quote(String, String),
    QuoteMissing,
}

#[derive(Template)]
#[template(path = "post.html")]
struct PostTemplate<'a> {
    blocks: &'a [Block],
    segments: &'a [TextSegment],
}

/// Render the HTML body of a feed entry
pub fn render_post(post: &Post, quoted: Option<&Resolved>) -> Result<String, askama::Error> {
    let mut blocks = Vec::new();
    if let Some(media) = post.embed.as_ref().and_then(Embed::media) {
        media_blocks(post, media, &mut blocks);
    }
    match quoted {
        Some(Resolved::Post(stub)) => {
            blocks.push(Block::Quote(stub.web_url(), format!("@{}", stub.author.handle)))
        }
        Some(Resolved::Unavailable) => blocks.push(Block::QuoteMissing),
        None => {}
    }

    let segments = facets::segment(&post.text, &post.facets);

    PostTemplate {
        blocks: &blocks,
        segments: &segments,
    }
    .render()
}

fn media_blocks(post: &Post, media: &Embed, out: &mut Vec<Block>) {
    match media {
        Embed::Images(images) => {
            for image in images {
                let (Some(href), Some(src)) = (safe_href(&image.fullsize), safe_href(&image.thumb))
                else {
                    continue;
                };
                out.push(Block::Image(href, src, image.alt.clone()));
            }
        }
        Embed::Video(video) => {
            // Feed readers cannot play HLS, so the poster links to the post
            out.push(Block::Video(
                post.web_url(),
                video.thumbnail.as_deref().and_then(safe_href),
                video.alt.clone().unwrap_or_default(),
            ));
        }
        Embed::External(external) => {
            if let Some(href) = safe_href(&external.uri) {
                let title = if external.title.trim().is_empty() {
                    href.clone()
                } else {
                    external.title.clone()
                };
                out.push(Block::Card(
                    href,
                    external.thumb.as_deref().and_then(safe_href),
                    title,
                    external.description.clone(),
                ));
            }
        }
        Embed::Record(_) | Embed::RecordWithMedia { .. } => {}
    }
}
