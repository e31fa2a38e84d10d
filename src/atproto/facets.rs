// SPDX-License-Identifier: MPL-2.0

//! Rich text facets for AT Protocol posts.
//!
//! Decodes the facets array of a post record (links, mentions, hashtags with
//! UTF-8 byte offsets) and applies it to the post text, producing segments
//! ready for HTML rendering. Text without facets gets plain URL detection.

use crate::config::{HASHTAG_URL, PROFILE_URL};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use url::Url;

/// A decoded facet span in the post text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFacet {
    Link {
        byte_start: usize,
        byte_end: usize,
        uri: String,
    },
    Mention {
        byte_start: usize,
        byte_end: usize,
        did: String,
    },
    Tag {
        byte_start: usize,
        byte_end: usize,
        tag: String,
    },
}

impl RawFacet {
    fn byte_range(&self) -> (usize, usize) {
        match self {
            RawFacet::Link {
                byte_start,
                byte_end,
                ..
            } => (*byte_start, *byte_end),
            RawFacet::Mention {
                byte_start,
                byte_end,
                ..
            } => (*byte_start, *byte_end),
            RawFacet::Tag {
                byte_start,
                byte_end,
                ..
            } => (*byte_start, *byte_end),
        }
    }

    /// Link target, only if it is an http(s) URL
    fn href(&self) -> Option<String> {
        let target = match self {
            RawFacet::Link { uri, .. } => uri.clone(),
            RawFacet::Mention { did, .. } => format!("{PROFILE_URL}/{did}"),
            RawFacet::Tag { tag, .. } => {
                let mut url = Url::parse(HASHTAG_URL).ok()?;
                url.path_segments_mut().ok()?.push(tag);
                url.to_string()
            }
        };
        safe_href(&target)
    }
}

/// Accepts only absolute http(s) URLs, so record data cannot inject
/// `javascript:` or other schemes into feed readers.
pub fn safe_href(target: &str) -> Option<String> {
    let url = Url::parse(target).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FacetIndex {
    byte_start: usize,
    byte_end: usize,
}

#[derive(Deserialize)]
#[serde(tag = "$type")]
enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct RecordFacet {
    index: FacetIndex,
    #[serde(default)]
    features: Vec<FacetFeature>,
}

/// Decode a record's facets array. Facets that fail to decode are dropped;
/// only the first known feature of each facet is used.
pub fn from_record(facets: &[serde_json::Value]) -> Vec<RawFacet> {
    facets
        .iter()
        .filter_map(|value| serde_json::from_value::<RecordFacet>(value.clone()).ok())
        .filter_map(|facet| {
            let FacetIndex {
                byte_start,
                byte_end,
            } = facet.index;
            facet.features.into_iter().find_map(|feature| match feature {
                FacetFeature::Link { uri } => Some(RawFacet::Link {
                    byte_start,
                    byte_end,
                    uri,
                }),
                FacetFeature::Mention { did } => Some(RawFacet::Mention {
                    byte_start,
                    byte_end,
                    did,
                }),
                FacetFeature::Tag { tag } => Some(RawFacet::Tag {
                    byte_start,
                    byte_end,
                    tag,
                }),
                FacetFeature::Unknown => None,
            })
        })
        .collect()
}

// Compile regexes once.
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s<>\[\]\{}|\\^`\x00-\x1f\x7f]+").unwrap());

/// Trim trailing punctuation that is likely sentence-ending, not part of the URL.
fn trim_url_trailing(url: &str) -> &str {
    url.trim_end_matches(|c| matches!(c, '.' | ',' | ';' | '!' | '?' | ')'))
}

/// Find bare URLs in text that came without facets.
pub fn detect_links(text: &str) -> Vec<RawFacet> {
    URL_RE
        .find_iter(text)
        .map(|m| {
            let trimmed = trim_url_trailing(m.as_str());
            RawFacet::Link {
                byte_start: m.start(),
                byte_end: m.start() + trimmed.len(),
                uri: trimmed.to_string(),
            }
        })
        .collect()
}

/// A piece of post text after facets are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSegment {
    Text(String),
    /// (link text, href)
    Link(String, String),
    Break,
}

fn push_text(out: &mut Vec<TextSegment>, text: &str) {
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push(TextSegment::Break);
        }
        if !line.is_empty() {
            out.push(TextSegment::Text(line.to_string()));
        }
    }
}

/// Split text into plain and linked segments.
///
/// Facets are applied in byte order. A facet that overlaps an earlier one,
/// is empty, or does not fall on UTF-8 character boundaries is ignored and
/// its text stays plain.
pub fn segment(text: &str, facets: &[RawFacet]) -> Vec<TextSegment> {
    let mut ordered: Vec<&RawFacet> = facets.iter().collect();
    ordered.sort_by_key(|f| f.byte_range());

    let mut out = Vec::new();
    let mut cursor = 0;

    for facet in ordered {
        let (start, end) = facet.byte_range();
        if start < cursor || end <= start {
            continue;
        }
        let (Some(before), Some(label)) = (text.get(cursor..start), text.get(start..end)) else {
            continue;
        };
        let Some(href) = facet.href() else {
            continue;
        };

        push_text(&mut out, before);
        out.push(TextSegment::Link(label.to_string(), href));
        cursor = end;
    }

    push_text(&mut out, text.get(cursor..).unwrap_or_default());
    out
}
