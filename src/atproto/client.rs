// SPDX-License-Identifier: MPL-2.0

use crate::atproto::facets;
use crate::atproto::types::{
    Author, Embed, ExternalEmbed, ImageEmbed, Post, PostRecord, PostRef, PostStub, ProfileRecord,
    RepostReason, TimelineItem, TimelinePage, VideoEmbed,
};
use crate::config::{NO_UNAUTHENTICATED_LABEL, USER_AGENT};
use crate::model::{PostFilter, parse_timestamp};
use async_trait::async_trait;
use atrium_api::agent::atp_agent::AtpAgent;
use atrium_api::agent::atp_agent::store::MemorySessionStore;
use atrium_xrpc_client::reqwest::{ReqwestClient, ReqwestClientBuilder};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// The AppView rejected the request: unknown handle, unknown or
    /// suspended account, invalid identifier
    #[error("not found: {0}")]
    NotFound(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed record: {0}")]
    Malformed(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// The AppView operations the feed pipeline depends on.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Resolve a handle to its DID
    async fn resolve_handle(&self, handle: &str) -> Result<String, ClientError>;

    /// Fetch the full profile of an account
    async fn fetch_profile(&self, did: &str) -> Result<ProfileRecord, ClientError>;

    /// Fetch one page of an author timeline, newest first
    async fn fetch_timeline(
        &self,
        did: &str,
        filter: PostFilter,
        cursor: Option<&str>,
    ) -> Result<TimelinePage, ClientError>;
}

type Agent = AtpAgent<MemorySessionStore, ReqwestClient>;

/// Wraps atrium so the rest of the crate only sees our own types.
/// Every call is unauthenticated.
pub struct BskyClient {
    agent: Agent,
}

impl BskyClient {
    pub fn new(service_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let client = ReqwestClientBuilder::new(service_url).client(http).build();

        Ok(Self {
            agent: AtpAgent::new(client, MemorySessionStore::default()),
        })
    }

    fn convert_feed_view_post(
        &self,
        feed_view: atrium_api::app::bsky::feed::defs::FeedViewPost,
    ) -> Result<TimelineItem, ClientError> {
        let post = self.convert_post_view(&feed_view.data.post)?;

        // Who reposted this into the timeline
        let reason = self.extract_repost_reason(&feed_view.data.reason, &post);

        // Fall back to the record's own strong ref when the view has no reply context
        let reply_parent = self
            .extract_reply_parent(&feed_view.data.reply)
            .or_else(|| {
                post.reply_to.as_ref().map(|parent| PostRef::Unresolved {
                    uri: parent.uri.clone(),
                    cid: parent.cid.clone(),
                })
            });

        Ok(TimelineItem {
            post,
            reply_parent,
            reason,
        })
    }

    fn convert_post_view(
        &self,
        post_view: &atrium_api::app::bsky::feed::defs::PostView,
    ) -> Result<Post, ClientError> {
        let data = &post_view.data;
        let record = self.extract_post_record(&data.record)?;

        let created_at = record
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| parse_timestamp(data.indexed_at.as_str()))
            .ok_or_else(|| ClientError::Malformed(format!("no usable date on {}", data.uri)))?;

        let facets = if record.facets.is_empty() {
            facets::detect_links(&record.text)
        } else {
            facets::from_record(&record.facets)
        };

        Ok(Post {
            uri: data.uri.clone(),
            cid: data.cid.as_ref().to_string(),
            author: self.convert_author(&data.author),
            text: record.text,
            facets,
            created_at,
            reply_to: record.reply.map(|reply| reply.parent),
            embed: self.extract_embed(&data.embed),
        })
    }

    fn convert_author(
        &self,
        author: &atrium_api::app::bsky::actor::defs::ProfileViewBasic,
    ) -> Author {
        Author::minimal(
            author.data.did.to_string(),
            author.data.handle.to_string(),
            author.data.display_name.clone(),
            author.data.avatar.clone(),
        )
    }

    /// Decode the untyped record into the fields we read
    fn extract_post_record(
        &self,
        record: &atrium_api::types::Unknown,
    ) -> Result<PostRecord, ClientError> {
        let value =
            serde_json::to_value(record).map_err(|e| ClientError::Malformed(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| ClientError::Malformed(e.to_string()))
    }

    /// Extract all embed types from a post view. Shapes we do not know
    /// (and records that are not posts) come back as no embed.
    fn extract_embed(
        &self,
        embed: &Option<
            atrium_api::types::Union<atrium_api::app::bsky::feed::defs::PostViewEmbedRefs>,
        >,
    ) -> Option<Embed> {
        use atrium_api::app::bsky::feed::defs::PostViewEmbedRefs;
        use atrium_api::types::Union;

        let Union::Refs(embed_ref) = embed.as_ref()? else {
            return None;
        };

        match embed_ref {
            PostViewEmbedRefs::AppBskyEmbedImagesView(view) => Some(images(view)),
            PostViewEmbedRefs::AppBskyEmbedExternalView(view) => Some(external(view)),
            PostViewEmbedRefs::AppBskyEmbedVideoView(view) => Some(video(view)),
            PostViewEmbedRefs::AppBskyEmbedRecordView(record_view) => self
                .extract_quoted_post(&record_view.data.record)
                .map(Embed::Record),
            PostViewEmbedRefs::AppBskyEmbedRecordWithMediaView(rwm_view) => {
                let media = self.extract_media_embed(&rwm_view.data.media);
                let quoted = self.extract_quoted_post(&rwm_view.data.record.data.record);
                match (quoted, media) {
                    (Some(record), Some(media)) => Some(Embed::RecordWithMedia {
                        record,
                        media: Box::new(media),
                    }),
                    (Some(record), None) => Some(Embed::Record(record)),
                    (None, media) => media,
                }
            }
        }
    }

    /// Quoted post reference; None when the embedded record is not a post
    /// (feed generators, lists, starter packs)
    fn extract_quoted_post(
        &self,
        record: &atrium_api::types::Union<atrium_api::app::bsky::embed::record::ViewRecordRefs>,
    ) -> Option<PostRef> {
        use atrium_api::app::bsky::embed::record::ViewRecordRefs;
        use atrium_api::types::Union;

        match record {
            Union::Refs(ViewRecordRefs::ViewRecord(view_record)) => {
                Some(PostRef::Available(PostStub {
                    uri: view_record.data.uri.clone(),
                    cid: view_record.data.cid.as_ref().to_string(),
                    author: self.convert_author(&view_record.data.author),
                }))
            }
            Union::Refs(ViewRecordRefs::ViewNotFound(view)) => Some(PostRef::NotFound {
                uri: view.data.uri.clone(),
            }),
            Union::Refs(ViewRecordRefs::ViewBlocked(view)) => Some(PostRef::Blocked {
                uri: view.data.uri.clone(),
            }),
            Union::Refs(ViewRecordRefs::ViewDetached(view)) => Some(PostRef::Detached {
                uri: view.data.uri.clone(),
            }),
            _ => None,
        }
    }

    /// Extract media embed from record-with-media view
    fn extract_media_embed(
        &self,
        media: &atrium_api::types::Union<
            atrium_api::app::bsky::embed::record_with_media::ViewMediaRefs,
        >,
    ) -> Option<Embed> {
        use atrium_api::app::bsky::embed::record_with_media::ViewMediaRefs;
        use atrium_api::types::Union;

        match media {
            Union::Refs(ViewMediaRefs::AppBskyEmbedImagesView(view)) => Some(images(view)),
            Union::Refs(ViewMediaRefs::AppBskyEmbedVideoView(view)) => Some(video(view)),
            Union::Refs(ViewMediaRefs::AppBskyEmbedExternalView(view)) => Some(external(view)),
            _ => None,
        }
    }

    /// Extract repost reason (who reposted this into the feed)
    fn extract_repost_reason(
        &self,
        reason: &Option<
            atrium_api::types::Union<atrium_api::app::bsky::feed::defs::FeedViewPostReasonRefs>,
        >,
        post: &Post,
    ) -> Option<RepostReason> {
        use atrium_api::app::bsky::feed::defs::FeedViewPostReasonRefs;
        use atrium_api::types::Union;

        let Union::Refs(FeedViewPostReasonRefs::ReasonRepost(repost)) = reason.as_ref()? else {
            return None;
        };

        Some(RepostReason {
            by: self.convert_author(&repost.data.by),
            indexed_at: parse_timestamp(repost.data.indexed_at.as_str())
                .unwrap_or(post.created_at),
        })
    }

    /// Extract the reply parent as the AppView reported it
    fn extract_reply_parent(
        &self,
        reply: &Option<atrium_api::app::bsky::feed::defs::ReplyRef>,
    ) -> Option<PostRef> {
        use atrium_api::app::bsky::feed::defs::ReplyRefParentRefs;
        use atrium_api::types::Union;

        let reply = reply.as_ref()?;

        match &reply.data.parent {
            Union::Refs(ReplyRefParentRefs::PostView(pv)) => Some(PostRef::Available(PostStub {
                uri: pv.data.uri.clone(),
                cid: pv.data.cid.as_ref().to_string(),
                author: self.convert_author(&pv.data.author),
            })),
            Union::Refs(ReplyRefParentRefs::NotFoundPost(p)) => Some(PostRef::NotFound {
                uri: p.data.uri.clone(),
            }),
            Union::Refs(ReplyRefParentRefs::BlockedPost(p)) => Some(PostRef::Blocked {
                uri: p.data.uri.clone(),
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl Upstream for BskyClient {
    async fn resolve_handle(&self, handle: &str) -> Result<String, ClientError> {
        let params = atrium_api::com::atproto::identity::resolve_handle::ParametersData {
            handle: handle
                .parse()
                .map_err(|_| ClientError::NotFound(format!("invalid handle: {handle}")))?,
        };

        let output = self
            .agent
            .api
            .com
            .atproto
            .identity
            .resolve_handle(params.into())
            .await
            .map_err(classify)?;

        Ok(output.data.did.to_string())
    }

    async fn fetch_profile(&self, did: &str) -> Result<ProfileRecord, ClientError> {
        let params = atrium_api::app::bsky::actor::get_profile::ParametersData {
            actor: did
                .parse()
                .map_err(|e| ClientError::NotFound(format!("invalid actor: {e}")))?,
        };

        let output = self
            .agent
            .api
            .app
            .bsky
            .actor
            .get_profile(params.into())
            .await
            .map_err(classify)?;

        // Only the account's own label counts as a request to hide it
        let requires_auth = output.data.labels.as_ref().is_some_and(|labels| {
            labels.iter().any(|label| {
                label.data.val == NO_UNAUTHENTICATED_LABEL
                    && label.data.src.as_str() == output.data.did.as_str()
            })
        });

        Ok(ProfileRecord {
            did: output.data.did.to_string(),
            handle: output.data.handle.to_string(),
            display_name: output.data.display_name.clone(),
            avatar: output.data.avatar.clone(),
            description: output.data.description.clone(),
            requires_auth,
        })
    }

    async fn fetch_timeline(
        &self,
        did: &str,
        filter: PostFilter,
        cursor: Option<&str>,
    ) -> Result<TimelinePage, ClientError> {
        let params = atrium_api::app::bsky::feed::get_author_feed::ParametersData {
            actor: did
                .parse()
                .map_err(|e| ClientError::NotFound(format!("invalid actor: {e}")))?,
            cursor: cursor.map(String::from),
            filter: Some(filter.as_str().to_string()),
            include_pins: None,
            limit: None,
        };

        let output = self
            .agent
            .api
            .app
            .bsky
            .feed
            .get_author_feed(params.into())
            .await
            .map_err(classify)?;

        debug!(did, %filter, count = output.data.feed.len(), "fetched timeline page");

        let items = output
            .data
            .feed
            .into_iter()
            .map(|feed_view| self.convert_feed_view_post(feed_view))
            .collect();

        Ok(TimelinePage {
            items,
            cursor: output.data.cursor,
        })
    }
}

fn images(view: &atrium_api::app::bsky::embed::images::View) -> Embed {
    Embed::Images(
        view.data
            .images
            .iter()
            .map(|img| ImageEmbed {
                thumb: img.thumb.as_str().to_string(),
                fullsize: img.fullsize.as_str().to_string(),
                alt: img.alt.clone(),
            })
            .collect(),
    )
}

fn external(view: &atrium_api::app::bsky::embed::external::View) -> Embed {
    let card = &view.data.external.data;
    Embed::External(ExternalEmbed {
        uri: card.uri.clone(),
        title: card.title.clone(),
        description: card.description.clone(),
        thumb: card.thumb.clone(),
    })
}

fn video(view: &atrium_api::app::bsky::embed::video::View) -> Embed {
    Embed::Video(VideoEmbed {
        thumbnail: view.data.thumbnail.clone(),
        alt: view.data.alt.clone(),
    })
}

/// Map an XRPC failure onto our taxonomy. 4xx answers other than rate
/// limiting mean the AppView does not know the subject.
fn classify<E: std::fmt::Debug>(err: atrium_api::xrpc::Error<E>) -> ClientError {
    use atrium_api::xrpc::Error;

    match err {
        Error::XrpcResponse(response)
            if response.status.is_client_error() && response.status.as_u16() != 429 =>
        {
            ClientError::NotFound(format!("{}: {:?}", response.status, response.error))
        }
        Error::HttpClient(e)
            if e
                .downcast_ref::<reqwest::Error>()
                .is_some_and(reqwest::Error::is_timeout) =>
        {
            ClientError::Timeout
        }
        other => ClientError::Network(format!("{other:?}")),
    }
}
