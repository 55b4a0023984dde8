//! Core firehose record types.
//!
//! Every record carries its author DID, usually its own URI and client
//! `createdAt`, and after reordering a `ts` stamped from its record key. The
//! payload is selected by the `$type` tag.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Collection NSID for posts.
pub const POST_TYPE: &str = "app.bsky.feed.post";
/// Collection NSID for profile records.
pub const PROFILE_TYPE: &str = "app.bsky.actor.profile";

/// A reference to another record by URI and content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    /// URI of the referenced record.
    pub uri: String,
    /// CID of the referenced record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

/// Thread position of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    /// First post of the thread.
    pub root: StrongRef,
    /// Post being replied to.
    pub parent: StrongRef,
}

/// Payload of an `app.bsky.feed.post` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostBody {
    /// Post text. Absent on tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Set when the post is a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    /// Embedded media or record, kept as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Value>,
    /// Set on tombstones re-inserted for posts deleted from the network.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl PostBody {
    /// URI of the post quoted by this post's embed, if any.
    #[must_use]
    pub fn quoted_uri(&self) -> Option<&str> {
        let embed = self.embed.as_ref()?;
        match embed.get("$type")?.as_str()? {
            "app.bsky.embed.record" => embed.get("record")?.get("uri")?.as_str(),
            "app.bsky.embed.recordWithMedia" => {
                embed.get("record")?.get("record")?.get("uri")?.as_str()
            }
            _ => None,
        }
    }
}

/// Type-specific payload of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum RecordBody {
    /// A post, reply, quote, or tombstone.
    #[serde(rename = "app.bsky.feed.post")]
    Post(PostBody),
    /// A like of another post.
    #[serde(rename = "app.bsky.feed.like")]
    Like {
        /// The liked post.
        subject: StrongRef,
    },
    /// A repost of another post.
    #[serde(rename = "app.bsky.feed.repost")]
    Repost {
        /// The reposted post.
        subject: StrongRef,
    },
    /// A follow of another user.
    #[serde(rename = "app.bsky.graph.follow")]
    Follow {
        /// DID of the followed user.
        subject: String,
    },
    /// A block of another user.
    #[serde(rename = "app.bsky.graph.block")]
    Block {
        /// DID of the blocked user.
        subject: String,
    },
    /// A profile update.
    #[serde(rename = "app.bsky.actor.profile")]
    Profile,
    /// Any other collection.
    #[serde(other)]
    Unknown,
}

/// A single firehose record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unix milliseconds derived from the record key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    /// DID of the record's author.
    pub did: String,
    /// URI of the record itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Client-reported creation time.
    #[serde(
        rename = "createdAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<String>,
    /// Type-specific payload.
    #[serde(flatten)]
    pub body: RecordBody,
}

impl Record {
    /// Build a tombstone for a post deleted from the network.
    #[must_use]
    pub fn tombstone(did: String, uri: String, ts: i64) -> Self {
        Self {
            ts: Some(ts),
            did,
            uri: Some(uri),
            created_at: None,
            body: RecordBody::Post(PostBody {
                deleted: true,
                ..PostBody::default()
            }),
        }
    }

    /// The record's time in Unix milliseconds.
    ///
    /// Prefers the rkey-derived `ts`, falling back to `createdAt`.
    #[must_use]
    pub fn time_ms(&self) -> Option<i64> {
        self.ts
            .or_else(|| self.created_at.as_deref().and_then(|s| parse_created_at(s).ok()))
    }

    /// Whether this record is a re-inserted tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(&self.body, RecordBody::Post(post) if post.deleted)
    }

    /// Post URIs this record points at: reply root and parent, quote, or like and repost subject.
    #[must_use]
    pub fn referenced_posts(&self) -> Vec<&str> {
        match &self.body {
            RecordBody::Post(post) => {
                let mut refs = Vec::new();
                if let Some(reply) = &post.reply {
                    refs.push(reply.root.uri.as_str());
                    refs.push(reply.parent.uri.as_str());
                }
                refs.extend(post.quoted_uri());
                refs
            }
            RecordBody::Like { subject } | RecordBody::Repost { subject } => {
                vec![subject.uri.as_str()]
            }
            _ => Vec::new(),
        }
    }
}

/// Parse a `createdAt` timestamp into Unix milliseconds.
///
/// # Errors
///
/// Returns [`Error::InvalidTimestamp`] if the text is not RFC 3339.
pub fn parse_created_at(text: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| Error::invalid_timestamp(text))
}
