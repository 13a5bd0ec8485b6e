//! Canonical document shapes (spec §3) and the tagged record hierarchy
//! the codec decodes into (spec §9 "generic message hierarchy with
//! dispatch").

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Alias name a document lives under in the document store.
pub mod alias {
    pub const POSTS: &str = "posts";
    pub const POST_TOMBSTONES: &str = "post_tombstones";
    pub const LIKES: &str = "likes";
    pub const LIKE_TOMBSTONES: &str = "like_tombstones";
    pub const HASHTAGS: &str = "hashtags";
}

/// Shared capability set dispatched on by ingesters (§9), trimmed to
/// what is actually used: a document key and its routing key.
pub trait Keyed {
    fn key(&self) -> &str;
    fn routing(&self) -> Option<&str>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub media_type: MediaType,
    pub mime_type: String,
    pub size: u64,
    pub aspect_ratio: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A dense embedding vector. Serialized as a JSON array of numbers,
/// never strings (spec §4.C "Float32 JSON").
pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
    #[serde(rename = "_key")]
    pub uri: String,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
    pub thread_root_uri: Option<String>,
    pub thread_parent_uri: Option<String>,
    pub quoted_post_uri: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub embeddings: HashMap<String, Embedding>,
    pub indexed_at: String,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl Post {
    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }

    pub fn media_count(&self) -> usize {
        self.media.len()
    }
}

impl Keyed for Post {
    fn key(&self) -> &str {
        &self.uri
    }
    fn routing(&self) -> Option<&str> {
        Some(&self.author_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostTombstone {
    #[serde(rename = "_key")]
    pub uri: String,
    pub author_id: String,
    pub deleted_at: String,
    pub indexed_at: String,
}

impl Keyed for PostTombstone {
    fn key(&self) -> &str {
        &self.uri
    }
    fn routing(&self) -> Option<&str> {
        Some(&self.author_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    #[serde(rename = "_key")]
    pub uri: String,
    pub author_id: String,
    pub subject_uri: String,
    pub created_at: String,
    pub indexed_at: String,
}

impl Keyed for Like {
    fn key(&self) -> &str {
        &self.uri
    }
    fn routing(&self) -> Option<&str> {
        Some(&self.author_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeTombstone {
    #[serde(rename = "_key")]
    pub uri: String,
    pub author_id: String,
    pub subject_uri: String,
    pub deleted_at: String,
    pub indexed_at: String,
}

impl Keyed for LikeTombstone {
    fn key(&self) -> &str {
        &self.uri
    }
    fn routing(&self) -> Option<&str> {
        Some(&self.author_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashtagBucket {
    pub hashtag: String,
    pub hour: String,
    pub count: i64,
}

impl HashtagBucket {
    pub fn doc_id(hashtag: &str, hour: &str) -> String {
        format!("{hashtag}_{hour}")
    }
}

impl Keyed for HashtagBucket {
    fn key(&self) -> &str {
        // Hashtag buckets are unrouted (no author); callers use
        // `HashtagBucket::doc_id` for the document id directly.
        &self.hashtag
    }
    fn routing(&self) -> Option<&str> {
        None
    }
}

/// A fully decoded record, dispatched on by the ingesters instead of by
/// reflection (§9). `LikeDelete` intentionally carries no subject URI:
/// it must be resolved via the document store before it can be
/// tombstoned (spec §3, Like tombstone).
#[derive(Debug, Clone)]
pub enum IngestRecord {
    Post(Box<Post>),
    PostDelete { uri: String, author_id: String, deleted_at: Option<String> },
    Like(Box<Like>),
    LikeDelete { uri: String, author_id: String },
    AccountDeletion { author_id: String },
    AccountStatus { author_id: String, status: String },
}
